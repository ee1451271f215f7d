//! Exhibit: the in-memory core of a faceted data browser.
//!
//! Data arrives as JSON (`{types, properties, items}`) and is kept as
//! triples of strings:
//! * The [`database::Database`] indexes every statement both ways (`spo` and
//!   `ops`) and knows the [`database::Type`]s and [`database::Property`]s the
//!   data declared, including each property's value type.
//! * A [`set::Set`] is the currency of the engine: item ids, values and
//!   results all travel as sets of string keys.
//! * A [`range::RangeIndex`] is a sorted `(value, item)` list built lazily per
//!   property and used for range facets.
//!
//! ## Expressions
//! Facets and collections describe what they look at with a small path
//! language: `.author.country` walks forward, `!author` walks backward,
//! `value.age * 2` and `filter(.friends, .age > 30)` compute. The grammar
//! lives in `expression.pest`; see the [`expression`] module.
//!
//! ## Collections and facets
//! A [`collection::Collection`] holds a root item set and an ordered list of
//! facets. Each [`facet::Facet`] both restricts the items and counts the
//! values it would display over the items the other facets let through.
//! The [`exhibit::Exhibit`] context owns the database, the collections, the
//! [`settings::Settings`] and the error policy applied to everything that can
//! fail along the way.
//!
//! ## Quick Start
//! ```
//! use exhibit::{exhibit::Exhibit, facet::FacetConfig, settings::Settings};
//! use serde_json::json;
//! let mut exhibit = Exhibit::new(Settings::default());
//! exhibit.load_data(&json!({ "items": [
//!     { "label": "Alice", "age": 30 },
//!     { "label": "Bob", "age": 45 }
//! ]}), None).unwrap();
//! let config = FacetConfig {
//!     id: Some("age".into()),
//!     facet_class: Some("NumericRange".into()),
//!     expression: Some(".age".into()),
//!     interval: Some(20.0),
//!     ..FacetConfig::default()
//! };
//! exhibit.add_facet("default", &config).unwrap();
//! let state = serde_json::from_value(json!({
//!     "default": { "age": { "ranges": [{ "from": 40, "to": 60 }] } }
//! })).unwrap();
//! exhibit.import_state(&state).unwrap();
//! let restricted = exhibit.default_collection().unwrap().get_restricted_items();
//! assert_eq!(restricted.to_sorted_vec(), vec!["Bob"]);
//! ```
//!
//! ## Logging
//! Everything logs through `tracing`; install a subscriber (the binary uses
//! `tracing-subscriber` with `RUST_LOG`) to see load progress and recovered
//! configuration errors.

pub mod collection;
pub mod database;
pub mod datatype;
pub mod error;
pub mod exhibit;
pub mod expression;
pub mod facet;
pub mod loader;
pub mod range;
pub mod set;
pub mod settings;

pub use error::{ExhibitError, Result};
pub use set::Set;
