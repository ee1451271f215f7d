//! Facets: stateful restriction predicates attached to a collection.
//!
//! Each facet both consumes an item set ([`Facet::update`], recomputing what
//! it would display) and produces a restriction ([`Facet::restrict`]). The
//! set of facet kinds is closed; [`FacetKind`] dispatches over it and
//! [`FacetConfig`] builds one from its `facetClass` tag.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::database::Database;
use crate::datatype::{parse_float, ValueType};
use crate::error::{ExhibitError, Result};
use crate::expression::{self, Expression};
use crate::range::RangeValue;
use crate::set::Set;
use crate::settings::Settings;

pub mod cache;
pub mod cloud;
pub mod derived;
pub mod hierarchical;
pub mod list;
pub mod range;
pub mod text_search;

pub use cache::FacetCache;
pub use cloud::{CloudEntry, CloudFacet};
pub use derived::CollectionFacet;
pub use hierarchical::{HierarchicalFacet, HierarchyEntry};
pub use list::ListFacet;
pub use range::{AlphaRangeFacet, NumericRangeFacet, RangeEntry};
pub use text_search::{Debouncer, TextSearchFacet};

// ------------- Context -------------
/// What a facet sees of its collection while restricting or updating.
#[derive(Clone, Copy)]
pub struct FacetContext<'a> {
    pub database: &'a Database,
    /// The collection's root items, the domain of every facet cache.
    pub all_items: &'a Set,
}

// ------------- State -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSelection {
    pub from: RangeValue,
    pub to: RangeValue,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchicalSelection {
    pub value: Option<String>,
    pub select_others: bool,
}

/// Pure-data restriction state exchanged with history and bookmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FacetState {
    #[serde(rename_all = "camelCase")]
    List {
        selection: Vec<String>,
        #[serde(default)]
        select_missing: bool,
    },
    Range { ranges: Vec<RangeSelection> },
    Hierarchical { selections: Vec<HierarchicalSelection> },
    TextSearch { text: Option<String> },
}

// ------------- Entries -------------
/// One displayable value of a list-like facet. `value` is `None` for the
/// entry standing for items missing a value.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetEntry {
    pub value: Option<String>,
    pub label: String,
    pub count: usize,
    pub selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Value,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Forward,
    Reverse,
}

/// Ordering of facet values: a fixed order when configured, numeric for
/// numbers, by label otherwise; `Count` mode sorts by descending count first.
#[derive(Debug, Clone, Default)]
pub struct EntryOrder {
    fixed_order: Option<HashMap<String, usize>>,
    mode: SortMode,
    direction: SortDirection,
}

impl EntryOrder {
    pub fn new(fixed_order: Option<&[String]>, mode: SortMode, direction: SortDirection) -> Self {
        let fixed_order = fixed_order
            .filter(|order| !order.is_empty())
            .map(|order| order.iter().enumerate().map(|(i, label)| (label.clone(), i)).collect());
        Self { fixed_order, mode, direction }
    }

    fn compare_values(&self, a: &FacetEntry, b: &FacetEntry, value_type: &ValueType) -> Ordering {
        if let Some(order) = &self.fixed_order {
            return match (order.get(&a.label), order.get(&b.label)) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.label.cmp(&b.label),
            };
        }
        if value_type.is_numeric() {
            let x = a.value.as_deref().map(parse_float).unwrap_or(f64::NAN);
            let y = b.value.as_deref().map(parse_float).unwrap_or(f64::NAN);
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
        a.label.cmp(&b.label)
    }

    pub fn compare(&self, a: &FacetEntry, b: &FacetEntry, value_type: &ValueType) -> Ordering {
        let ordering = match self.mode {
            SortMode::Count => b.count.cmp(&a.count).then_with(|| self.compare_values(a, b, value_type)),
            SortMode::Value => self.compare_values(a, b, value_type),
        };
        match self.direction {
            SortDirection::Forward => ordering,
            SortDirection::Reverse => ordering.reverse(),
        }
    }

    pub fn sort(&self, entries: &mut [FacetEntry], value_type: &ValueType) {
        entries.sort_by(|a, b| self.compare(a, b, value_type));
    }
}

/// Display label of a facet value: item labels for items, the value itself
/// otherwise.
pub fn value_label(database: &Database, value: &str, value_type: &ValueType) -> String {
    match value_type {
        ValueType::Item => database.get_object(value, "label").unwrap_or(value).to_string(),
        _ => value.to_string(),
    }
}

// ------------- Facet -------------
pub trait Facet {
    fn id(&self) -> &str;
    fn has_restrictions(&self) -> bool;
    /// The subset of `items` this facet lets through.
    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set>;
    /// Recomputes displayable values and counts from `items`. Never touches
    /// the selection.
    fn update(&mut self, ctx: &FacetContext, items: &Set) -> Result<()>;
    /// Drops the selection and returns what it was.
    fn clear_all_restrictions(&mut self) -> FacetState;
    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()>;
    fn export_state(&self) -> FacetState;
    fn export_empty_state(&self) -> FacetState;
    fn state_differs(&self, state: &FacetState) -> bool {
        self.export_state() != *state
    }
    /// Applies `state` when it differs from the current one and reports
    /// whether anything changed.
    fn import_state(&mut self, state: &FacetState) -> Result<bool> {
        if !self.state_differs(state) {
            return Ok(false);
        }
        if *state == self.export_empty_state() {
            self.clear_all_restrictions();
        } else {
            self.apply_restrictions(state)?;
        }
        Ok(true)
    }
    /// Drops caches built over the collection's root items.
    fn on_root_items_changed(&mut self) {}
}

pub(crate) fn state_mismatch(id: &str, state: &FacetState) -> ExhibitError {
    ExhibitError::Data(format!("facet {} cannot take state {:?}", id, state))
}

// ------------- Kinds -------------
#[derive(Debug)]
pub enum FacetKind {
    List(ListFacet),
    Cloud(CloudFacet),
    NumericRange(NumericRangeFacet),
    AlphaRange(AlphaRangeFacet),
    Hierarchical(HierarchicalFacet),
    TextSearch(TextSearchFacet),
    Collection(CollectionFacet),
}

macro_rules! dispatch {
    ($value:expr, $facet:ident => $body:expr) => {
        match $value {
            FacetKind::List($facet) => $body,
            FacetKind::Cloud($facet) => $body,
            FacetKind::NumericRange($facet) => $body,
            FacetKind::AlphaRange($facet) => $body,
            FacetKind::Hierarchical($facet) => $body,
            FacetKind::TextSearch($facet) => $body,
            FacetKind::Collection($facet) => $body,
        }
    };
}

impl Facet for FacetKind {
    fn id(&self) -> &str {
        dispatch!(self, f => f.id())
    }
    fn has_restrictions(&self) -> bool {
        dispatch!(self, f => f.has_restrictions())
    }
    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        dispatch!(self, f => f.restrict(ctx, items))
    }
    fn update(&mut self, ctx: &FacetContext, items: &Set) -> Result<()> {
        dispatch!(self, f => f.update(ctx, items))
    }
    fn clear_all_restrictions(&mut self) -> FacetState {
        dispatch!(self, f => f.clear_all_restrictions())
    }
    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()> {
        dispatch!(self, f => f.apply_restrictions(state))
    }
    fn export_state(&self) -> FacetState {
        dispatch!(self, f => f.export_state())
    }
    fn export_empty_state(&self) -> FacetState {
        dispatch!(self, f => f.export_empty_state())
    }
    fn state_differs(&self, state: &FacetState) -> bool {
        dispatch!(self, f => f.state_differs(state))
    }
    fn import_state(&mut self, state: &FacetState) -> Result<bool> {
        dispatch!(self, f => f.import_state(state))
    }
    fn on_root_items_changed(&mut self) {
        dispatch!(self, f => f.on_root_items_changed())
    }
}

impl FacetKind {
    pub fn class(&self) -> Option<FacetClass> {
        Some(match self {
            FacetKind::List(_) => FacetClass::List,
            FacetKind::Cloud(_) => FacetClass::Cloud,
            FacetKind::NumericRange(_) => FacetClass::NumericRange,
            FacetKind::AlphaRange(_) => FacetClass::AlphaRange,
            FacetKind::Hierarchical(_) => FacetClass::Hierarchical,
            FacetKind::TextSearch(_) => FacetClass::TextSearch,
            FacetKind::Collection(_) => return None,
        })
    }
    pub fn as_list_mut(&mut self) -> Option<&mut ListFacet> {
        match self {
            FacetKind::List(facet) => Some(facet),
            FacetKind::Cloud(facet) => Some(facet.list_mut()),
            _ => None,
        }
    }
    pub fn as_text_search_mut(&mut self) -> Option<&mut TextSearchFacet> {
        match self {
            FacetKind::TextSearch(facet) => Some(facet),
            _ => None,
        }
    }
}

// ------------- Configuration -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetClass {
    List,
    Cloud,
    NumericRange,
    AlphaRange,
    Hierarchical,
    TextSearch,
}

impl FromStr for FacetClass {
    type Err = ExhibitError;
    fn from_str(s: &str) -> Result<Self> {
        let class = match s.to_ascii_lowercase().as_str() {
            "list" => FacetClass::List,
            "cloud" => FacetClass::Cloud,
            "numericrange" => FacetClass::NumericRange,
            "alpharange" => FacetClass::AlphaRange,
            "hierarchical" => FacetClass::Hierarchical,
            "textsearch" => FacetClass::TextSearch,
            _ => return Err(ExhibitError::UnknownTag { kind: "facet class", name: s.to_string() }),
        };
        Ok(class)
    }
}

/// Declarative facet configuration, as JSON with camelCase keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FacetConfig {
    pub id: Option<String>,
    pub facet_class: Option<String>,
    pub expression: Option<String>,
    pub facet_label: Option<String>,
    pub sort_mode: Option<SortMode>,
    pub sort_direction: Option<SortDirection>,
    /// Labels in display order, `;` separated.
    pub fixed_order: Option<String>,
    pub show_missing: Option<bool>,
    pub missing_label: Option<String>,
    pub minimum_count: Option<usize>,
    pub interval: Option<f64>,
    pub uniform_grouping: Option<String>,
    pub others_label: Option<String>,
    pub requires_enter: Option<bool>,
    pub selection: Option<Vec<String>>,
    pub select_missing: Option<bool>,
}

impl FacetConfig {
    pub fn class(&self) -> Result<FacetClass> {
        match &self.facet_class {
            Some(tag) => tag.parse(),
            None => Ok(FacetClass::List),
        }
    }

    pub fn fixed_order(&self) -> Option<Vec<String>> {
        self.fixed_order
            .as_ref()
            .map(|order| order.split(';').map(|label| label.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    pub fn order(&self) -> EntryOrder {
        EntryOrder::new(
            self.fixed_order().as_deref(),
            self.sort_mode.unwrap_or_default(),
            self.sort_direction.unwrap_or_default(),
        )
    }

    /// Parses the configured expression. A malformed one is logged and
    /// yields `None`, leaving the facet unable to restrict.
    pub fn parsed_expression(&self, facet_id: &str) -> Option<Expression> {
        let source = self.expression.as_deref()?;
        match expression::parse(source) {
            Ok(expression) => Some(expression),
            Err(e) => {
                error!(facet = %facet_id, expression = %source, error = %e, "malformed facet expression");
                None
            }
        }
    }

    /// Builds the facet this configuration names. `position` numbers
    /// facets without an explicit id.
    pub fn build(&self, settings: &Settings, position: usize) -> Result<FacetKind> {
        let class = self.class()?;
        let id = self.id.clone().unwrap_or_else(|| format!("facet{}", position));
        let mut facet = match class {
            FacetClass::List => FacetKind::List(ListFacet::from_config(&id, self)),
            FacetClass::Cloud => FacetKind::Cloud(CloudFacet::from_config(&id, self)),
            FacetClass::NumericRange => FacetKind::NumericRange(NumericRangeFacet::from_config(&id, self, settings)),
            FacetClass::AlphaRange => FacetKind::AlphaRange(AlphaRangeFacet::from_config(&id, self, settings)),
            FacetClass::Hierarchical => FacetKind::Hierarchical(HierarchicalFacet::from_config(&id, self)),
            FacetClass::TextSearch => FacetKind::TextSearch(TextSearchFacet::from_config(&id, self, settings)),
        };
        if let Some(selection) = &self.selection {
            let state = FacetState::List {
                selection: selection.clone(),
                select_missing: self.select_missing.unwrap_or(false),
            };
            match facet.as_list_mut() {
                Some(list) => {
                    list.apply_restrictions(&state)?;
                }
                None => warn!(facet = %id, "initial selection ignored for a non-list facet"),
            }
        }
        Ok(facet)
    }
}
