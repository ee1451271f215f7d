//! The expression language: paths over the triple store, operators,
//! function calls and control calls.
//!
//! ```text
//! .label                      forward hop from the default root
//! !author.name                backward then forward
//! .@tags or .tags{}           array hop, keeps one value per source
//! item.age + 1                rooted path in arithmetic
//! filter(.friends, .age > 30) control call
//! ```

pub mod ast;
pub mod evaluate;
pub mod functions;
mod parser;

pub use ast::{Control, Expression, Node, Operator, Path, Segment};
pub use evaluate::{RootValue, Roots, ValueCollection, Values, DEFAULT_ROOT};
pub use parser::{parse, parse_prefix, parse_several};
