use std::borrow::Cow;
use std::collections::HashMap;

use tracing::trace;

use super::ast::{Control, Expression, Node, Operator, Path};
use super::functions;
use crate::database::Database;
use crate::datatype::{boolean_text, format_number, is_truthy, parse_float, parse_number, ValueType};
use crate::error::{ExhibitError, Result};
use crate::range::RangeValue;
use crate::set::{KeyHasher, Set};

pub const DEFAULT_ROOT: &str = "value";

// ------------- Roots -------------
#[derive(Debug, Clone, PartialEq)]
pub enum RootValue {
    One(String),
    Many(Set),
}

/// Named bindings an expression is evaluated against, each with the
/// value type of what it holds.
#[derive(Debug, Clone, Default)]
pub struct Roots {
    bindings: HashMap<String, (RootValue, ValueType), KeyHasher>,
}

impl Roots {
    pub fn new() -> Self {
        Self::default()
    }
    /// Binds the default root to one item.
    pub fn item(item: &str) -> Self {
        Self::new().bind(DEFAULT_ROOT, RootValue::One(item.to_string()), ValueType::Item)
    }
    /// Binds the default root to a set of items.
    pub fn items(items: Set) -> Self {
        Self::new().bind(DEFAULT_ROOT, RootValue::Many(items), ValueType::Item)
    }
    pub fn bind(mut self, name: &str, value: RootValue, value_type: ValueType) -> Self {
        self.set(name, value, value_type);
        self
    }
    pub fn set(&mut self, name: &str, value: RootValue, value_type: ValueType) {
        self.bindings.insert(name.to_string(), (value, value_type));
    }
    pub fn get(&self, name: &str) -> Option<(&RootValue, &ValueType)> {
        self.bindings.get(name).map(|(value, value_type)| (value, value_type))
    }
}

// ------------- Value collections -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Set(Set),
    List(Vec<String>),
}

/// The result of an evaluation. Lists keep duplicates and order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCollection {
    pub values: Values,
    pub value_type: ValueType,
}

impl ValueCollection {
    pub fn set(set: Set, value_type: ValueType) -> Self {
        Self { values: Values::Set(set), value_type }
    }
    pub fn list(list: Vec<String>, value_type: ValueType) -> Self {
        Self { values: Values::List(list), value_type }
    }
    pub fn single<S: Into<String>>(value: S, value_type: ValueType) -> Self {
        Self::list(vec![value.into()], value_type)
    }
    pub fn empty(value_type: ValueType) -> Self {
        Self::set(Set::new(), value_type)
    }
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }
    pub fn size(&self) -> usize {
        match &self.values {
            Values::Set(set) => set.size(),
            Values::List(list) => list.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
    pub fn iter(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match &self.values {
            Values::Set(set) => Box::new(set.iter()),
            Values::List(list) => Box::new(list.iter().map(String::as_str)),
        }
    }
    pub fn contains(&self, value: &str) -> bool {
        match &self.values {
            Values::Set(set) => set.contains(value),
            Values::List(list) => list.iter().any(|v| v == value),
        }
    }
    pub fn first(&self) -> Option<&str> {
        self.iter().next()
    }
    pub fn as_set(&self) -> Cow<'_, Set> {
        match &self.values {
            Values::Set(set) => Cow::Borrowed(set),
            Values::List(list) => Cow::Owned(list.iter().map(String::as_str).collect()),
        }
    }
    pub fn into_set(self) -> Set {
        match self.values {
            Values::Set(set) => set,
            Values::List(list) => list.into_iter().collect(),
        }
    }
    /// Values in iteration order for lists, sorted for sets.
    pub fn to_vec(&self) -> Vec<String> {
        match &self.values {
            Values::Set(set) => set.to_sorted_vec(),
            Values::List(list) => list.clone(),
        }
    }
    fn any_truthy(&self) -> bool {
        self.iter().any(|value| is_truthy(value, &self.value_type))
    }
}

// ------------- Scope -------------
// The roots plus an optional rebinding of the default root made by
// foreach and filter while they iterate.
#[derive(Clone, Copy)]
struct Scope<'a> {
    roots: &'a Roots,
    default_root: &'a str,
    bound: Option<(&'a RootValue, &'a ValueType)>,
}

impl<'a> Scope<'a> {
    fn lookup(&self, name: Option<&str>) -> Result<(&'a RootValue, &'a ValueType)> {
        let name = name.unwrap_or(self.default_root);
        if name == self.default_root {
            if let Some(bound) = self.bound {
                return Ok(bound);
            }
        }
        self.roots
            .get(name)
            .ok_or_else(|| ExhibitError::Evaluation(format!("No such variable called {}", name)))
    }
}

// ------------- Expression -------------
impl Expression {
    pub fn evaluate(&self, roots: &Roots, default_root_name: &str, database: &Database) -> Result<ValueCollection> {
        let scope = Scope { roots, default_root: default_root_name, bound: None };
        evaluate_node(self.root(), scope, database)
    }
    /// Evaluates with the default root bound to a single item.
    pub fn evaluate_on_item(&self, item: &str, database: &Database) -> Result<ValueCollection> {
        self.evaluate(&Roots::item(item), DEFAULT_ROOT, database)
    }
    /// The first value of the result, if any, with the result's type.
    pub fn evaluate_single(
        &self,
        roots: &Roots,
        default_root_name: &str,
        database: &Database,
    ) -> Result<(Option<String>, ValueType)> {
        let result = self.evaluate(roots, default_root_name, database)?;
        Ok((result.first().map(str::to_string), result.value_type))
    }
    pub fn test_exists(&self, roots: &Roots, default_root_name: &str, database: &Database) -> Result<bool> {
        Ok(self.evaluate(roots, default_root_name, database)?.size() > 0)
    }
}

fn evaluate_node(node: &Node, scope: Scope, database: &Database) -> Result<ValueCollection> {
    match node {
        Node::Constant { value, value_type } => Ok(ValueCollection::single(value.as_str(), value_type.clone())),
        Node::Path(path) => {
            let (root, value_type) = scope.lookup(path.root_name())?;
            path.walk_forward(root_collection(root, value_type), database)
        }
        Node::Operator { operator, left, right } => {
            let left = evaluate_node(left, scope, database)?;
            let right = evaluate_node(right, scope, database)?;
            Ok(apply_operator(*operator, &left, &right))
        }
        Node::FunctionCall { name, args } => {
            let function = functions::lookup(name)
                .ok_or_else(|| ExhibitError::Evaluation(format!("No such function named {}", name)))?;
            let args = args
                .iter()
                .map(|arg| evaluate_node(arg, scope, database))
                .collect::<Result<Vec<_>>>()?;
            trace!(function = %name, args = args.len(), "calling function");
            function(&args)
        }
        Node::ControlCall { control, args } => evaluate_control(*control, args, scope, database),
    }
}

fn root_collection(root: &RootValue, value_type: &ValueType) -> ValueCollection {
    match root {
        RootValue::One(value) => ValueCollection::single(value.as_str(), value_type.clone()),
        RootValue::Many(set) => ValueCollection::set(set.clone(), value_type.clone()),
    }
}

fn arg<'n>(control: Control, args: &'n [Node], index: usize) -> Result<&'n Node> {
    args.get(index).ok_or_else(|| {
        ExhibitError::Evaluation(format!("{}() expects at least {} arguments", control.as_str(), index + 1))
    })
}

fn evaluate_control(control: Control, args: &[Node], scope: Scope, database: &Database) -> Result<ValueCollection> {
    match control {
        Control::If => {
            let condition = evaluate_node(arg(control, args, 0)?, scope, database)?;
            if condition.any_truthy() {
                evaluate_node(arg(control, args, 1)?, scope, database)
            } else {
                evaluate_node(arg(control, args, 2)?, scope, database)
            }
        }
        Control::Foreach => {
            let collection = evaluate_node(arg(control, args, 0)?, scope, database)?;
            let body = arg(control, args, 1)?;
            let mut values = Vec::new();
            let mut value_type = ValueType::Text;
            for value in collection.iter() {
                let bound = RootValue::One(value.to_string());
                let inner = Scope { bound: Some((&bound, &collection.value_type)), ..scope };
                let result = evaluate_node(body, inner, database)?;
                value_type = result.value_type.clone();
                values.extend(result.iter().map(str::to_string));
            }
            Ok(ValueCollection::list(values, value_type))
        }
        Control::Filter => {
            let collection = evaluate_node(arg(control, args, 0)?, scope, database)?;
            let predicate = arg(control, args, 1)?;
            let mut kept = Set::new();
            for value in collection.iter() {
                let bound = RootValue::One(value.to_string());
                let inner = Scope { bound: Some((&bound, &collection.value_type)), ..scope };
                if evaluate_node(predicate, inner, database)?.contains("true") {
                    kept.add(value);
                }
            }
            Ok(ValueCollection::set(kept, collection.value_type))
        }
        Control::Default => {
            for candidate in args {
                let result = evaluate_node(candidate, scope, database)?;
                if result.size() > 0 {
                    return Ok(result);
                }
            }
            Ok(ValueCollection::empty(ValueType::Text))
        }
    }
}

// Applies the operator to every pair drawn from the two sides.
fn apply_operator(operator: Operator, left: &ValueCollection, right: &ValueCollection) -> ValueCollection {
    let mut values = Vec::with_capacity(left.size() * right.size());
    for a in left.iter() {
        for b in right.iter() {
            values.push(match operator {
                Operator::Add => format_number(parse_float(a) + parse_float(b)),
                Operator::Subtract => format_number(parse_float(a) - parse_float(b)),
                Operator::Multiply => format_number(parse_float(a) * parse_float(b)),
                Operator::Divide => format_number(parse_float(a) / parse_float(b)),
                Operator::Equal => boolean_text(loosely_equal(a, b)),
                Operator::NotEqual => boolean_text(!loosely_equal(a, b)),
                Operator::Less => boolean_text(parse_float(a) < parse_float(b)),
                Operator::Greater => boolean_text(parse_float(a) > parse_float(b)),
                Operator::LessOrEqual => boolean_text(parse_float(a) <= parse_float(b)),
                Operator::GreaterOrEqual => boolean_text(parse_float(a) >= parse_float(b)),
            });
        }
    }
    let value_type = if operator.is_comparison() { ValueType::Boolean } else { ValueType::Number };
    ValueCollection::list(values, value_type)
}

fn loosely_equal(a: &str, b: &str) -> bool {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ------------- Path -------------
impl Path {
    pub fn evaluate(&self, roots: &Roots, default_root_name: &str, database: &Database) -> Result<ValueCollection> {
        let scope = Scope { roots, default_root: default_root_name, bound: None };
        let (root, value_type) = scope.lookup(self.root_name())?;
        self.walk_forward(root_collection(root, value_type), database)
    }

    /// Follows every hop left to right starting from `collection`.
    pub fn walk_forward(&self, collection: ValueCollection, database: &Database) -> Result<ValueCollection> {
        let mut collection = collection;
        for segment in &self.segments {
            let value_type = if segment.forward {
                database
                    .get_property(&segment.property)
                    .map(|property| property.value_type().clone())
                    .unwrap_or_default()
            } else {
                ValueType::Item
            };
            collection = if segment.is_array {
                let mut values = Vec::new();
                for value in collection.iter() {
                    let next = if segment.forward {
                        database.get_objects(value, &segment.property, None, None)
                    } else {
                        database.get_subjects(value, &segment.property, None, None)
                    };
                    values.extend(next.iter().map(str::to_string));
                }
                ValueCollection::list(values, value_type)
            } else {
                let set = collection.as_set();
                let next = if segment.forward {
                    database.get_objects_union(&set, &segment.property, None, None)
                } else {
                    database.get_subjects_union(&set, &segment.property, None, None)
                };
                ValueCollection::set(next, value_type)
            };
        }
        Ok(collection)
    }

    /// Runs the hops right to left, mapping values back to the items that
    /// produced them. `filter` applies only at the outermost hop.
    pub fn walk_backward(
        &self,
        values: ValueCollection,
        filter: Option<&Set>,
        database: &Database,
    ) -> Result<ValueCollection> {
        self.walk_backward_from(self.segments.len(), values, filter, database)
    }

    pub fn evaluate_backward(
        &self,
        value: &str,
        value_type: ValueType,
        filter: Option<&Set>,
        database: &Database,
    ) -> Result<ValueCollection> {
        self.walk_backward(ValueCollection::single(value, value_type), filter, database)
    }

    /// Items reaching a value in the range through this path. The last
    /// hop must be forward so that the property's range index applies.
    pub fn range_backward(
        &self,
        from: &RangeValue,
        to: &RangeValue,
        inclusive: bool,
        filter: Option<&Set>,
        database: &Database,
    ) -> Result<ValueCollection> {
        let count = self.segments.len();
        let last = match self.segments.last() {
            Some(last) if last.forward => last,
            _ => return Err(ExhibitError::Evaluation("Last path of segment must be forward".into())),
        };
        let outermost = if count == 1 { filter } else { None };
        let set = database.get_subjects_in_range(&last.property, from, to, inclusive, None, outermost);
        self.walk_backward_from(count - 1, ValueCollection::set(set, ValueType::Item), filter, database)
    }

    fn walk_backward_from(
        &self,
        end: usize,
        values: ValueCollection,
        filter: Option<&Set>,
        database: &Database,
    ) -> Result<ValueCollection> {
        let mut collection = values;
        for i in (0..end).rev() {
            let segment = &self.segments[i];
            let hop_filter = if i == 0 { filter } else { None };
            let value_type = if segment.forward {
                ValueType::Item
            } else {
                database
                    .get_property(&segment.property)
                    .map(|property| property.value_type().clone())
                    .unwrap_or_default()
            };
            collection = if segment.is_array {
                let mut values = Vec::new();
                for value in collection.iter() {
                    let next = if segment.forward {
                        database.get_subjects(value, &segment.property, None, hop_filter)
                    } else {
                        database.get_objects(value, &segment.property, None, hop_filter)
                    };
                    values.extend(next.iter().map(str::to_string));
                }
                ValueCollection::list(values, value_type)
            } else {
                let set = collection.as_set();
                let next = if segment.forward {
                    database.get_subjects_union(&set, &segment.property, None, hop_filter)
                } else {
                    database.get_objects_union(&set, &segment.property, None, hop_filter)
                };
                ValueCollection::set(next, value_type)
            };
        }
        Ok(collection)
    }

    pub fn test_exists(&self, roots: &Roots, default_root_name: &str, database: &Database) -> Result<bool> {
        Ok(self.evaluate(roots, default_root_name, database)?.size() > 0)
    }
}
