use std::fmt;
use std::str::FromStr;

use crate::datatype::ValueType;
use crate::error::ExhibitError;

// ------------- Operators -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::LessOrEqual => "<=",
            Operator::GreaterOrEqual => ">=",
        }
    }
    pub fn is_comparison(&self) -> bool {
        !matches!(self, Operator::Add | Operator::Subtract | Operator::Multiply | Operator::Divide)
    }
}

impl FromStr for Operator {
    type Err = ExhibitError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "+" => Operator::Add,
            "-" => Operator::Subtract,
            "*" => Operator::Multiply,
            "/" => Operator::Divide,
            "=" => Operator::Equal,
            "<>" => Operator::NotEqual,
            "<" => Operator::Less,
            ">" => Operator::Greater,
            "<=" => Operator::LessOrEqual,
            ">=" => Operator::GreaterOrEqual,
            other => return Err(ExhibitError::UnknownTag { kind: "operator", name: other.to_string() }),
        })
    }
}

// ------------- Controls -------------
/// Calls that receive their arguments unevaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    If,
    Foreach,
    Filter,
    Default,
}

impl Control {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "if" => Some(Control::If),
            "foreach" => Some(Control::Foreach),
            "filter" => Some(Control::Filter),
            "default" => Some(Control::Default),
            _ => None,
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            Control::If => "if",
            Control::Foreach => "foreach",
            Control::Filter => "filter",
            Control::Default => "default",
        }
    }
}

// ------------- Paths -------------
/// One property hop. `forward` follows subject -> object, otherwise
/// object -> subject. Array hops keep one result per source value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub property: String,
    pub forward: bool,
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub(crate) root_name: Option<String>,
    pub(crate) segments: Vec<Segment>,
}

impl Path {
    pub fn new(root_name: Option<String>, segments: Vec<Segment>) -> Self {
        Self { root_name, segments }
    }
    pub fn root_name(&self) -> Option<&str> {
        self.root_name.as_deref()
    }
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(root) = &self.root_name {
            write!(f, "{}", root)?;
        }
        for segment in &self.segments {
            let hop = match (segment.forward, segment.is_array) {
                (true, false) => ".",
                (true, true) => ".@",
                (false, false) => "!",
                (false, true) => "!@",
            };
            write!(f, "{}{}", hop, segment.property)?;
        }
        Ok(())
    }
}

// ------------- Nodes -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Constant { value: String, value_type: ValueType },
    Operator { operator: Operator, left: Box<Node>, right: Box<Node> },
    FunctionCall { name: String, args: Vec<Node> },
    ControlCall { control: Control, args: Vec<Node> },
    Path(Path),
}

/// A parsed expression. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub(crate) fn new<S: Into<String>>(source: S, root: Node) -> Self {
        Self { source: source.into(), root }
    }
    pub fn source(&self) -> &str {
        &self.source
    }
    pub fn root(&self) -> &Node {
        &self.root
    }
    pub fn is_path(&self) -> bool {
        matches!(self.root, Node::Path(_))
    }
    pub fn get_path(&self) -> Option<&Path> {
        match &self.root {
            Node::Path(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
