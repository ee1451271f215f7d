use std::str::FromStr;

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use super::ast::{Control, Expression, Node, Operator, Path, Segment};
use crate::datatype::{format_number, parse_float, ValueType};
use crate::error::{ExhibitError, Result};

#[derive(Parser)]
#[grammar = "expression.pest"]
struct ExpressionGrammar;

impl From<pest::error::Error<Rule>> for ExhibitError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        let (line, col) = match e.line_col {
            LineColLocation::Pos(position) => position,
            LineColLocation::Span(start, _) => start,
        };
        ExhibitError::Parse { message: e.variant.message().to_string(), line: Some(line), col: Some(col) }
    }
}

/// Parses a whole string as one expression. Trailing input is an error.
pub fn parse(s: &str) -> Result<Expression> {
    let mut pairs = ExpressionGrammar::parse(Rule::single, s)?;
    let single = pairs.next().ok_or_else(|| ExhibitError::parse("empty input"))?;
    let expression = first_expression(single)?;
    Ok(Expression::new(expression.as_str(), build(expression)?))
}

/// Parses the longest expression starting at byte offset `start` and
/// returns it with the offset just past it.
pub fn parse_prefix(s: &str, start: usize) -> Result<(Expression, usize)> {
    let rest = s
        .get(start..)
        .ok_or_else(|| ExhibitError::parse(format!("offset {} is outside the input", start)))?;
    let mut pairs = ExpressionGrammar::parse(Rule::prefix, rest)?;
    let prefix = pairs.next().ok_or_else(|| ExhibitError::parse("empty input"))?;
    let expression = first_expression(prefix)?;
    let end = start + expression.as_span().end();
    Ok((Expression::new(expression.as_str(), build(expression)?), end))
}

/// Parses a comma separated list of expressions.
pub fn parse_several(s: &str) -> Result<Vec<Expression>> {
    let mut pairs = ExpressionGrammar::parse(Rule::several, s)?;
    let several = pairs.next().ok_or_else(|| ExhibitError::parse("empty input"))?;
    several
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::expression)
        .map(|pair| Ok(Expression::new(pair.as_str(), build(pair)?)))
        .collect()
}

fn first_expression(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>> {
    pair.into_inner()
        .find(|inner| inner.as_rule() == Rule::expression)
        .ok_or_else(|| ExhibitError::parse("no expression found"))
}

fn build(pair: Pair<Rule>) -> Result<Node> {
    match pair.as_rule() {
        Rule::expression | Rule::sub_expression | Rule::term => build_binary(pair),
        Rule::number => Ok(Node::Constant {
            value: format_number(parse_float(pair.as_str())),
            value_type: ValueType::Number,
        }),
        Rule::string => {
            // content is kept raw, escapes included
            let value = pair.into_inner().next().map(|inner| inner.as_str().to_string()).unwrap_or_default();
            Ok(Node::Constant { value, value_type: ValueType::Text })
        }
        Rule::call => build_call(pair),
        Rule::rooted_path => {
            let mut inner = pair.into_inner();
            let root = inner.next().map(|identifier| identifier.as_str().to_string());
            Ok(Node::Path(Path::new(root, build_segments(inner))))
        }
        Rule::path => Ok(Node::Path(Path::new(None, build_segments(pair.into_inner())))),
        other => Err(ExhibitError::Invariant(format!("unexpected grammar rule {:?}", other))),
    }
}

// expression, sub_expression and term all read `operand (operator operand)*`
fn build_binary(pair: Pair<Rule>) -> Result<Node> {
    let mut inner = pair.into_inner();
    let first = inner.next().ok_or_else(|| ExhibitError::parse("missing operand"))?;
    let mut left = build(first)?;
    while let Some(operator) = inner.next() {
        let operator = Operator::from_str(operator.as_str())?;
        let right = inner
            .next()
            .ok_or_else(|| ExhibitError::parse(format!("missing operand after {}", operator.as_str())))?;
        left = Node::Operator { operator, left: Box::new(left), right: Box::new(build(right)?) };
    }
    Ok(left)
}

fn build_call(pair: Pair<Rule>) -> Result<Node> {
    let mut inner = pair.into_inner();
    let name = inner.next().map(|identifier| identifier.as_str().to_string()).unwrap_or_default();
    let args = match inner.next() {
        Some(arguments) => arguments.into_inner().map(build).collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok(match Control::from_name(&name) {
        Some(control) => Node::ControlCall { control, args },
        None => Node::FunctionCall { name, args },
    })
}

fn build_segments(hops: pest::iterators::Pairs<Rule>) -> Vec<Segment> {
    hops.filter(|hop| hop.as_rule() == Rule::hop)
        .map(|hop| {
            let mut operator = "";
            let mut property = String::new();
            let mut marked = false;
            for part in hop.into_inner() {
                match part.as_rule() {
                    Rule::hop_operator => operator = part.as_str(),
                    Rule::property => property = part.as_str().to_string(),
                    Rule::array_marker => marked = true,
                    _ => {}
                }
            }
            Segment { property, forward: operator.starts_with('.'), is_array: marked || operator.ends_with('@') }
        })
        .collect()
}
