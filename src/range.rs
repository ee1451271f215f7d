//! Sorted value indexes supporting range queries.
//!
//! A [`RangeIndex`] is built once from a set of items and a getter that
//! yields the comparable values of each item. It is immutable afterwards;
//! owners drop and rebuild it when the underlying statements change.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::datatype::{format_number, parse_number};
use crate::set::Set;

// ------------- RangeValue -------------
/// A comparable value. Numbers order before text.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeValue {
    Number(f64),
    Text(String),
}

impl RangeValue {
    /// Numbers when the whole text is numeric, text otherwise.
    pub fn from_text(s: &str) -> Self {
        match parse_number(s) {
            Some(n) => RangeValue::Number(n),
            None => RangeValue::Text(s.to_string()),
        }
    }
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RangeValue::Number(n) => Some(*n),
            RangeValue::Text(_) => None,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RangeValue::Number(_) => None,
            RangeValue::Text(s) => Some(s),
        }
    }
}

impl Ord for RangeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RangeValue::Number(a), RangeValue::Number(b)) => a.total_cmp(b),
            (RangeValue::Number(_), RangeValue::Text(_)) => Ordering::Less,
            (RangeValue::Text(_), RangeValue::Number(_)) => Ordering::Greater,
            (RangeValue::Text(a), RangeValue::Text(b)) => a.cmp(b),
        }
    }
}
impl PartialOrd for RangeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for RangeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for RangeValue {}

impl From<f64> for RangeValue {
    fn from(n: f64) -> Self {
        RangeValue::Number(n)
    }
}
impl From<&str> for RangeValue {
    fn from(s: &str) -> Self {
        RangeValue::Text(s.to_string())
    }
}
impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RangeValue::Number(n) => write!(f, "{}", format_number(*n)),
            RangeValue::Text(s) => write!(f, "{}", s),
        }
    }
}

// ------------- RangeIndex -------------
#[derive(Clone, Debug, PartialEq)]
pub struct RangePair {
    pub item: String,
    pub value: RangeValue,
}

#[derive(Clone, Debug, Default)]
pub struct RangeIndex {
    pairs: Vec<RangePair>,
}

impl RangeIndex {
    pub fn new<F>(items: &Set, mut getter: F) -> Self
    where
        F: FnMut(&str) -> Vec<RangeValue>,
    {
        let mut pairs = Vec::new();
        for item in items.iter() {
            for value in getter(item) {
                pairs.push(RangePair { item: item.to_string(), value });
            }
        }
        pairs.sort_by(|a, b| a.value.cmp(&b.value).then_with(|| a.item.cmp(&b.item)));
        Self { pairs }
    }
    pub fn pairs(&self) -> &[RangePair] {
        &self.pairs
    }
    pub fn count(&self) -> usize {
        self.pairs.len()
    }
    pub fn min(&self) -> Option<&RangeValue> {
        self.pairs.first().map(|p| &p.value)
    }
    pub fn max(&self) -> Option<&RangeValue> {
        self.pairs.last().map(|p| &p.value)
    }
    /// Visits the items whose value lies in `[min, max)`, or `[min, max]`
    /// when `inclusive`.
    pub fn get_range<F: FnMut(&str)>(&self, mut visitor: F, min: &RangeValue, max: &RangeValue, inclusive: bool) {
        let start = self.index_of(min);
        for pair in &self.pairs[start..] {
            if pair.value < *max || (inclusive && pair.value == *max) {
                visitor(&pair.item);
            } else {
                break;
            }
        }
    }
    pub fn get_subjects_in_range(
        &self,
        min: &RangeValue,
        max: &RangeValue,
        inclusive: bool,
        set: Option<Set>,
        filter: Option<&Set>,
    ) -> Set {
        let mut set = set.unwrap_or_default();
        self.get_range(
            |item| {
                if filter.is_none_or(|f| f.contains(item)) {
                    set.add(item);
                }
            },
            min,
            max,
            inclusive,
        );
        set
    }
    /// Number of pairs (not distinct items) in the range.
    pub fn count_range(&self, min: &RangeValue, max: &RangeValue, inclusive: bool) -> usize {
        let start = self.index_of(min);
        let mut end = self.index_of(max);
        if inclusive {
            while end < self.pairs.len() && self.pairs[end].value == *max {
                end += 1;
            }
        }
        end.saturating_sub(start)
    }
    /// Lower bound: the first position whose value is not less than `v`.
    pub(crate) fn index_of(&self, v: &RangeValue) -> usize {
        self.pairs.partition_point(|pair| pair.value < *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(values: &[f64]) -> RangeIndex {
        let items: Set = (0..values.len()).map(|i| format!("i{}", i)).collect();
        RangeIndex::new(&items, |item| {
            let i: usize = item[1..].parse().unwrap();
            vec![RangeValue::Number(values[i])]
        })
    }

    #[test]
    fn sorted_at_construction() {
        let index = index(&[3., 1., 4., 1., 5., 9., 2., 6.]);
        let values: Vec<f64> = index.pairs().iter().map(|p| p.value.as_number().unwrap()).collect();
        assert_eq!(values, vec![1., 1., 2., 3., 4., 5., 6., 9.]);
        assert_eq!(index.min(), Some(&RangeValue::Number(1.)));
        assert_eq!(index.max(), Some(&RangeValue::Number(9.)));
    }

    #[test]
    fn lower_bound_lookup() {
        let index = index(&[3., 1., 4., 1., 5.]);
        assert_eq!(index.index_of(&1.0.into()), 0);
        assert_eq!(index.index_of(&2.0.into()), 2);
        assert_eq!(index.index_of(&10.0.into()), 5);
    }

    #[test]
    fn half_open_and_inclusive_ranges() {
        let index = index(&[3., 1., 4., 1., 5., 9., 2., 6.]);
        let exclusive = index.get_subjects_in_range(&2.0.into(), &6.0.into(), false, None, None);
        let inclusive = index.get_subjects_in_range(&2.0.into(), &6.0.into(), true, None, None);
        assert_eq!(exclusive.to_sorted_vec(), vec!["i0", "i2", "i4", "i6"]);
        assert_eq!(inclusive.to_sorted_vec(), vec!["i0", "i2", "i4", "i6", "i7"]);
        assert_eq!(index.count_range(&2.0.into(), &6.0.into(), true), inclusive.size());
        assert_eq!(index.count_range(&2.0.into(), &6.0.into(), false), exclusive.size());
    }

    #[test]
    fn numbers_sort_before_text() {
        assert!(RangeValue::Number(1e9) < RangeValue::from("A"));
        assert_eq!(RangeValue::from_text("12"), RangeValue::Number(12.));
        assert_eq!(RangeValue::from_text("12b"), RangeValue::Text("12b".into()));
    }
}
