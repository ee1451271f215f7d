//! Numeric and alphabetical range facets. Both bucket the observed values
//! at `update` time and restrict to the union of the selected buckets,
//! upper bounds excluded.

use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::{state_mismatch, Facet, FacetConfig, FacetContext, FacetState, RangeSelection};
use crate::datatype::{format_number, parse_float};
use crate::error::{ExhibitError, Result};
use crate::expression::Expression;
use crate::range::{RangeIndex, RangeValue};
use crate::set::Set;
use crate::settings::Settings;

/// One bucket as displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeEntry {
    pub from: RangeValue,
    pub to: RangeValue,
    pub label: String,
    pub count: usize,
    pub selected: bool,
}

// Evaluates the expression on every root item up front so evaluation
// errors surface before the index is built.
fn build_local_index<F>(ctx: &FacetContext, expression: &Expression, convert: F) -> Result<RangeIndex>
where
    F: Fn(&str) -> Option<RangeValue>,
{
    let mut values: HashMap<&str, Vec<RangeValue>> = HashMap::new();
    for item in ctx.all_items.iter() {
        let results = expression.evaluate_on_item(item, ctx.database)?;
        values.insert(item, results.iter().filter_map(&convert).collect());
    }
    Ok(RangeIndex::new(ctx.all_items, |item| values.remove(item).unwrap_or_default()))
}

fn local_index<'a, F>(
    cell: &'a OnceCell<RangeIndex>,
    ctx: &FacetContext,
    expression: &Expression,
    convert: F,
) -> Result<&'a RangeIndex>
where
    F: Fn(&str) -> Option<RangeValue>,
{
    if let Some(index) = cell.get() {
        return Ok(index);
    }
    let index = build_local_index(ctx, expression, convert)?;
    debug!(expression = %expression, pairs = index.count(), "facet range index built");
    Ok(cell.get_or_init(|| index))
}

fn toggle_selection(ranges: &mut Vec<RangeSelection>, selection: RangeSelection, select_only: bool) -> bool {
    let was_selected = ranges.contains(&selection);
    let next = if was_selected {
        if select_only && ranges.len() > 1 {
            vec![selection]
        } else {
            ranges.iter().filter(|range| **range != selection).cloned().collect()
        }
    } else if select_only {
        vec![selection]
    } else {
        let mut next = ranges.clone();
        next.push(selection);
        next
    };
    let changed = next != *ranges;
    *ranges = next;
    changed
}

fn sorted(ranges: &[RangeSelection]) -> Vec<RangeSelection> {
    let mut ranges = ranges.to_vec();
    ranges.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.to.cmp(&b.to)));
    ranges
}

// ------------- Numeric -------------
#[derive(Debug)]
pub struct NumericRangeFacet {
    id: String,
    label: String,
    expression: Option<Expression>,
    interval: f64,
    ranges: Vec<RangeSelection>,
    range_index: OnceCell<RangeIndex>,
    entries: Vec<RangeEntry>,
}

// Bucket count above which a numeric facet refuses to render.
const MAX_BUCKETS: usize = 1_000;

fn numeric(value: &str) -> Option<RangeValue> {
    let n = parse_float(value);
    (!n.is_nan()).then_some(RangeValue::Number(n))
}

impl NumericRangeFacet {
    pub fn new(id: &str, expression: Option<Expression>, interval: f64) -> Self {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            expression,
            interval,
            ranges: Vec::new(),
            range_index: OnceCell::new(),
            entries: Vec::new(),
        }
    }

    pub fn from_config(id: &str, config: &FacetConfig, settings: &Settings) -> Self {
        let interval = config.interval.filter(|i| i.is_finite() && *i > 0.0).unwrap_or(settings.numeric_interval);
        let mut facet = Self::new(id, config.parsed_expression(id), interval);
        facet.label = config.facet_label.clone().unwrap_or_else(|| id.to_string());
        facet
    }

    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn interval(&self) -> f64 {
        self.interval
    }
    pub fn ranges(&self) -> &[RangeSelection] {
        &self.ranges
    }
    pub fn entries(&self) -> &[RangeEntry] {
        &self.entries
    }

    pub fn toggle_range(&mut self, from: f64, to: f64, select_only: bool) -> bool {
        let selection = RangeSelection { from: RangeValue::Number(from), to: RangeValue::Number(to) };
        toggle_selection(&mut self.ranges, selection, select_only)
    }

    /// Selects or deselects one range without touching the others.
    pub fn set_range(&mut self, from: f64, to: f64, selected: bool) -> bool {
        let selection = RangeSelection { from: RangeValue::Number(from), to: RangeValue::Number(to) };
        match (selected, self.ranges.contains(&selection)) {
            (true, false) => {
                self.ranges.push(selection);
                true
            }
            (false, true) => {
                self.ranges.retain(|range| *range != selection);
                true
            }
            _ => false,
        }
    }

    fn count(&self, ctx: &FacetContext, expression: &Expression, from: f64, to: f64, items: &Set) -> Result<usize> {
        let (from, to) = (RangeValue::Number(from), RangeValue::Number(to));
        match expression.get_path() {
            Some(path) => Ok(path.range_backward(&from, &to, false, Some(items), ctx.database)?.size()),
            None => {
                let index = local_index(&self.range_index, ctx, expression, numeric)?;
                Ok(index.get_subjects_in_range(&from, &to, false, None, Some(items)).size())
            }
        }
    }

    fn bounds(&self, ctx: &FacetContext, expression: &Expression) -> Result<Option<(f64, f64)>> {
        let index = match expression.get_path() {
            Some(path) => {
                let property = path.last_segment().and_then(|segment| ctx.database.get_property(&segment.property));
                match property.and_then(|property| property.get_range_index(ctx.database)) {
                    Some(index) => index,
                    None => return Ok(None),
                }
            }
            None => local_index(&self.range_index, ctx, expression, numeric)?,
        };
        Ok(match (index.min().and_then(RangeValue::as_number), index.max().and_then(RangeValue::as_number)) {
            (Some(min), Some(max)) if index.count() > 0 => Some((min, max)),
            _ => None,
        })
    }
}

impl Facet for NumericRangeFacet {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_restrictions(&self) -> bool {
        !self.ranges.is_empty()
    }

    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        let Some(expression) = &self.expression else {
            return Ok(items.clone());
        };
        if !self.has_restrictions() {
            return Ok(items.clone());
        }
        let mut set = Set::new();
        match expression.get_path() {
            Some(path) => {
                for range in &self.ranges {
                    set.add_set(&path.range_backward(&range.from, &range.to, false, Some(items), ctx.database)?.into_set());
                }
            }
            None => {
                let index = local_index(&self.range_index, ctx, expression, numeric)?;
                for range in &self.ranges {
                    set = index.get_subjects_in_range(&range.from, &range.to, false, Some(set), Some(items));
                }
            }
        }
        Ok(set)
    }

    fn update(&mut self, ctx: &FacetContext, items: &Set) -> Result<()> {
        self.entries.clear();
        let Some(expression) = &self.expression else {
            return Ok(());
        };
        let Some((min, max)) = self.bounds(ctx, expression)? else {
            return Ok(());
        };
        let interval = self.interval;
        let low = (min / interval).floor() * interval;
        let mut high = (max / interval).ceil() * interval;
        // the largest value must fall inside a half-open bucket
        if high <= max {
            high += interval;
        }
        let span = ((high - low) / interval).round();
        if !(span.is_finite() && span <= MAX_BUCKETS as f64) {
            return Err(ExhibitError::Evaluation(format!(
                "facet {} would need {} buckets of {} between {} and {}",
                self.id, span, format_number(interval), format_number(min), format_number(max)
            )));
        }
        let buckets = span as usize;
        let mut entries = Vec::with_capacity(buckets);
        for k in 0..buckets {
            let from = low + k as f64 * interval;
            let to = from + interval;
            let count = self.count(ctx, expression, from, to, items)?;
            let (from, to) = (RangeValue::Number(from), RangeValue::Number(to));
            let selected = self.ranges.iter().any(|range| range.from == from && range.to == to);
            entries.push(RangeEntry { label: format!("{} - {}", from, to), from, to, count, selected });
        }
        self.entries = entries;
        Ok(())
    }

    fn clear_all_restrictions(&mut self) -> FacetState {
        let state = self.export_state();
        self.ranges.clear();
        state
    }

    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()> {
        match state {
            FacetState::Range { ranges } => {
                self.ranges = ranges.clone();
                Ok(())
            }
            other => Err(state_mismatch(&self.id, other)),
        }
    }

    fn export_state(&self) -> FacetState {
        FacetState::Range { ranges: sorted(&self.ranges) }
    }

    fn export_empty_state(&self) -> FacetState {
        FacetState::Range { ranges: Vec::new() }
    }

    fn state_differs(&self, state: &FacetState) -> bool {
        match state {
            FacetState::Range { ranges } => sorted(ranges) != sorted(&self.ranges),
            _ => true,
        }
    }

    fn on_root_items_changed(&mut self) {
        self.range_index.take();
    }
}

// ------------- Alphabetical -------------
#[derive(Debug)]
pub struct AlphaRangeFacet {
    id: String,
    label: String,
    expression: Option<Expression>,
    interval: usize,
    ranges: Vec<RangeSelection>,
    range_index: OnceCell<RangeIndex>,
    entries: Vec<RangeEntry>,
}

fn upper_text(value: &str) -> Option<RangeValue> {
    Some(RangeValue::Text(value.to_uppercase()))
}

// The exclusive upper bound of a bucket ending at letter `to`.
fn after_letter(to: &RangeValue) -> RangeValue {
    let last = to.as_text().and_then(|text| text.chars().next());
    match last.and_then(|c| char::from_u32(c as u32 + 1)) {
        Some(next) => RangeValue::Text(next.to_string()),
        None => RangeValue::Text(char::MAX.to_string()),
    }
}

impl AlphaRangeFacet {
    pub fn new(id: &str, expression: Option<Expression>, interval: usize) -> Self {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            expression,
            interval: interval.max(1),
            ranges: Vec::new(),
            range_index: OnceCell::new(),
            entries: Vec::new(),
        }
    }

    pub fn from_config(id: &str, config: &FacetConfig, settings: &Settings) -> Self {
        let interval = config
            .interval
            .filter(|i| i.is_finite() && *i >= 1.0)
            .map(|i| i as usize)
            .unwrap_or(settings.alpha_interval);
        let mut facet = Self::new(id, config.parsed_expression(id), interval);
        facet.label = config.facet_label.clone().unwrap_or_else(|| id.to_string());
        facet
    }

    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn ranges(&self) -> &[RangeSelection] {
        &self.ranges
    }
    pub fn entries(&self) -> &[RangeEntry] {
        &self.entries
    }

    /// Toggles the bucket of first letters `from` through `to`.
    pub fn toggle_range(&mut self, from: &str, to: &str, select_only: bool) -> bool {
        let selection = RangeSelection {
            from: RangeValue::Text(from.to_uppercase()),
            to: RangeValue::Text(to.to_uppercase()),
        };
        toggle_selection(&mut self.ranges, selection, select_only)
    }
}

impl Facet for AlphaRangeFacet {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_restrictions(&self) -> bool {
        !self.ranges.is_empty()
    }

    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        let Some(expression) = &self.expression else {
            return Ok(items.clone());
        };
        if !self.has_restrictions() {
            return Ok(items.clone());
        }
        let index = local_index(&self.range_index, ctx, expression, upper_text)?;
        let mut set = Set::new();
        for range in &self.ranges {
            set = index.get_subjects_in_range(&range.from, &after_letter(&range.to), false, Some(set), Some(items));
        }
        Ok(set)
    }

    fn update(&mut self, ctx: &FacetContext, items: &Set) -> Result<()> {
        self.entries.clear();
        let Some(expression) = &self.expression else {
            return Ok(());
        };
        let index = local_index(&self.range_index, ctx, expression, upper_text)?;
        let letters: BTreeSet<char> = index
            .pairs()
            .iter()
            .filter_map(|pair| pair.value.as_text().and_then(|text| text.chars().next()))
            .collect();
        let letters: Vec<char> = letters.into_iter().collect();
        let mut entries = Vec::new();
        for chunk in letters.chunks(self.interval) {
            let (Some(first), Some(last)) = (chunk.first(), chunk.last()) else { continue };
            let from = RangeValue::Text(first.to_string());
            let to = RangeValue::Text(last.to_string());
            let count = index.get_subjects_in_range(&from, &after_letter(&to), false, None, Some(items)).size();
            let selected = self.ranges.iter().any(|range| range.from == from && range.to == to);
            let label = if first == last { first.to_string() } else { format!("{} - {}", first, last) };
            entries.push(RangeEntry { from, to, label, count, selected });
        }
        self.entries = entries;
        Ok(())
    }

    fn clear_all_restrictions(&mut self) -> FacetState {
        let state = self.export_state();
        self.ranges.clear();
        state
    }

    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()> {
        match state {
            FacetState::Range { ranges } => {
                self.ranges = ranges.clone();
                Ok(())
            }
            other => Err(state_mismatch(&self.id, other)),
        }
    }

    fn export_state(&self) -> FacetState {
        FacetState::Range { ranges: sorted(&self.ranges) }
    }

    fn export_empty_state(&self) -> FacetState {
        FacetState::Range { ranges: Vec::new() }
    }

    fn state_differs(&self, state: &FacetState) -> bool {
        match state {
            FacetState::Range { ranges } => sorted(ranges) != sorted(&self.ranges),
            _ => true,
        }
    }

    fn on_root_items_changed(&mut self) {
        self.range_index.take();
    }
}
