use tracing::debug;

use super::{
    state_mismatch, value_label, EntryOrder, Facet, FacetCache, FacetConfig, FacetContext, FacetEntry, FacetState,
};
use crate::datatype::ValueType;
use crate::error::Result;
use crate::expression::Expression;
use crate::set::Set;

/// Restricts to items whose expression value is selected, optionally
/// together with the items that have no value at all.
#[derive(Debug)]
pub struct ListFacet {
    id: String,
    label: String,
    expression: Option<Expression>,
    order: EntryOrder,
    show_missing: bool,
    missing_label: String,
    value_set: Set,
    select_missing: bool,
    cache: FacetCache,
    entries: Vec<FacetEntry>,
    value_type: ValueType,
}

impl ListFacet {
    pub fn new(id: &str, expression: Option<Expression>) -> Self {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            expression,
            order: EntryOrder::default(),
            show_missing: true,
            missing_label: "(missing this field)".to_string(),
            value_set: Set::new(),
            select_missing: false,
            cache: FacetCache::new(),
            entries: Vec::new(),
            value_type: ValueType::Text,
        }
    }

    pub fn from_config(id: &str, config: &FacetConfig) -> Self {
        let mut facet = Self::new(id, config.parsed_expression(id));
        facet.label = config.facet_label.clone().unwrap_or_else(|| id.to_string());
        facet.order = config.order();
        facet.show_missing = config.show_missing.unwrap_or(true);
        if let Some(missing_label) = &config.missing_label {
            facet.missing_label = missing_label.clone();
        }
        facet
    }

    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn expression(&self) -> Option<&Expression> {
        self.expression.as_ref()
    }
    pub fn selection(&self) -> &Set {
        &self.value_set
    }
    pub fn select_missing(&self) -> bool {
        self.select_missing
    }
    /// Entries computed by the last `update`, missing-value entry first.
    pub fn entries(&self) -> &[FacetEntry] {
        &self.entries
    }
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Replaces the selection, reporting whether it changed.
    pub fn set_selection<I, K>(&mut self, values: I, select_missing: bool) -> bool
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let value_set: Set = values.into_iter().collect();
        let changed = value_set != self.value_set || select_missing != self.select_missing;
        self.value_set = value_set;
        self.select_missing = select_missing;
        changed
    }

    /// Clicking a value. `None` is the missing-value entry. With
    /// `select_only` the value becomes the whole selection, unless it
    /// already was, in which case the selection empties.
    pub fn toggle(&mut self, value: Option<&str>, select_only: bool) -> bool {
        let old_values = self.value_set.clone();
        let old_missing = self.select_missing;
        let (new_values, new_missing) = match value {
            None => {
                if select_only {
                    let missing = if old_values.is_empty() { !old_missing } else { true };
                    (Set::new(), missing)
                } else {
                    (old_values, !old_missing)
                }
            }
            Some(value) => {
                if select_only {
                    let mut values = Set::new();
                    if !old_values.contains(value) || old_values.size() > 1 || old_missing {
                        values.add(value);
                    }
                    (values, false)
                } else {
                    let mut values = old_values;
                    if !values.remove(value) {
                        values.add(value);
                    }
                    (values, old_missing)
                }
            }
        };
        debug!(facet = %self.id, ?value, select_only, "list facet toggled");
        self.set_selection(new_values.iter(), new_missing)
    }

    pub(crate) fn compute_entries(&mut self, ctx: &FacetContext, items: &Set) -> Result<()> {
        let Some(expression) = &self.expression else {
            self.entries.clear();
            return Ok(());
        };
        let (counts, value_type) = self.cache.value_counts_from_items(ctx, expression, items)?;
        let mut entries: Vec<FacetEntry> = counts
            .into_iter()
            .map(|(value, count)| FacetEntry {
                label: value_label(ctx.database, &value, &value_type),
                selected: self.value_set.contains(&value),
                value: Some(value),
                count,
            })
            .collect();
        self.order.sort(&mut entries, &value_type);
        if self.show_missing || self.select_missing {
            let count = self.cache.count_items_missing_value(ctx, expression, items)?;
            if count > 0 || self.select_missing {
                entries.insert(
                    0,
                    FacetEntry {
                        value: None,
                        label: self.missing_label.clone(),
                        count,
                        selected: self.select_missing,
                    },
                );
            }
        }
        self.entries = entries;
        self.value_type = value_type;
        Ok(())
    }
}

impl Facet for ListFacet {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_restrictions(&self) -> bool {
        self.value_set.size() > 0 || self.select_missing
    }

    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        let Some(expression) = &self.expression else {
            return Ok(items.clone());
        };
        if !self.has_restrictions() {
            return Ok(items.clone());
        }
        let set = self.cache.items_from_values(ctx, expression, &self.value_set, items)?;
        if self.select_missing {
            return self.cache.items_missing_value(ctx, expression, items, Some(set));
        }
        Ok(set)
    }

    fn update(&mut self, ctx: &FacetContext, items: &Set) -> Result<()> {
        self.compute_entries(ctx, items)
    }

    fn clear_all_restrictions(&mut self) -> FacetState {
        let state = self.export_state();
        self.value_set = Set::new();
        self.select_missing = false;
        state
    }

    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()> {
        match state {
            FacetState::List { selection, select_missing } => {
                self.set_selection(selection.iter().map(String::as_str), *select_missing);
                Ok(())
            }
            other => Err(state_mismatch(&self.id, other)),
        }
    }

    fn export_state(&self) -> FacetState {
        FacetState::List { selection: self.value_set.to_sorted_vec(), select_missing: self.select_missing }
    }

    fn export_empty_state(&self) -> FacetState {
        FacetState::List { selection: Vec::new(), select_missing: false }
    }

    fn state_differs(&self, state: &FacetState) -> bool {
        match state {
            FacetState::List { selection, select_missing } => {
                *select_missing != self.select_missing
                    || selection.len() != self.value_set.size()
                    || selection.iter().any(|value| !self.value_set.contains(value))
            }
            _ => true,
        }
    }

    fn on_root_items_changed(&mut self) {
        self.cache.invalidate();
    }
}
