use std::cell::OnceCell;
use std::collections::HashMap;

use tracing::debug;

use super::FacetContext;
use crate::datatype::ValueType;
use crate::error::Result;
use crate::expression::{Expression, ValueCollection};
use crate::set::{KeyHasher, Set};

#[derive(Debug, Default)]
struct Maps {
    item_to_value: HashMap<String, Set, KeyHasher>,
    value_to_item: HashMap<String, Set, KeyHasher>,
    missing_items: Set,
    value_type: ValueType,
}

/// Value <-> item maps of one facet expression over the collection's root
/// items. Path expressions walk the store directly; anything else goes
/// through maps built on first use and kept until the root items change.
#[derive(Debug, Default)]
pub struct FacetCache {
    maps: OnceCell<Maps>,
}

impl FacetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.maps.take();
    }

    fn maps(&self, ctx: &FacetContext, expression: &Expression) -> Result<&Maps> {
        if let Some(maps) = self.maps.get() {
            return Ok(maps);
        }
        let mut maps = Maps { value_type: ValueType::Text, ..Maps::default() };
        for item in ctx.all_items.iter() {
            let results = expression.evaluate_on_item(item, ctx.database)?;
            if results.size() > 0 {
                maps.value_type = results.value_type.clone();
                for value in results.iter() {
                    maps.item_to_value.entry(item.to_string()).or_default().add(value);
                    maps.value_to_item.entry(value.to_string()).or_default().add(item);
                }
            } else {
                maps.missing_items.add(item);
            }
        }
        debug!(expression = %expression, values = maps.value_to_item.len(), missing = maps.missing_items.size(), "facet maps built");
        Ok(self.maps.get_or_init(|| maps))
    }

    /// Items among `filter` holding any of `values`.
    pub fn items_from_values(
        &self,
        ctx: &FacetContext,
        expression: &Expression,
        values: &Set,
        filter: &Set,
    ) -> Result<Set> {
        if let Some(path) = expression.get_path() {
            let values = ValueCollection::set(values.clone(), ValueType::Text);
            return Ok(path.walk_backward(values, Some(filter), ctx.database)?.into_set());
        }
        let maps = self.maps(ctx, expression)?;
        let mut set = Set::new();
        for value in values.iter() {
            if let Some(items) = maps.value_to_item.get(value) {
                for item in items.iter() {
                    if filter.contains(item) {
                        set.add(item);
                    }
                }
            }
        }
        Ok(set)
    }

    /// Adds the items of `filter` that have no value to `results`.
    pub fn items_missing_value(
        &self,
        ctx: &FacetContext,
        expression: &Expression,
        filter: &Set,
        results: Option<Set>,
    ) -> Result<Set> {
        let maps = self.maps(ctx, expression)?;
        let mut results = results.unwrap_or_default();
        for item in filter.iter() {
            if maps.missing_items.contains(item) {
                results.add(item);
            }
        }
        Ok(results)
    }

    /// Every value held by `items` with the number of those items holding it.
    pub fn value_counts_from_items(
        &self,
        ctx: &FacetContext,
        expression: &Expression,
        items: &Set,
    ) -> Result<(Vec<(String, usize)>, ValueType)> {
        if let Some(path) = expression.get_path() {
            let values = path.walk_forward(ValueCollection::set(items.clone(), ValueType::Item), ctx.database)?;
            let mut entries = Vec::with_capacity(values.size());
            for value in values.iter() {
                let holders = path.evaluate_backward(value, values.value_type.clone(), Some(items), ctx.database)?;
                entries.push((value.to_string(), holders.size()));
            }
            return Ok((entries, values.value_type));
        }
        let maps = self.maps(ctx, expression)?;
        let mut entries = Vec::new();
        for (value, holders) in &maps.value_to_item {
            let count = holders.iter().filter(|item| items.contains(item)).count();
            if count > 0 {
                entries.push((value.clone(), count));
            }
        }
        Ok((entries, maps.value_type.clone()))
    }

    pub fn values_from_items(&self, ctx: &FacetContext, expression: &Expression, items: &Set) -> Result<Set> {
        if let Some(path) = expression.get_path() {
            let values = path.walk_forward(ValueCollection::set(items.clone(), ValueType::Item), ctx.database)?;
            return Ok(values.into_set());
        }
        let maps = self.maps(ctx, expression)?;
        let mut set = Set::new();
        for item in items.iter() {
            if let Some(values) = maps.item_to_value.get(item) {
                set.add_set(values);
            }
        }
        Ok(set)
    }

    pub fn count_items_missing_value(&self, ctx: &FacetContext, expression: &Expression, items: &Set) -> Result<usize> {
        let maps = self.maps(ctx, expression)?;
        Ok(items.iter().filter(|item| maps.missing_items.contains(item)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::expression::parse;
    use serde_json::json;

    fn database() -> Database {
        let mut database = Database::new();
        database
            .load_data(
                &json!({
                    "items": [
                        { "label": "a", "color": "red", "size": 1 },
                        { "label": "b", "color": ["red", "blue"], "size": 2 },
                        { "label": "c", "size": 3 }
                    ]
                }),
                "http://example.org/",
            )
            .unwrap();
        database
    }

    #[test]
    fn path_and_mapped_expressions_agree() {
        let database = database();
        let all = database.get_all_items();
        let ctx = FacetContext { database: &database, all_items: &all };
        let cache = FacetCache::new();
        let path = parse(".color").unwrap();
        let computed = parse("concat(.color)").unwrap();
        let red: Set = ["red"].into_iter().collect();
        for expression in [&path, &computed] {
            let items = cache.items_from_values(&ctx, expression, &red, &all).unwrap();
            assert_eq!(items.to_sorted_vec(), vec!["a", "b"]);
            let (mut counts, _) = cache.value_counts_from_items(&ctx, expression, &all).unwrap();
            counts.sort();
            assert_eq!(counts, vec![("blue".to_string(), 1), ("red".to_string(), 2)]);
            assert_eq!(cache.values_from_items(&ctx, expression, &all).unwrap().size(), 2);
        }
        assert_eq!(cache.count_items_missing_value(&ctx, &computed, &all).unwrap(), 1);
        let missing = cache.items_missing_value(&ctx, &computed, &all, None).unwrap();
        assert_eq!(missing.to_sorted_vec(), vec!["c"]);
    }
}
