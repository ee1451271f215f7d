use super::{state_mismatch, Facet, FacetContext, FacetState};
use crate::datatype::ValueType;
use crate::error::Result;
use crate::expression::{Expression, ValueCollection};
use crate::set::Set;

/// The facet a restricting collection places on its base. It lets through
/// the base items whose expression values are among the derived
/// collection's restricted items, and remembers the items the base offered
/// it so the derived collection can take their values as its own root.
#[derive(Debug)]
pub struct CollectionFacet {
    id: String,
    expression: Expression,
    candidates: Set,
    restriction: Option<Set>,
}

impl CollectionFacet {
    pub fn new(id: &str, expression: Expression) -> Self {
        Self { id: id.to_string(), expression, candidates: Set::new(), restriction: None }
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Items the base collection last handed over in `update`.
    pub fn candidates(&self) -> &Set {
        &self.candidates
    }

    /// `None` lifts the restriction.
    pub fn set_restriction(&mut self, restriction: Option<Set>) -> bool {
        let changed = restriction != self.restriction;
        self.restriction = restriction;
        changed
    }

    /// Values of the expression over `items`.
    pub fn values_of(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        if let Some(path) = self.expression.get_path() {
            let values = path.walk_forward(ValueCollection::set(items.clone(), ValueType::Item), ctx.database)?;
            return Ok(values.into_set());
        }
        let mut set = Set::new();
        for item in items.iter() {
            for value in self.expression.evaluate_on_item(item, ctx.database)?.iter() {
                set.add(value);
            }
        }
        Ok(set)
    }
}

impl Facet for CollectionFacet {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_restrictions(&self) -> bool {
        self.restriction.is_some()
    }

    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        let Some(restriction) = &self.restriction else {
            return Ok(items.clone());
        };
        if let Some(path) = self.expression.get_path() {
            let values = ValueCollection::set(restriction.clone(), ValueType::Item);
            return Ok(path.walk_backward(values, Some(items), ctx.database)?.into_set());
        }
        let mut set = Set::new();
        for item in items.iter() {
            let values = self.expression.evaluate_on_item(item, ctx.database)?;
            if values.iter().any(|value| restriction.contains(value)) {
                set.add(item);
            }
        }
        Ok(set)
    }

    fn update(&mut self, _ctx: &FacetContext, items: &Set) -> Result<()> {
        self.candidates = items.clone();
        Ok(())
    }

    fn clear_all_restrictions(&mut self) -> FacetState {
        let state = self.export_state();
        self.restriction = None;
        state
    }

    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()> {
        match state {
            FacetState::List { selection, .. } => {
                self.restriction = Some(selection.iter().map(String::as_str).collect());
                Ok(())
            }
            other => Err(state_mismatch(&self.id, other)),
        }
    }

    fn export_state(&self) -> FacetState {
        let selection = self.restriction.as_ref().map(Set::to_sorted_vec).unwrap_or_default();
        FacetState::List { selection, select_missing: false }
    }

    fn export_empty_state(&self) -> FacetState {
        FacetState::List { selection: Vec::new(), select_missing: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::expression::parse;
    use serde_json::json;

    #[test]
    fn restricts_base_items_by_expression_values() {
        let mut database = Database::new();
        database
            .load_data(
                &json!({
                    "properties": { "author": { "valueType": "item" } },
                    "items": [
                        { "label": "Emma", "author": "Austen" },
                        { "label": "Persuasion", "author": "Austen" },
                        { "label": "Dracula", "author": "Stoker" },
                        { "label": "Austen" },
                        { "label": "Stoker" }
                    ]
                }),
                "http://example.org/",
            )
            .unwrap();
        let books: Set = ["Emma", "Persuasion", "Dracula"].into_iter().collect();
        let ctx = FacetContext { database: &database, all_items: &books };
        for source in [".author", "concat(.author)"] {
            let mut facet = CollectionFacet::new("authors", parse(source).unwrap());
            facet.update(&ctx, &books).unwrap();
            assert_eq!(facet.values_of(&ctx, facet.candidates()).unwrap().to_sorted_vec(), vec!["Austen", "Stoker"]);
            assert_eq!(facet.restrict(&ctx, &books).unwrap(), books);
            assert!(facet.set_restriction(Some(["Stoker"].into_iter().collect())));
            assert_eq!(facet.restrict(&ctx, &books).unwrap().to_sorted_vec(), vec!["Dracula"]);
            assert!(facet.set_restriction(Some(Set::new())));
            assert!(facet.restrict(&ctx, &books).unwrap().is_empty());
        }
    }
}
