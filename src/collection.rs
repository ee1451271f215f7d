//! Collections: a root item set plus the facets that narrow it.
//!
//! A collection keeps two sets. Its *root* items come from the database
//! (all items, items of some types) or from another collection. Its
//! *restricted* items are what survives every facet, applied in the order
//! the facets were added. Whenever either changes, every facet is handed the
//! items it should count over, see [`Collection::update_facets`].

use std::fmt;

use tracing::{debug, trace};

use crate::database::Database;
use crate::error::{ExhibitError, Result};
use crate::expression::Expression;
use crate::facet::{Facet, FacetContext, FacetKind, FacetState};
use crate::set::Set;

#[derive(Debug)]
pub enum CollectionKind {
    AllItems,
    /// Items having one of these types.
    TypeBased(Set),
    /// Expression values over another collection's items. A restricting
    /// collection feeds its own restriction back into its base.
    Based { expression: Expression, base: String, restricting: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionEvent {
    RootItemsChanged,
    ItemsChanged,
}

pub type CollectionListener = Box<dyn FnMut(&CollectionEvent)>;

pub struct Collection {
    id: String,
    kind: CollectionKind,
    items: Set,
    restricted_items: Set,
    facets: Vec<FacetKind>,
    updating: bool,
    listeners: Vec<CollectionListener>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("items", &self.items.size())
            .field("restricted_items", &self.restricted_items.size())
            .field("facets", &self.facets.iter().map(|facet| facet.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl Collection {
    pub fn new(id: &str, kind: CollectionKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            items: Set::new(),
            restricted_items: Set::new(),
            facets: Vec::new(),
            updating: false,
            listeners: Vec::new(),
        }
    }

    pub fn all_items(id: &str) -> Self {
        Self::new(id, CollectionKind::AllItems)
    }

    pub fn type_based<I, K>(id: &str, types: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::new(id, CollectionKind::TypeBased(types.into_iter().collect()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn kind(&self) -> &CollectionKind {
        &self.kind
    }
    pub fn base(&self) -> Option<&str> {
        match &self.kind {
            CollectionKind::Based { base, .. } => Some(base),
            _ => None,
        }
    }
    pub fn is_restricting(&self) -> bool {
        matches!(self.kind, CollectionKind::Based { restricting: true, .. })
    }

    pub fn add_listener(&mut self, listener: CollectionListener) {
        self.listeners.push(listener);
    }
    fn fire(&mut self, event: CollectionEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    // ------------- items -------------
    pub fn get_all_items(&self) -> &Set {
        &self.items
    }
    pub fn count_all_items(&self) -> usize {
        self.items.size()
    }
    pub fn get_restricted_items(&self) -> &Set {
        &self.restricted_items
    }
    pub fn count_restricted_items(&self) -> usize {
        self.restricted_items.size()
    }
    /// True when any facet restricts.
    pub fn has_restrictions(&self) -> bool {
        self.facets.iter().any(|facet| facet.has_restrictions())
    }

    /// Recomputes the root items from the database. Collections based on
    /// another collection get theirs through [`Collection::set_based_items`].
    pub fn on_root_items_changed(&mut self, database: &Database) -> Result<()> {
        match &self.kind {
            CollectionKind::AllItems => self.items = database.get_all_items(),
            CollectionKind::TypeBased(types) => {
                self.items = database.get_subjects_union(types, "type", None, None);
            }
            CollectionKind::Based { .. } => {}
        }
        self.root_changed(database)
    }

    pub fn set_based_items(&mut self, database: &Database, items: Set) -> Result<()> {
        self.items = items;
        self.root_changed(database)
    }

    fn root_changed(&mut self, database: &Database) -> Result<()> {
        debug!(collection = %self.id, items = self.items.size(), "root items changed");
        for facet in self.facets.iter_mut() {
            facet.on_root_items_changed();
        }
        self.fire(CollectionEvent::RootItemsChanged);
        self.refresh(database)
    }

    fn refresh(&mut self, database: &Database) -> Result<()> {
        self.compute_restricted_items(database)?;
        self.update_facets(database)?;
        self.fire(CollectionEvent::ItemsChanged);
        Ok(())
    }

    // ------------- facets -------------
    pub fn facets(&self) -> &[FacetKind] {
        &self.facets
    }
    pub fn facet(&self, id: &str) -> Option<&FacetKind> {
        self.facets.iter().find(|facet| facet.id() == id)
    }

    pub fn add_facet(&mut self, database: &Database, mut facet: FacetKind) -> Result<()> {
        if self.facet(facet.id()).is_some() {
            return Err(ExhibitError::Data(format!("collection {} already has a facet {}", self.id, facet.id())));
        }
        if facet.has_restrictions() {
            self.facets.push(facet);
            self.refresh(database)
        } else {
            let ctx = FacetContext { database, all_items: &self.items };
            facet.update(&ctx, &self.restricted_items)?;
            self.facets.push(facet);
            Ok(())
        }
    }

    pub fn remove_facet(&mut self, database: &Database, id: &str) -> Result<Option<FacetKind>> {
        let Some(position) = self.facets.iter().position(|facet| facet.id() == id) else {
            return Ok(None);
        };
        let facet = self.facets.remove(position);
        if facet.has_restrictions() {
            self.refresh(database)?;
        }
        Ok(Some(facet))
    }

    /// Runs `change` on one facet; when it reports a change the restriction
    /// is recomputed.
    pub fn with_facet<F>(&mut self, database: &Database, id: &str, change: F) -> Result<bool>
    where
        F: FnOnce(&mut FacetKind, &FacetContext) -> Result<bool>,
    {
        let Some(facet) = self.facets.iter_mut().find(|facet| facet.id() == id) else {
            return Err(ExhibitError::Data(format!("collection {} has no facet {}", self.id, id)));
        };
        let ctx = FacetContext { database, all_items: &self.items };
        let changed = change(facet, &ctx)?;
        if changed {
            self.on_facet_updated(database, id)?;
        }
        Ok(changed)
    }

    pub fn on_facet_updated(&mut self, database: &Database, id: &str) -> Result<()> {
        if self.updating {
            return Ok(());
        }
        trace!(collection = %self.id, facet = %id, "facet updated");
        self.refresh(database)
    }

    /// Runs `change` with facet updates held back, then recomputes once.
    /// The recomputation happens even when `change` fails part way, so the
    /// restricted items always match whatever the facets hold.
    pub fn batch<T, F>(&mut self, database: &Database, change: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.updating = true;
        let result = change(self);
        self.updating = false;
        let refreshed = self.refresh(database);
        let value = result?;
        refreshed?;
        Ok(value)
    }

    /// Clears every facet and returns their previous states, in facet order.
    pub fn clear_all_restrictions(&mut self, database: &Database) -> Result<Vec<FacetState>> {
        self.batch(database, |collection| {
            Ok(collection.facets.iter_mut().map(|facet| facet.clear_all_restrictions()).collect())
        })
    }

    /// Reapplies states taken from [`Collection::clear_all_restrictions`].
    pub fn apply_restrictions(&mut self, database: &Database, states: &[FacetState]) -> Result<()> {
        self.batch(database, |collection| {
            for (facet, state) in collection.facets.iter_mut().zip(states) {
                facet.apply_restrictions(state)?;
            }
            Ok(())
        })
    }

    fn compute_restricted_items(&mut self, database: &Database) -> Result<()> {
        let ctx = FacetContext { database, all_items: &self.items };
        let mut items = self.items.clone();
        for facet in self.facets.iter().filter(|facet| facet.has_restrictions()) {
            items = facet.restrict(&ctx, &items)?;
        }
        self.restricted_items = items;
        Ok(())
    }

    /// A restricted facet counts over the items every *other* facet lets
    /// through, so its unselected values keep sensible counts; the others
    /// count over the restricted items.
    pub fn update_facets(&mut self, database: &Database) -> Result<()> {
        let ctx = FacetContext { database, all_items: &self.items };
        let restricted = self.facets.iter().filter(|facet| facet.has_restrictions()).count();
        let mut inputs = Vec::with_capacity(self.facets.len());
        for (i, facet) in self.facets.iter().enumerate() {
            let items = if !facet.has_restrictions() {
                self.restricted_items.clone()
            } else if restricted <= 1 {
                self.items.clone()
            } else {
                let mut items = self.items.clone();
                for (j, other) in self.facets.iter().enumerate() {
                    if j != i && other.has_restrictions() {
                        items = other.restrict(&ctx, &items)?;
                    }
                }
                items
            };
            inputs.push(items);
        }
        for (facet, items) in self.facets.iter_mut().zip(inputs) {
            facet.update(&ctx, &items)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse;
    use crate::facet::ListFacet;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn database() -> Database {
        let mut database = Database::new();
        database
            .load_data(
                &json!({
                    "types": { "Person": {}, "Pet": {} },
                    "items": [
                        { "label": "a", "type": "Person", "color": "red", "size": "big" },
                        { "label": "b", "type": "Person", "color": "red", "size": "small" },
                        { "label": "c", "type": "Person", "color": "blue", "size": "big" },
                        { "label": "d", "type": "Pet", "color": "blue", "size": "small" }
                    ]
                }),
                "http://example.org/",
            )
            .unwrap();
        database
    }

    fn list(id: &str, source: &str) -> FacetKind {
        FacetKind::List(ListFacet::new(id, Some(parse(source).unwrap())))
    }

    fn select(collection: &mut Collection, database: &Database, facet: &str, value: &str) -> bool {
        collection
            .with_facet(database, facet, |facet, _| Ok(facet.as_list_mut().is_some_and(|list| list.toggle(Some(value), false))))
            .unwrap()
    }

    fn counts(collection: &Collection, facet: &str) -> Vec<(String, usize)> {
        match collection.facet(facet) {
            Some(FacetKind::List(list)) => {
                list.entries().iter().filter_map(|e| e.value.clone().map(|v| (v, e.count))).collect()
            }
            _ => Vec::new(),
        }
    }

    #[test]
    fn type_based_roots() {
        let database = database();
        let mut people = Collection::type_based("people", ["Person"]);
        people.on_root_items_changed(&database).unwrap();
        assert_eq!(people.get_all_items().to_sorted_vec(), vec!["a", "b", "c"]);
        assert_eq!(people.count_restricted_items(), 3);
    }

    #[test]
    fn facets_restrict_in_order_and_cross_count() {
        let database = database();
        let mut collection = Collection::all_items("default");
        collection.on_root_items_changed(&database).unwrap();
        collection.add_facet(&database, list("color", ".color")).unwrap();
        collection.add_facet(&database, list("size", ".size")).unwrap();
        assert!(select(&mut collection, &database, "color", "red"));
        assert_eq!(collection.get_restricted_items().to_sorted_vec(), vec!["a", "b"]);
        // the only restricted facet still counts over everything
        assert_eq!(counts(&collection, "color"), vec![("blue".into(), 2), ("red".into(), 2)]);
        assert_eq!(counts(&collection, "size"), vec![("big".into(), 1), ("small".into(), 1)]);
        assert!(select(&mut collection, &database, "size", "big"));
        assert_eq!(collection.get_restricted_items().to_sorted_vec(), vec!["a"]);
        // with two restricted facets each counts over what the other lets through
        assert_eq!(counts(&collection, "color"), vec![("blue".into(), 1), ("red".into(), 1)]);
        assert_eq!(counts(&collection, "size"), vec![("big".into(), 1), ("small".into(), 1)]);
    }

    #[test]
    fn clear_and_reapply() {
        let database = database();
        let mut collection = Collection::all_items("default");
        collection.on_root_items_changed(&database).unwrap();
        collection.add_facet(&database, list("color", ".color")).unwrap();
        select(&mut collection, &database, "color", "blue");
        let states = collection.clear_all_restrictions(&database).unwrap();
        assert_eq!(collection.count_restricted_items(), 4);
        collection.apply_restrictions(&database, &states).unwrap();
        assert_eq!(collection.get_restricted_items().to_sorted_vec(), vec!["c", "d"]);
        assert!(collection.remove_facet(&database, "color").unwrap().is_some());
        assert_eq!(collection.count_restricted_items(), 4);
        assert!(collection.with_facet(&database, "color", |_, _| Ok(true)).is_err());
    }

    #[test]
    fn listeners_hear_changes_once_per_batch() {
        let database = database();
        let mut collection = Collection::all_items("default");
        let events = Rc::new(RefCell::new(Vec::new()));
        let heard = events.clone();
        collection.add_listener(Box::new(move |event| heard.borrow_mut().push(*event)));
        collection.on_root_items_changed(&database).unwrap();
        collection.add_facet(&database, list("color", ".color")).unwrap();
        collection.add_facet(&database, list("size", ".size")).unwrap();
        collection
            .batch(&database, |collection| {
                select(collection, &database, "color", "red");
                select(collection, &database, "size", "small");
                Ok(())
            })
            .unwrap();
        assert_eq!(collection.get_restricted_items().to_sorted_vec(), vec!["b"]);
        assert_eq!(
            *events.borrow(),
            vec![CollectionEvent::RootItemsChanged, CollectionEvent::ItemsChanged, CollectionEvent::ItemsChanged]
        );
    }
}
