//! The exhibit context: one database, its collections and the error policy.
//!
//! Collections live in creation order, so a collection always comes after
//! the one it is based on and changes can be pushed forward through the
//! list. A restricting collection additionally owns a [`CollectionFacet`] on
//! its base; its own restriction flows back into the base through that facet.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::collection::{Collection, CollectionKind};
use crate::database::{Database, DatabaseEvent};
use crate::error::{ExhibitError, Result};
use crate::expression::{self, Roots, ValueCollection, DEFAULT_ROOT};
use crate::facet::{CollectionFacet, Facet, FacetConfig, FacetContext, FacetKind, FacetState};
use crate::set::Set;
use crate::settings::{ErrorReporter, Settings};

pub const DEFAULT_COLLECTION: &str = "default";

/// Facet states by collection id, then facet id.
pub type ExhibitState = BTreeMap<String, BTreeMap<String, FacetState>>;

/// Declarative collection configuration, as JSON with camelCase keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionConfig {
    pub id: Option<String>,
    /// Types whose items make up the collection.
    pub item_types: Option<Vec<String>>,
    /// With a base collection: the expression mapping base items to ours.
    pub expression: Option<String>,
    pub base_collection_id: Option<String>,
    pub restrict_base_collection: bool,
}

fn derived_facet_id(collection_id: &str) -> String {
    format!("collection:{}", collection_id)
}

pub struct Exhibit {
    database: Database,
    collections: Vec<Collection>,
    settings: Settings,
    reporter: ErrorReporter,
    dirty: Rc<Cell<bool>>,
}

impl std::fmt::Debug for Exhibit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exhibit")
            .field("database", &self.database)
            .field("collections", &self.collections)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Exhibit {
    pub fn new(settings: Settings) -> Self {
        let dirty = Rc::new(Cell::new(false));
        let mut database = Database::new();
        let flag = dirty.clone();
        database.add_listener(Box::new(move |event| {
            if matches!(event, DatabaseEvent::AfterLoadingItems | DatabaseEvent::AfterRemovingAllStatements) {
                flag.set(true);
            }
        }));
        Self {
            database,
            collections: vec![Collection::all_items(DEFAULT_COLLECTION)],
            reporter: ErrorReporter::new(settings.errors),
            settings,
            dirty,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }
    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }
    pub fn collection(&self, id: &str) -> Option<&Collection> {
        self.collections.iter().find(|collection| collection.id() == id)
    }
    pub fn default_collection(&self) -> Option<&Collection> {
        self.collection(DEFAULT_COLLECTION)
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.collections
            .iter()
            .position(|collection| collection.id() == id)
            .ok_or_else(|| ExhibitError::Data(format!("no collection {}", id)))
    }

    /// Runs `result` through the error policy; a logged error becomes the
    /// default value.
    fn guard<T: Default>(&self, context: &str, result: Result<T>) -> Result<T> {
        Ok(self.reporter.report(context, result)?.unwrap_or_default())
    }

    // ------------- data -------------
    /// Loads a payload and refreshes every collection. Relative ids mint
    /// URIs under `base_uri`, or the configured base when absent.
    pub fn load_data(&mut self, data: &Value, base_uri: Option<&str>) -> Result<()> {
        let base_uri = base_uri.unwrap_or(&self.settings.base_uri).to_string();
        let result = self.database.load_data(data, &base_uri);
        self.guard("loading data", result)?;
        self.refresh_if_dirty()
    }

    /// Changes the database directly; collections are refreshed afterwards.
    pub fn update_database<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Database),
    {
        change(&mut self.database);
        self.dirty.set(true);
        self.refresh_if_dirty()
    }

    fn refresh_if_dirty(&mut self) -> Result<()> {
        if !self.dirty.replace(false) {
            return Ok(());
        }
        info!(items = self.database.get_all_items_count(), "refreshing collections");
        let result = self.refresh_all();
        self.guard("refreshing collections", result)
    }

    fn refresh_all(&mut self) -> Result<()> {
        for position in 0..self.collections.len() {
            match self.based_root_items(position)? {
                Some(items) => self.collections[position].set_based_items(&self.database, items)?,
                None => self.collections[position].on_root_items_changed(&self.database)?,
            }
        }
        Ok(())
    }

    // ------------- collections -------------
    /// Root items of a collection based on another one, `None` for
    /// collections fed by the database.
    fn based_root_items(&self, position: usize) -> Result<Option<Set>> {
        let collection = &self.collections[position];
        let CollectionKind::Based { expression, base, restricting } = collection.kind() else {
            return Ok(None);
        };
        let base = &self.collections[self.position(base)?];
        if !*restricting {
            let roots = Roots::items(base.get_restricted_items().clone());
            return Ok(Some(expression.evaluate(&roots, DEFAULT_ROOT, &self.database)?.into_set()));
        }
        match base.facet(&derived_facet_id(collection.id())) {
            Some(FacetKind::Collection(facet)) => {
                let ctx = FacetContext { database: &self.database, all_items: base.get_all_items() };
                Ok(Some(facet.values_of(&ctx, facet.candidates())?))
            }
            _ => Err(ExhibitError::Invariant(format!("collection {} lost its facet on {}", collection.id(), base.id()))),
        }
    }

    pub fn create_collection(&mut self, config: &CollectionConfig) -> Result<String> {
        let result = self.build_collection(config);
        self.guard("creating collection", result)
    }

    fn build_collection(&mut self, config: &CollectionConfig) -> Result<String> {
        let id = config.id.clone().unwrap_or_else(|| format!("collection{}", self.collections.len()));
        if self.collection(&id).is_some() {
            return Err(ExhibitError::Data(format!("collection {} already exists", id)));
        }
        let kind = match (&config.base_collection_id, &config.expression) {
            (Some(base), Some(source)) => {
                let expression = expression::parse(source)?;
                let base_position = self.position(base)?;
                if config.restrict_base_collection {
                    let facet = CollectionFacet::new(&derived_facet_id(&id), expression.clone());
                    self.collections[base_position].add_facet(&self.database, FacetKind::Collection(facet))?;
                }
                CollectionKind::Based { expression, base: base.clone(), restricting: config.restrict_base_collection }
            }
            (Some(base), None) => {
                return Err(ExhibitError::Data(format!("collection {} is based on {} without an expression", id, base)));
            }
            _ => match &config.item_types {
                Some(types) => CollectionKind::TypeBased(types.iter().map(String::as_str).collect()),
                None => CollectionKind::AllItems,
            },
        };
        debug!(collection = %id, ?kind, "collection created");
        self.collections.push(Collection::new(&id, kind));
        let position = self.collections.len() - 1;
        match self.based_root_items(position)? {
            Some(items) => self.collections[position].set_based_items(&self.database, items)?,
            None => self.collections[position].on_root_items_changed(&self.database)?,
        }
        Ok(id)
    }

    /// Pushes a changed collection's items into every collection based on it.
    fn propagate(&mut self, position: usize) -> Result<()> {
        let id = self.collections[position].id().to_string();
        for dependent in position + 1..self.collections.len() {
            if self.collections[dependent].base() != Some(id.as_str()) {
                continue;
            }
            let Some(items) = self.based_root_items(dependent)? else {
                continue;
            };
            if items != *self.collections[dependent].get_all_items() {
                self.collections[dependent].set_based_items(&self.database, items)?;
                self.propagate(dependent)?;
            }
        }
        Ok(())
    }

    // A restricting collection hands its restriction to its base before the
    // base and everything after it is brought up to date.
    fn after_facet_change(&mut self, position: usize) -> Result<()> {
        let collection = &self.collections[position];
        let (Some(base), true) = (collection.base(), collection.is_restricting()) else {
            return self.propagate(position);
        };
        let base_position = self.position(base)?;
        let facet_id = derived_facet_id(collection.id());
        let restriction = collection.has_restrictions().then(|| collection.get_restricted_items().clone());
        self.collections[base_position].with_facet(&self.database, &facet_id, |facet, _| {
            Ok(match facet {
                FacetKind::Collection(facet) => facet.set_restriction(restriction),
                _ => false,
            })
        })?;
        self.after_facet_change(base_position)?;
        // the base may leave our root items alone, dependents still need
        // our new restricted items
        self.propagate(position)
    }

    // ------------- facets -------------
    /// Builds a facet from configuration and attaches it. Returns its id.
    pub fn add_facet(&mut self, collection_id: &str, config: &FacetConfig) -> Result<String> {
        let result = self.attach_facet(collection_id, config);
        self.guard("adding facet", result)
    }

    fn attach_facet(&mut self, collection_id: &str, config: &FacetConfig) -> Result<String> {
        let position = self.position(collection_id)?;
        let facet = config.build(&self.settings, self.collections[position].facets().len())?;
        let id = facet.id().to_string();
        let restricted = facet.has_restrictions();
        self.collections[position].add_facet(&self.database, facet)?;
        if restricted {
            self.after_facet_change(position)?;
        }
        Ok(id)
    }

    pub fn remove_facet(&mut self, collection_id: &str, facet_id: &str) -> Result<bool> {
        let result = self.detach_facet(collection_id, facet_id);
        self.guard("removing facet", result)
    }

    fn detach_facet(&mut self, collection_id: &str, facet_id: &str) -> Result<bool> {
        let position = self.position(collection_id)?;
        let Some(facet) = self.collections[position].remove_facet(&self.database, facet_id)? else {
            return Ok(false);
        };
        if facet.has_restrictions() {
            self.after_facet_change(position)?;
        }
        Ok(true)
    }

    /// Changes one facet, the way a click in its view would. When `change`
    /// reports a change the collection and its dependants are updated.
    pub fn update_facet<F>(&mut self, collection_id: &str, facet_id: &str, change: F) -> Result<bool>
    where
        F: FnOnce(&mut FacetKind, &FacetContext) -> Result<bool>,
    {
        let result = self.change_facet(collection_id, facet_id, change);
        self.guard("updating facet", result)
    }

    fn change_facet<F>(&mut self, collection_id: &str, facet_id: &str, change: F) -> Result<bool>
    where
        F: FnOnce(&mut FacetKind, &FacetContext) -> Result<bool>,
    {
        let position = self.position(collection_id)?;
        let changed = self.collections[position].with_facet(&self.database, facet_id, change)?;
        if changed {
            self.after_facet_change(position)?;
        }
        Ok(changed)
    }

    /// Feeds a keystroke to a text search facet.
    pub fn text_input(
        &mut self,
        collection_id: &str,
        facet_id: &str,
        text: &str,
        now: Instant,
        enter: bool,
    ) -> Result<bool> {
        self.update_facet(collection_id, facet_id, |facet, _| {
            match facet.as_text_search_mut() {
                Some(search) => Ok(search.input(text, now, enter)),
                None => Err(ExhibitError::Data(format!("facet {} takes no text", facet.id()))),
            }
        })
    }

    /// Fires debounced text searches that have come due.
    pub fn tick(&mut self, now: Instant) -> Result<bool> {
        let mut fired = false;
        for position in 0..self.collections.len() {
            let due: Vec<String> = self.collections[position]
                .facets()
                .iter()
                .filter(|facet| matches!(facet, FacetKind::TextSearch(search) if search.is_pending()))
                .map(|facet| facet.id().to_string())
                .collect();
            let collection_id = self.collections[position].id().to_string();
            for facet_id in due {
                fired |= self.update_facet(&collection_id, &facet_id, |facet, _| {
                    Ok(facet.as_text_search_mut().is_some_and(|search| search.poll(now)))
                })?;
            }
        }
        Ok(fired)
    }

    // ------------- state -------------
    /// Restriction state of every facet the user can act on.
    pub fn export_state(&self) -> ExhibitState {
        self.collections
            .iter()
            .map(|collection| {
                let states = collection
                    .facets()
                    .iter()
                    .filter(|facet| facet.class().is_some())
                    .map(|facet| (facet.id().to_string(), facet.export_state()))
                    .collect();
                (collection.id().to_string(), states)
            })
            .collect()
    }

    /// Restores exported state. Facets the state does not mention are
    /// cleared. Reports whether anything changed.
    pub fn import_state(&mut self, state: &ExhibitState) -> Result<bool> {
        let result = self.restore_state(state);
        self.guard("importing state", result)
    }

    fn restore_state(&mut self, state: &ExhibitState) -> Result<bool> {
        let empty = BTreeMap::new();
        let mut any = false;
        for position in 0..self.collections.len() {
            let states = state.get(self.collections[position].id()).unwrap_or(&empty);
            let collection = &mut self.collections[position];
            let ids: Vec<String> = collection
                .facets()
                .iter()
                .filter(|facet| facet.class().is_some())
                .map(|facet| facet.id().to_string())
                .collect();
            let outcome = collection.batch(&self.database, |collection| {
                let mut changed = false;
                for id in &ids {
                    changed |= collection.with_facet(&self.database, id, |facet, _| {
                        let target = states.get(id).cloned().unwrap_or_else(|| facet.export_empty_state());
                        facet.import_state(&target)
                    })?;
                }
                Ok(changed)
            });
            match outcome {
                Ok(false) => {}
                Ok(true) => {
                    self.after_facet_change(position)?;
                    any = true;
                }
                // facets before the failing one may have changed
                Err(e) => {
                    self.after_facet_change(position)?;
                    return Err(e);
                }
            }
        }
        Ok(any)
    }

    pub fn clear_all_restrictions(&mut self) -> Result<ExhibitState> {
        let state = self.export_state();
        self.import_state(&ExhibitState::new())?;
        Ok(state)
    }

    pub fn apply_restrictions(&mut self, state: &ExhibitState) -> Result<()> {
        self.import_state(state).map(|_| ())
    }

    // ------------- expressions -------------
    /// Parses and evaluates `source` against `roots`.
    pub fn evaluate(&self, source: &str, roots: &Roots) -> Result<ValueCollection> {
        let result = expression::parse(source).and_then(|parsed| parsed.evaluate(roots, DEFAULT_ROOT, &self.database));
        Ok(self.reporter.report(source, result)?.unwrap_or_else(|| ValueCollection::empty(Default::default())))
    }

    pub fn evaluate_on_item(&self, source: &str, item: &str) -> Result<ValueCollection> {
        self.evaluate(source, &Roots::item(item))
    }
}
