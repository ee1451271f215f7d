use std::cell::OnceCell;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

// used to keep the one-to-one mapping between namespace prefixes and base URIs
use bimap::BiMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::datatype::{parse_float, parse_iso8601, value_to_text, ValueType};
use crate::error::{ExhibitError, Result};
use crate::range::{RangeIndex, RangeValue};
use crate::set::{KeyHasher, Set};

pub const ITEM_TYPE: &str = "Item";
const LABEL_URI: &str = "http://www.w3.org/2000/01/rdf-schema#label";
const TYPE_URI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const URI_URI: &str = "http://simile.mit.edu/2006/11/exhibit#uri";

// x -> y -> ordered, duplicate free list of z
type Index = HashMap<String, HashMap<String, Vec<String>, KeyHasher>, KeyHasher>;

// ------------- Events -------------
/// Notifications fired around bulk changes so that dependants (collections)
/// can recompute what they derive from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEvent {
    BeforeLoadingTypes,
    AfterLoadingTypes,
    BeforeLoadingProperties,
    AfterLoadingProperties,
    BeforeLoadingItems,
    AfterLoadingItems,
    BeforeRemovingAllStatements,
    AfterRemovingAllStatements,
}

pub type DatabaseListener = Box<dyn FnMut(&DatabaseEvent)>;

// ------------- Type -------------
#[derive(Debug, Clone)]
pub struct Type {
    id: String,
    custom: Map<String, Value>,
}

impl Type {
    fn new(id: &str) -> Self {
        Self { id: id.to_string(), custom: Map::new() }
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.custom.get(attribute)
    }
    fn text(&self, attribute: &str) -> Option<String> {
        self.custom.get(attribute).and_then(value_to_text)
    }
    pub fn label(&self) -> String {
        self.text("label").unwrap_or_else(|| self.id.clone())
    }
    pub fn plural_label(&self) -> String {
        self.text("pluralLabel").unwrap_or_else(|| self.label())
    }
    pub fn uri(&self) -> Option<String> {
        self.text("uri")
    }
    pub fn origin(&self) -> Option<String> {
        self.text("origin")
    }
}

// ------------- Property -------------
pub struct Property {
    id: String,
    uri: String,
    value_type: ValueType,
    label: String,
    plural_label: String,
    reverse_label: String,
    reverse_plural_label: String,
    grouping_label: String,
    reverse_grouping_label: String,
    origin: Option<String>,
    custom: Map<String, Value>,
    range_index: OnceCell<RangeIndex>,
}

impl Property {
    fn new(id: &str, base_uri: &str) -> Self {
        let label = id.to_string();
        Self {
            id: id.to_string(),
            uri: format!("{}property#{}", base_uri, urlencoding::encode(id)),
            value_type: ValueType::Text,
            plural_label: label.clone(),
            reverse_label: format!("reverse of {}", label),
            reverse_plural_label: format!("reverse of {}", label),
            grouping_label: label.clone(),
            reverse_grouping_label: format!("reverse of {}", label),
            label,
            origin: None,
            custom: Map::new(),
            range_index: OnceCell::new(),
        }
    }
    fn built_in(id: &str, uri: &str, value_type: ValueType, label: &str, plural_label: &str) -> Self {
        let mut property = Property::new(id, "");
        property.uri = uri.to_string();
        property.value_type = value_type;
        property.label = label.to_string();
        property.plural_label = plural_label.to_string();
        property.reverse_label = format!("reverse of {}", label);
        property.reverse_plural_label = format!("reverse of {}", plural_label);
        property.grouping_label = label.to_string();
        property.reverse_grouping_label = property.reverse_label.clone();
        property
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn uri(&self) -> &str {
        &self.uri
    }
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }
    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn plural_label(&self) -> &str {
        &self.plural_label
    }
    pub fn reverse_label(&self) -> &str {
        &self.reverse_label
    }
    pub fn reverse_plural_label(&self) -> &str {
        &self.reverse_plural_label
    }
    pub fn grouping_label(&self) -> &str {
        &self.grouping_label
    }
    pub fn reverse_grouping_label(&self) -> &str {
        &self.reverse_grouping_label
    }
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.custom.get(attribute)
    }
    /// The sorted index over this property's values, built on first use.
    /// Item-valued properties have none.
    pub fn get_range_index<'a>(&'a self, database: &Database) -> Option<&'a RangeIndex> {
        if self.value_type == ValueType::Item {
            return None;
        }
        Some(self.range_index.get_or_init(|| self.build_range_index(database)))
    }
    fn build_range_index(&self, database: &Database) -> RangeIndex {
        debug!(property = %self.id, value_type = %self.value_type, "building range index");
        let p = self.id.as_str();
        let objects = |item: &str| database.get_objects(item, p, None, None);
        match self.value_type {
            ValueType::Number | ValueType::Currency => RangeIndex::new(&database.items, |item| {
                objects(item)
                    .iter()
                    .map(parse_float)
                    .filter(|n| !n.is_nan())
                    .map(RangeValue::Number)
                    .collect()
            }),
            ValueType::Date => RangeIndex::new(&database.items, |item| {
                objects(item)
                    .iter()
                    .filter_map(parse_iso8601)
                    .map(|millis| RangeValue::Number(millis as f64))
                    .collect()
            }),
            _ => RangeIndex::new(&database.items, |item| {
                objects(item).iter().map(RangeValue::from_text).collect()
            }),
        }
    }
    fn on_new_data(&mut self) {
        self.range_index.take();
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("value_type", &self.value_type)
            .field("label", &self.label)
            .field("indexed", &self.range_index.get().is_some())
            .finish()
    }
}

// ------------- Namespaces -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub base: String,
    pub local_name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    pub qualified_names: BTreeMap<String, QualifiedName>,
    // prefix <-> base URI
    pub prefixes: BiMap<String, String>,
}

// ------------- Database -------------
/// The triple store. Every statement lives in two mirrored indexes,
/// subject -> property -> objects and object -> property -> subjects.
pub struct Database {
    types: HashMap<String, Type, KeyHasher>,
    properties: HashMap<String, Property, KeyHasher>,
    spo: Index,
    ops: Index,
    items: Set,
    property_array: OnceCell<Vec<String>>,
    listeners: Vec<DatabaseListener>,
    synthetic_labels: usize,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        let mut database = Self {
            types: HashMap::default(),
            properties: HashMap::default(),
            spo: Index::default(),
            ops: Index::default(),
            items: Set::new(),
            property_array: OnceCell::new(),
            listeners: Vec::new(),
            synthetic_labels: 0,
        };
        let mut item_type = Type::new(ITEM_TYPE);
        item_type.custom.insert("label".into(), Value::from("Item"));
        item_type.custom.insert("pluralLabel".into(), Value::from("Items"));
        database.types.insert(ITEM_TYPE.to_string(), item_type);
        for property in [
            Property::built_in("label", LABEL_URI, ValueType::Text, "label", "labels"),
            Property::built_in("type", TYPE_URI, ValueType::Text, "type", "types"),
            Property::built_in("uri", URI_URI, ValueType::Url, "URI", "URIs"),
        ] {
            database.properties.insert(property.id.clone(), property);
        }
        database
    }

    // ------------- listeners -------------
    pub fn add_listener(&mut self, listener: DatabaseListener) {
        self.listeners.push(listener);
    }
    fn fire(&mut self, event: DatabaseEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    // ------------- loading -------------
    /// Ingests a `{types, properties, items}` payload. Loading is additive
    /// across calls; statements already present are not duplicated.
    pub fn load_data(&mut self, data: &Value, base_uri: &str) -> Result<()> {
        let object = data
            .as_object()
            .ok_or_else(|| ExhibitError::Data("top-level payload must be a JSON object".into()))?;
        if let Some(types) = object.get("types") {
            match types.as_object() {
                Some(types) => self.load_types(types, base_uri),
                None => warn!("ignoring \"types\" that is not an object"),
            }
        }
        if let Some(properties) = object.get("properties") {
            match properties.as_object() {
                Some(properties) => self.load_properties(properties, base_uri),
                None => warn!("ignoring \"properties\" that is not an object"),
            }
        }
        if let Some(items) = object.get("items") {
            match items.as_array() {
                Some(items) => self.load_items(items, base_uri),
                None => warn!("ignoring \"items\" that is not an array"),
            }
        }
        Ok(())
    }

    pub fn load_types(&mut self, types: &Map<String, Value>, base_uri: &str) {
        self.fire(DatabaseEvent::BeforeLoadingTypes);
        for (type_id, entry) in types {
            let Some(entry) = entry.as_object() else {
                warn!(r#type = %type_id, "type entry is not an object");
                continue;
            };
            let kept = self.types.entry(type_id.clone()).or_insert_with(|| Type::new(type_id));
            for (attribute, value) in entry {
                kept.custom.insert(attribute.clone(), value.clone());
            }
            if !kept.custom.contains_key("uri") {
                let uri = format!("{}type#{}", base_uri, urlencoding::encode(type_id));
                kept.custom.insert("uri".into(), Value::from(uri));
            }
            if !kept.custom.contains_key("label") {
                kept.custom.insert("label".into(), Value::from(type_id.as_str()));
            }
        }
        self.fire(DatabaseEvent::AfterLoadingTypes);
    }

    pub fn load_properties(&mut self, properties: &Map<String, Value>, base_uri: &str) {
        self.fire(DatabaseEvent::BeforeLoadingProperties);
        for (property_id, entry) in properties {
            let Some(entry) = entry.as_object() else {
                warn!(property = %property_id, "property entry is not an object");
                continue;
            };
            let property = self
                .properties
                .entry(property_id.clone())
                .or_insert_with(|| Property::new(property_id, base_uri));
            let text = |key: &str| entry.get(key).and_then(value_to_text);
            property.uri = text("uri")
                .unwrap_or_else(|| format!("{}property#{}", base_uri, urlencoding::encode(property_id)));
            property.value_type = text("valueType").map(ValueType::from).unwrap_or_default();
            property.label = text("label").unwrap_or_else(|| property_id.clone());
            property.plural_label = text("pluralLabel").unwrap_or_else(|| property.label.clone());
            property.reverse_label = text("reverseLabel").unwrap_or_else(|| format!("reverse of {}", property.label));
            property.reverse_plural_label = text("reversePluralLabel")
                .unwrap_or_else(|| format!("reverse of {}", property.plural_label));
            property.grouping_label = text("groupingLabel").unwrap_or_else(|| property.label.clone());
            property.reverse_grouping_label =
                text("reverseGroupingLabel").unwrap_or_else(|| property.reverse_label.clone());
            if let Some(origin) = text("origin") {
                property.origin = Some(origin);
            }
            property.custom = entry.clone();
            property.on_new_data();
        }
        self.property_array.take();
        self.fire(DatabaseEvent::AfterLoadingProperties);
    }

    pub fn load_items(&mut self, items: &[Value], base_uri: &str) {
        self.fire(DatabaseEvent::BeforeLoadingItems);
        let before = self.items.size();
        for entry in items {
            match entry.as_object() {
                Some(entry) => self.load_item(entry, base_uri),
                None => warn!(entry = %entry, "skipping item entry that is not an object"),
            }
        }
        self.property_array.take();
        debug!(loaded = items.len(), new = self.items.size() - before, "items loaded");
        self.fire(DatabaseEvent::AfterLoadingItems);
    }

    fn load_item(&mut self, entry: &Map<String, Value>, base_uri: &str) {
        let first = |key: &str| {
            entry.get(key).and_then(|value| match value {
                Value::Array(values) => values.first().and_then(value_to_text),
                other => value_to_text(other),
            })
        };
        let mut label = first("label");
        let id = match first("id").or_else(|| label.clone()).or_else(|| first("uri").map(|uri| local_name(&uri).to_string())) {
            Some(id) => id,
            None => {
                self.synthetic_labels += 1;
                let synthetic = format!("item{}", self.synthetic_labels);
                warn!(entry = %serde_json::Value::Object(entry.clone()), label = %synthetic, "item entry has no label and no id");
                label = Some(synthetic.clone());
                synthetic
            }
        };
        if label.is_some() || !self.items.contains(&id) {
            let label = label.unwrap_or_else(|| {
                warn!(item = %id, "item entry has no label, using its id");
                id.clone()
            });
            let uri = first("uri").unwrap_or_else(|| format!("{}item#{}", base_uri, urlencoding::encode(&id)));
            let item_type = first("type").unwrap_or_else(|| ITEM_TYPE.to_string());
            self.items.add(id.as_str());
            self.index(&id, "uri", &uri);
            self.index(&id, "label", &label);
            self.index(&id, "type", &item_type);
            self.ensure_type_exists(&item_type, base_uri);
        }
        for (property_id, value) in entry {
            if matches!(property_id.as_str(), "uri" | "label" | "id" | "type") {
                continue;
            }
            self.ensure_property_exists(property_id, base_uri).on_new_data();
            match value {
                Value::Array(values) => {
                    for value in values {
                        if let Some(text) = value_to_text(value) {
                            self.index(&id, property_id, &text);
                        }
                    }
                }
                other => {
                    if let Some(text) = value_to_text(other) {
                        self.index(&id, property_id, &text);
                    }
                }
            }
        }
        for built_in in ["uri", "label", "type"] {
            if let Some(property) = self.properties.get_mut(built_in) {
                property.on_new_data();
            }
        }
    }

    fn ensure_type_exists(&mut self, type_id: &str, base_uri: &str) {
        if !self.types.contains_key(type_id) {
            let mut kept = Type::new(type_id);
            let uri = format!("{}type#{}", base_uri, urlencoding::encode(type_id));
            kept.custom.insert("uri".into(), Value::from(uri));
            kept.custom.insert("label".into(), Value::from(type_id));
            self.types.insert(type_id.to_string(), kept);
        }
    }

    fn ensure_property_exists(&mut self, property_id: &str, base_uri: &str) -> &mut Property {
        match self.properties.entry(property_id.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.property_array.take();
                e.insert(Property::new(property_id, base_uri))
            }
        }
    }

    fn index(&mut self, s: &str, p: &str, o: &str) {
        index_put(&mut self.spo, s, p, o);
        index_put(&mut self.ops, o, p, s);
    }

    // ------------- metadata -------------
    pub fn get_type(&self, type_id: &str) -> Option<&Type> {
        self.types.get(type_id)
    }
    pub fn get_property(&self, property_id: &str) -> Option<&Property> {
        self.properties.get(property_id)
    }
    /// Sorted property ids; cached until the next load or removal.
    pub fn get_all_properties(&self) -> &[String] {
        self.property_array.get_or_init(|| {
            let mut ids: Vec<String> = self.properties.keys().cloned().collect();
            ids.sort_unstable();
            ids
        })
    }
    pub fn get_all_items(&self) -> Set {
        self.items.clone()
    }
    pub fn get_all_items_count(&self) -> usize {
        self.items.size()
    }
    pub fn contains_item(&self, item: &str) -> bool {
        self.items.contains(item)
    }
    /// Splits every property URI into base and local name and assigns a
    /// short prefix to each distinct base.
    pub fn get_namespaces(&self) -> Namespaces {
        let mut split: BTreeMap<String, (String, String)> = BTreeMap::new();
        let mut bases = BTreeSet::new();
        for (id, property) in &self.properties {
            let uri = property.uri();
            let cut = match uri.find('#') {
                Some(hash) if hash > 0 => Some(hash),
                _ => uri.rfind('/').filter(|slash| *slash > 0),
            };
            if let Some(cut) = cut {
                let base = uri[..=cut].to_string();
                bases.insert(base.clone());
                split.insert(id.clone(), (base, uri[cut + 1..].to_string()));
            }
        }
        let mut prefixes = BiMap::new();
        for (i, base) in bases.into_iter().enumerate() {
            let prefix = match b"abcdefghijklmnopqrstuvwxyz".get(i) {
                Some(letter) => (*letter as char).to_string(),
                None => format!("ns{}", i),
            };
            prefixes.insert(prefix, base);
        }
        let qualified_names = split
            .into_iter()
            .map(|(id, (base, local_name))| {
                let prefix = prefixes.get_by_right(&base).cloned().unwrap_or_default();
                (id, QualifiedName { base, local_name, prefix })
            })
            .collect();
        Namespaces { qualified_names, prefixes }
    }

    // ------------- traversal -------------
    pub fn get_objects(&self, s: &str, p: &str, set: Option<Set>, filter: Option<&Set>) -> Set {
        get(&self.spo, s, p, set, filter)
    }
    pub fn get_subjects(&self, o: &str, p: &str, set: Option<Set>, filter: Option<&Set>) -> Set {
        get(&self.ops, o, p, set, filter)
    }
    pub fn get_objects_union(&self, subjects: &Set, p: &str, set: Option<Set>, filter: Option<&Set>) -> Set {
        get_union(&self.spo, subjects, p, set, filter)
    }
    pub fn get_subjects_union(&self, objects: &Set, p: &str, set: Option<Set>, filter: Option<&Set>) -> Set {
        get_union(&self.ops, objects, p, set, filter)
    }
    pub fn get_object(&self, s: &str, p: &str) -> Option<&str> {
        first(&self.spo, s, p)
    }
    pub fn get_subject(&self, o: &str, p: &str) -> Option<&str> {
        first(&self.ops, o, p)
    }
    /// Ordered objects of one subject/property pair.
    pub fn get_object_list(&self, s: &str, p: &str) -> &[String] {
        self.spo.get(s).and_then(|hash| hash.get(p)).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn count_distinct_objects(&self, s: &str, p: &str, filter: Option<&Set>) -> usize {
        count_distinct(&self.spo, s, p, filter)
    }
    pub fn count_distinct_subjects(&self, o: &str, p: &str, filter: Option<&Set>) -> usize {
        count_distinct(&self.ops, o, p, filter)
    }
    pub fn count_distinct_objects_union(&self, subjects: &Set, p: &str, filter: Option<&Set>) -> usize {
        count_distinct_union(&self.spo, subjects, p, filter)
    }
    pub fn count_distinct_subjects_union(&self, objects: &Set, p: &str, filter: Option<&Set>) -> usize {
        count_distinct_union(&self.ops, objects, p, filter)
    }
    pub fn get_forward_properties(&self, s: &str) -> Vec<String> {
        properties_of(&self.spo, s)
    }
    pub fn get_backward_properties(&self, o: &str) -> Vec<String> {
        properties_of(&self.ops, o)
    }
    pub fn get_type_ids(&self, items: &Set) -> Set {
        self.get_objects_union(items, "type", None, None)
    }
    /// Subjects whose `property` value lies in the range. Empty when the
    /// property is unknown or has no range index.
    pub fn get_subjects_in_range(
        &self,
        property_id: &str,
        min: &RangeValue,
        max: &RangeValue,
        inclusive: bool,
        set: Option<Set>,
        filter: Option<&Set>,
    ) -> Set {
        match self.get_property(property_id).and_then(|property| property.get_range_index(self)) {
            Some(index) => index.get_subjects_in_range(min, max, inclusive, set, filter),
            None => set.unwrap_or_default(),
        }
    }

    // ------------- statements -------------
    /// Adds one statement. A property seen for the first time is created
    /// with value type text and a relative URI.
    pub fn add_statement(&mut self, s: &str, p: &str, o: &str) {
        self.index(s, p, o);
        self.ensure_property_exists(p, "").on_new_data();
    }
    /// Removes one statement from both indexes, returning whether it existed.
    pub fn remove_statement(&mut self, s: &str, p: &str, o: &str) -> bool {
        let removed_object = index_remove(&mut self.spo, s, p, o);
        let removed_subject = index_remove(&mut self.ops, o, p, s);
        if removed_object || removed_subject {
            self.invalidate(p);
        }
        removed_object || removed_subject
    }
    pub fn remove_objects(&mut self, s: &str, p: &str) -> bool {
        let mut removed = false;
        for o in self.get_object_list(s, p).to_vec() {
            removed |= self.remove_statement(s, p, &o);
        }
        removed
    }
    pub fn remove_subjects(&mut self, o: &str, p: &str) -> bool {
        let subjects: Vec<String> = self.ops.get(o).and_then(|hash| hash.get(p)).cloned().unwrap_or_default();
        let mut removed = false;
        for s in subjects {
            removed |= self.remove_statement(&s, p, o);
        }
        removed
    }
    /// Drops every statement and item. Types and properties survive.
    pub fn remove_all_statements(&mut self) {
        self.fire(DatabaseEvent::BeforeRemovingAllStatements);
        self.spo.clear();
        self.ops.clear();
        self.items = Set::new();
        for property in self.properties.values_mut() {
            property.on_new_data();
        }
        self.property_array.take();
        self.fire(DatabaseEvent::AfterRemovingAllStatements);
    }
    fn invalidate(&mut self, p: &str) {
        if let Some(property) = self.properties.get_mut(p) {
            property.on_new_data();
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Database")
            .field("items", &self.items.size())
            .field("types", &self.types.len())
            .field("properties", &self.properties.len())
            .field("subjects", &self.spo.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ------------- index helpers -------------
fn index_put(index: &mut Index, x: &str, y: &str, z: &str) -> bool {
    let array = index.entry(x.to_string()).or_default().entry(y.to_string()).or_default();
    if array.iter().any(|existing| existing == z) {
        return false;
    }
    array.push(z.to_string());
    true
}

fn index_remove(index: &mut Index, x: &str, y: &str, z: &str) -> bool {
    let Some(hash) = index.get_mut(x) else { return false };
    let Some(array) = hash.get_mut(y) else { return false };
    let Some(position) = array.iter().position(|existing| existing == z) else { return false };
    array.remove(position);
    if array.is_empty() {
        hash.remove(y);
        if hash.is_empty() {
            index.remove(x);
        }
    }
    true
}

fn get(index: &Index, x: &str, y: &str, set: Option<Set>, filter: Option<&Set>) -> Set {
    let mut set = set.unwrap_or_default();
    if let Some(array) = index.get(x).and_then(|hash| hash.get(y)) {
        for z in array {
            if filter.is_none_or(|f| f.contains(z)) {
                set.add(z.as_str());
            }
        }
    }
    set
}

fn get_union(index: &Index, xs: &Set, y: &str, set: Option<Set>, filter: Option<&Set>) -> Set {
    let mut set = set.unwrap_or_default();
    for x in xs.iter() {
        if let Some(array) = index.get(x).and_then(|hash| hash.get(y)) {
            for z in array {
                if filter.is_none_or(|f| f.contains(z)) && !set.contains(z) {
                    set.add(z.as_str());
                }
            }
        }
    }
    set
}

fn first<'a>(index: &'a Index, x: &str, y: &str) -> Option<&'a str> {
    index.get(x).and_then(|hash| hash.get(y)).and_then(|array| array.first()).map(String::as_str)
}

fn count_distinct(index: &Index, x: &str, y: &str, filter: Option<&Set>) -> usize {
    match index.get(x).and_then(|hash| hash.get(y)) {
        Some(array) => match filter {
            Some(filter) => array.iter().filter(|z| filter.contains(z)).count(),
            None => array.len(),
        },
        None => 0,
    }
}

fn count_distinct_union(index: &Index, xs: &Set, y: &str, filter: Option<&Set>) -> usize {
    let mut visited = Set::new();
    for x in xs.iter() {
        if let Some(array) = index.get(x).and_then(|hash| hash.get(y)) {
            for z in array {
                if filter.is_none_or(|f| f.contains(z)) {
                    visited.add(z.as_str());
                }
            }
        }
    }
    visited.size()
}

fn properties_of(index: &Index, x: &str) -> Vec<String> {
    let mut properties: Vec<String> = index.get(x).map(|hash| hash.keys().cloned().collect()).unwrap_or_default();
    properties.sort_unstable();
    properties
}

/// Local form of a URI: the text after its last `#` or `/`.
pub fn local_name(uri: &str) -> &str {
    match uri.rfind(['#', '/']) {
        Some(cut) if cut + 1 < uri.len() => &uri[cut + 1..],
        _ => uri,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "http://example.org/";

    fn people() -> Database {
        let mut database = Database::new();
        database
            .load_data(
                &json!({
                    "properties": { "age": { "valueType": "number" }, "knows": { "valueType": "item" } },
                    "items": [
                        { "label": "Alice", "type": "Person", "age": 30, "knows": ["Bob", "Carol"] },
                        { "label": "Bob", "type": "Person", "age": 45, "knows": "Alice" },
                        { "label": "Carol", "type": "Robot", "age": [7, 7] }
                    ]
                }),
                BASE,
            )
            .unwrap();
        database
    }

    #[test]
    fn items_get_default_metadata() {
        let database = people();
        assert!(database.contains_item("Alice"));
        assert_eq!(database.get_object("Alice", "uri"), Some("http://example.org/item#Alice"));
        assert_eq!(database.get_object("Carol", "type"), Some("Robot"));
        assert_eq!(database.get_type("Robot").unwrap().uri().unwrap(), "http://example.org/type#Robot");
        assert_eq!(database.get_object_list("Carol", "age"), &["7".to_string()]);
        let property = database.get_property("knows").unwrap();
        assert_eq!(property.value_type(), &ValueType::Item);
        assert_eq!(property.reverse_label(), "reverse of knows");
    }

    #[test]
    fn entries_without_label_get_one() {
        let mut database = Database::new();
        database.load_data(&json!({ "items": [ { "color": "red" }, { "id": "x1", "color": "blue" } ] }), BASE).unwrap();
        assert_eq!(database.get_all_items_count(), 2);
        assert_eq!(database.get_object("item1", "label"), Some("item1"));
        assert_eq!(database.get_object("x1", "label"), Some("x1"));
        // a later entry naming an existing item merges into it
        database.load_data(&json!({ "items": [ { "id": "x1", "size": "L" } ] }), BASE).unwrap();
        assert_eq!(database.get_object("x1", "size"), Some("L"));
        assert_eq!(database.get_all_items_count(), 2);
    }

    #[test]
    fn non_object_payload_is_a_data_error() {
        let mut database = Database::new();
        assert!(matches!(database.load_data(&json!([1, 2]), BASE), Err(ExhibitError::Data(_))));
    }

    #[test]
    fn statements_round_trip() {
        let mut database = people();
        database.add_statement("Carol", "likes", "Alice");
        assert!(database.get_objects("Carol", "likes", None, None).contains("Alice"));
        assert!(database.get_subjects("Alice", "likes", None, None).contains("Carol"));
        database.add_statement("Carol", "likes", "Alice");
        assert_eq!(database.count_distinct_objects("Carol", "likes", None), 1);
        assert!(database.remove_statement("Carol", "likes", "Alice"));
        assert!(!database.get_objects("Carol", "likes", None, None).contains("Alice"));
        assert!(!database.get_subjects("Alice", "likes", None, None).contains("Carol"));
        assert!(!database.get_forward_properties("Carol").contains(&"likes".to_string()));
        assert!(!database.get_backward_properties("Alice").contains(&"likes".to_string()));
        assert!(!database.remove_statement("Carol", "likes", "Alice"));
    }

    #[test]
    fn remove_objects_and_subjects() {
        let mut database = people();
        assert!(database.remove_objects("Alice", "knows"));
        assert!(database.get_objects("Alice", "knows", None, None).is_empty());
        assert!(!database.get_subjects("Bob", "knows", None, None).contains("Alice"));
        assert!(database.remove_subjects("Alice", "knows"));
        assert!(database.get_subjects("Alice", "knows", None, None).is_empty());
    }

    #[test]
    fn union_and_counts_honour_filters() {
        let database = people();
        let subjects: Set = ["Alice", "Bob"].into_iter().collect();
        let known = database.get_objects_union(&subjects, "knows", None, None);
        assert_eq!(known.to_sorted_vec(), vec!["Alice", "Bob", "Carol"]);
        let filter: Set = ["Carol"].into_iter().collect();
        assert_eq!(database.get_objects_union(&subjects, "knows", None, Some(&filter)).size(), 1);
        assert_eq!(database.count_distinct_objects_union(&subjects, "knows", None), 3);
        assert_eq!(database.count_distinct_objects_union(&subjects, "knows", Some(&filter)), 1);
        assert_eq!(database.count_distinct_subjects("Alice", "knows", None), 1);
        let people: Set = ["Alice"].into_iter().collect();
        assert_eq!(database.count_distinct_subjects_union(&people, "knows", None), 1);
    }

    #[test]
    fn range_queries_follow_value_type() {
        let mut database = people();
        let adults = database.get_subjects_in_range("age", &18.0.into(), &50.0.into(), false, None, None);
        assert_eq!(adults.to_sorted_vec(), vec!["Alice", "Bob"]);
        assert!(database.get_subjects_in_range("knows", &"A".into(), &"Z".into(), true, None, None).is_empty());
        assert!(database.get_subjects_in_range("missing", &0.0.into(), &1.0.into(), true, None, None).is_empty());
        // the index is rebuilt after statements change
        database.add_statement("Carol", "age", "20");
        let adults = database.get_subjects_in_range("age", &18.0.into(), &50.0.into(), false, None, None);
        assert_eq!(adults.to_sorted_vec(), vec!["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn listeners_see_load_events() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut database = Database::new();
        let sink = Rc::clone(&seen);
        database.add_listener(Box::new(move |event| sink.borrow_mut().push(*event)));
        database.load_data(&json!({ "items": [ { "label": "a" } ] }), BASE).unwrap();
        database.remove_all_statements();
        assert_eq!(
            *seen.borrow(),
            vec![
                DatabaseEvent::BeforeLoadingItems,
                DatabaseEvent::AfterLoadingItems,
                DatabaseEvent::BeforeRemovingAllStatements,
                DatabaseEvent::AfterRemovingAllStatements,
            ]
        );
        assert_eq!(database.get_all_items_count(), 0);
    }

    #[test]
    fn namespaces_split_property_uris() {
        let database = people();
        let namespaces = database.get_namespaces();
        let label = &namespaces.qualified_names["label"];
        assert_eq!(label.base, "http://www.w3.org/2000/01/rdf-schema#");
        assert_eq!(label.local_name, "label");
        assert_eq!(namespaces.prefixes.get_by_left(&label.prefix), Some(&label.base));
        let age = &namespaces.qualified_names["age"];
        assert_eq!(age.base, "http://example.org/property#");
    }

    #[test]
    fn all_properties_are_cached_and_refreshed() {
        let mut database = people();
        assert!(database.get_all_properties().contains(&"age".to_string()));
        database.load_data(&json!({ "items": [ { "label": "Dan", "height": 180 } ] }), BASE).unwrap();
        assert!(database.get_all_properties().contains(&"height".to_string()));
    }

    #[test]
    fn local_names() {
        assert_eq!(local_name("http://x.org/a#b"), "b");
        assert_eq!(local_name("http://x.org/a/c"), "c");
        assert_eq!(local_name("plain"), "plain");
    }
}
