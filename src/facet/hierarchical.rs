use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::{
    state_mismatch, value_label, EntryOrder, Facet, FacetConfig, FacetContext, FacetEntry, FacetState,
    HierarchicalSelection,
};
use crate::database::Database;
use crate::datatype::ValueType;
use crate::error::Result;
use crate::expression::Expression;
use crate::set::{KeyHasher, Set};

/// A displayed tree node. A child with `select_others` stands for the items
/// holding the parent value itself rather than one of its children.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyEntry {
    pub entry: FacetEntry,
    pub select_others: bool,
    pub children: Vec<HierarchyEntry>,
}

#[derive(Debug, Default)]
struct Tree {
    value_to_items: HashMap<String, Set, KeyHasher>,
    missing_items: Set,
    children: HashMap<String, BTreeSet<String>, KeyHasher>,
    parents: HashMap<String, BTreeSet<String>, KeyHasher>,
    roots: BTreeSet<String>,
    value_type: ValueType,
}

impl Tree {
    fn build(ctx: &FacetContext, expression: &Expression, grouping: Option<&Expression>) -> Result<Self> {
        let mut tree = Tree { value_type: ValueType::Item, ..Tree::default() };
        for item in ctx.all_items.iter() {
            let results = expression.evaluate_on_item(item, ctx.database)?;
            if results.size() > 0 {
                tree.value_type = results.value_type.clone();
                for value in results.iter() {
                    tree.value_to_items.entry(value.to_string()).or_default().add(item);
                }
            } else {
                tree.missing_items.add(item);
            }
        }
        let mut known: Set = tree.value_to_items.keys().map(String::as_str).collect();
        let mut frontier = known.to_sorted_vec();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for value in frontier {
                let parents = match grouping {
                    Some(grouping) => grouping.evaluate_on_item(&value, ctx.database)?,
                    None => {
                        tree.roots.insert(value);
                        continue;
                    }
                };
                if parents.size() == 0 {
                    tree.roots.insert(value);
                    continue;
                }
                for parent in parents.iter() {
                    tree.parents.entry(value.clone()).or_default().insert(parent.to_string());
                    tree.children.entry(parent.to_string()).or_default().insert(value.clone());
                    if known.add(parent) {
                        next.push(parent.to_string());
                    }
                }
            }
            frontier = next;
        }
        debug!(values = known.size(), roots = tree.roots.len(), "hierarchy built");
        Ok(tree)
    }

    // walks a relation transitively; the visited set guards against cycles
    fn closure(relation: &HashMap<String, BTreeSet<String>, KeyHasher>, start: &str) -> Set {
        let mut visited = Set::new();
        let mut stack = vec![start.to_string()];
        while let Some(value) = stack.pop() {
            if let Some(next) = relation.get(&value) {
                for other in next {
                    if other != start && visited.add(other.as_str()) {
                        stack.push(other.clone());
                    }
                }
            }
        }
        visited
    }

    fn ancestors(&self, value: &str) -> Set {
        Self::closure(&self.parents, value)
    }

    fn descendants(&self, value: &str) -> Set {
        Self::closure(&self.children, value)
    }

    fn items_of(&self, value: &str) -> Option<&Set> {
        self.value_to_items.get(value)
    }
}

/// Restricts by values arranged in a tree by a grouping expression mapping
/// each value to its parents. Selecting a node takes in its whole subtree.
#[derive(Debug)]
pub struct HierarchicalFacet {
    id: String,
    label: String,
    expression: Option<Expression>,
    grouping: Option<Expression>,
    order: EntryOrder,
    show_missing: bool,
    missing_label: String,
    others_label: String,
    selections: Vec<HierarchicalSelection>,
    tree: OnceCell<Tree>,
    entries: Vec<HierarchyEntry>,
}

impl HierarchicalFacet {
    pub fn new(id: &str, expression: Option<Expression>, grouping: Option<Expression>) -> Self {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            expression,
            grouping,
            order: EntryOrder::default(),
            show_missing: true,
            missing_label: "(missing this field)".to_string(),
            others_label: "(others)".to_string(),
            selections: Vec::new(),
            tree: OnceCell::new(),
            entries: Vec::new(),
        }
    }

    pub fn from_config(id: &str, config: &FacetConfig) -> Self {
        let grouping = config.uniform_grouping.as_ref().and_then(|source| {
            let grouping = FacetConfig { expression: Some(source.clone()), ..FacetConfig::default() };
            grouping.parsed_expression(id)
        });
        let mut facet = Self::new(id, config.parsed_expression(id), grouping);
        facet.label = config.facet_label.clone().unwrap_or_else(|| id.to_string());
        facet.order = config.order();
        facet.show_missing = config.show_missing.unwrap_or(true);
        if let Some(label) = &config.missing_label {
            facet.missing_label = label.clone();
        }
        if let Some(label) = &config.others_label {
            facet.others_label = label.clone();
        }
        facet
    }

    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn selections(&self) -> &[HierarchicalSelection] {
        &self.selections
    }
    pub fn entries(&self) -> &[HierarchyEntry] {
        &self.entries
    }

    fn tree(&self, ctx: &FacetContext) -> Result<Option<&Tree>> {
        let Some(expression) = &self.expression else {
            return Ok(None);
        };
        if let Some(tree) = self.tree.get() {
            return Ok(Some(tree));
        }
        let tree = Tree::build(ctx, expression, self.grouping.as_ref())?;
        Ok(Some(self.tree.get_or_init(|| tree)))
    }

    // A normal selection excludes its ancestors and everything below it;
    // an "others" selection only excludes its ancestors and its own node.
    fn add_selection(tree: &Tree, selections: &mut Vec<HierarchicalSelection>, selection: HierarchicalSelection) {
        if let Some(value) = selection.value.as_deref() {
            let ancestors = tree.ancestors(value);
            selections.retain(|s| !(s.value.as_deref().is_some_and(|v| ancestors.contains(v)) && !s.select_others));
            if selection.select_others {
                selections.retain(|s| !(s.value.as_deref() == Some(value) && !s.select_others));
            } else {
                let descendants = tree.descendants(value);
                selections.retain(|s| !s.value.as_deref().is_some_and(|v| descendants.contains(v)));
                selections.retain(|s| !(s.value.as_deref() == Some(value) && s.select_others));
            }
        }
        if !selections.contains(&selection) {
            selections.push(selection);
        }
    }

    /// Clicking a node. `None` is the missing-value entry.
    pub fn toggle(
        &mut self,
        ctx: &FacetContext,
        value: Option<&str>,
        select_others: bool,
        select_only: bool,
    ) -> Result<bool> {
        let selection = HierarchicalSelection { value: value.map(str::to_string), select_others };
        let was_selected = self.selections.contains(&selection);
        let next = if select_only {
            if was_selected && self.selections.len() == 1 { Vec::new() } else { vec![selection] }
        } else if was_selected {
            self.selections.iter().filter(|s| **s != selection).cloned().collect()
        } else {
            let mut next = self.selections.clone();
            match self.tree(ctx)? {
                Some(tree) => Self::add_selection(tree, &mut next, selection),
                None => next.push(selection),
            }
            next
        };
        let changed = next != self.selections;
        self.selections = next;
        Ok(changed)
    }

    fn node(
        &self,
        tree: &Tree,
        database: &Database,
        value: &str,
        items: &Set,
        visited: &mut Set,
    ) -> Option<(HierarchyEntry, Set)> {
        let selected = self.selections.iter().any(|s| s.value.as_deref() == Some(value) && !s.select_others);
        let label = value_label(database, value, &tree.value_type);
        let own = tree.items_of(value).map(|held| Set::create_intersection(held, items, None)).unwrap_or_default();
        match tree.children.get(value) {
            Some(children) => {
                let mut superset = Set::new();
                let mut child_entries = Vec::new();
                for child in children {
                    if !visited.add(child.as_str()) {
                        continue;
                    }
                    if let Some((entry, subset)) = self.node(tree, database, child, items, visited) {
                        superset.add_set(&subset);
                        child_entries.push(entry);
                    }
                }
                child_entries.sort_by(|a, b| self.order.compare(&a.entry, &b.entry, &tree.value_type));
                if own.size() > 0 {
                    let others_selected =
                        self.selections.iter().any(|s| s.value.as_deref() == Some(value) && s.select_others);
                    child_entries.push(HierarchyEntry {
                        entry: FacetEntry {
                            value: Some(value.to_string()),
                            label: self.others_label.clone(),
                            count: own.size(),
                            selected: others_selected,
                        },
                        select_others: true,
                        children: Vec::new(),
                    });
                    superset.add_set(&own);
                }
                let entry = FacetEntry { value: Some(value.to_string()), label, count: superset.size(), selected };
                (selected || superset.size() > 0 || !child_entries.is_empty())
                    .then(|| (HierarchyEntry { entry, select_others: false, children: child_entries }, superset))
            }
            None => (own.size() > 0 || selected).then(|| {
                let entry = FacetEntry { value: Some(value.to_string()), label, count: own.size(), selected };
                (HierarchyEntry { entry, select_others: false, children: Vec::new() }, own)
            }),
        }
    }
}

impl Facet for HierarchicalFacet {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_restrictions(&self) -> bool {
        !self.selections.is_empty()
    }

    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        if !self.has_restrictions() {
            return Ok(items.clone());
        }
        let Some(tree) = self.tree(ctx)? else {
            return Ok(items.clone());
        };
        let mut set = Set::new();
        for selection in &self.selections {
            match selection.value.as_deref() {
                None => set = Set::create_intersection(&tree.missing_items, items, Some(set)),
                Some(value) if selection.select_others => {
                    if let Some(held) = tree.items_of(value) {
                        set = Set::create_intersection(held, items, Some(set));
                    }
                }
                Some(value) => {
                    let mut subtree = tree.descendants(value);
                    subtree.add(value);
                    for member in subtree.iter() {
                        if let Some(held) = tree.items_of(member) {
                            set = Set::create_intersection(held, items, Some(set));
                        }
                    }
                }
            }
        }
        Ok(set)
    }

    fn update(&mut self, ctx: &FacetContext, items: &Set) -> Result<()> {
        if self.expression.is_none() {
            self.entries.clear();
            return Ok(());
        }
        let Some(tree) = self.tree(ctx)? else {
            return Ok(());
        };
        let mut visited = Set::new();
        let mut entries = Vec::new();
        for root in &tree.roots {
            visited.add(root.as_str());
            if let Some((entry, _)) = self.node(tree, ctx.database, root, items, &mut visited) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| self.order.compare(&a.entry, &b.entry, &tree.value_type));
        let missing_selected = self.selections.iter().any(|s| s.value.is_none());
        if self.show_missing || missing_selected {
            let count = Set::create_intersection(&tree.missing_items, items, None).size();
            if count > 0 || missing_selected {
                let entry = FacetEntry { value: None, label: self.missing_label.clone(), count, selected: missing_selected };
                entries.insert(0, HierarchyEntry { entry, select_others: false, children: Vec::new() });
            }
        }
        self.entries = entries;
        Ok(())
    }

    fn clear_all_restrictions(&mut self) -> FacetState {
        let state = self.export_state();
        self.selections.clear();
        state
    }

    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()> {
        match state {
            FacetState::Hierarchical { selections } => {
                self.selections = selections.clone();
                Ok(())
            }
            other => Err(state_mismatch(&self.id, other)),
        }
    }

    fn export_state(&self) -> FacetState {
        let mut selections = self.selections.clone();
        selections.sort();
        FacetState::Hierarchical { selections }
    }

    fn export_empty_state(&self) -> FacetState {
        FacetState::Hierarchical { selections: Vec::new() }
    }

    fn on_root_items_changed(&mut self) {
        self.tree.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse;
    use serde_json::json;

    // animal > mammal > cat, animal > bird
    fn database() -> Database {
        let mut database = Database::new();
        database
            .load_data(
                &json!({
                    "properties": { "kind": { "valueType": "item" }, "parent": { "valueType": "item" } },
                    "items": [
                        { "label": "animal" },
                        { "label": "mammal", "parent": "animal" },
                        { "label": "cat", "parent": "mammal" },
                        { "label": "bird", "parent": "animal" },
                        { "label": "tom", "kind": "cat" },
                        { "label": "rex", "kind": "mammal" },
                        { "label": "tweety", "kind": "bird" },
                        { "label": "rock" }
                    ]
                }),
                "http://example.org/",
            )
            .unwrap();
        database
    }

    fn facet() -> HierarchicalFacet {
        HierarchicalFacet::new("kind", Some(parse(".kind").unwrap()), Some(parse(".parent").unwrap()))
    }

    fn pets(database: &Database) -> Set {
        ["tom", "rex", "tweety", "rock"].into_iter().filter(|i| database.contains_item(i)).collect()
    }

    #[test]
    fn selecting_a_node_takes_its_subtree() {
        let database = database();
        let items = pets(&database);
        let ctx = FacetContext { database: &database, all_items: &items };
        let mut facet = facet();
        facet.toggle(&ctx, Some("mammal"), false, false).unwrap();
        assert_eq!(facet.restrict(&ctx, &items).unwrap().to_sorted_vec(), vec!["rex", "tom"]);
        facet.toggle(&ctx, Some("mammal"), true, true).unwrap();
        assert_eq!(facet.restrict(&ctx, &items).unwrap().to_sorted_vec(), vec!["rex"]);
        facet.toggle(&ctx, None, false, true).unwrap();
        assert_eq!(facet.restrict(&ctx, &items).unwrap().to_sorted_vec(), vec!["rock"]);
    }

    #[test]
    fn selections_exclude_ancestors_and_descendants() {
        let database = database();
        let items = pets(&database);
        let ctx = FacetContext { database: &database, all_items: &items };
        let mut facet = facet();
        facet.toggle(&ctx, Some("cat"), false, false).unwrap();
        facet.toggle(&ctx, Some("bird"), false, false).unwrap();
        // selecting an ancestor drops the selected descendants
        facet.toggle(&ctx, Some("animal"), false, false).unwrap();
        assert_eq!(
            facet.selections(),
            &[HierarchicalSelection { value: Some("animal".into()), select_others: false }]
        );
        // selecting a descendant drops the ancestor
        facet.toggle(&ctx, Some("cat"), false, false).unwrap();
        assert_eq!(facet.selections(), &[HierarchicalSelection { value: Some("cat".into()), select_others: false }]);
        facet.toggle(&ctx, Some("mammal"), true, false).unwrap();
        assert_eq!(facet.selections().len(), 2);
        facet.toggle(&ctx, Some("mammal"), false, false).unwrap();
        assert_eq!(
            facet.selections(),
            &[HierarchicalSelection { value: Some("mammal".into()), select_others: false }]
        );
    }

    #[test]
    fn entries_form_a_tree_with_others() {
        let database = database();
        let items = pets(&database);
        let ctx = FacetContext { database: &database, all_items: &items };
        let mut facet = facet();
        facet.update(&ctx, &items).unwrap();
        let entries = facet.entries();
        assert_eq!(entries[0].entry.value, None);
        assert_eq!(entries[0].entry.count, 1);
        let animal = &entries[1];
        assert_eq!(animal.entry.label, "animal");
        assert_eq!(animal.entry.count, 3);
        let labels: Vec<_> = animal.children.iter().map(|c| c.entry.label.as_str()).collect();
        assert_eq!(labels, vec!["bird", "mammal"]);
        let mammal = &animal.children[1];
        let labels: Vec<_> = mammal.children.iter().map(|c| (c.entry.label.as_str(), c.select_others)).collect();
        assert_eq!(labels, vec![("cat", false), ("(others)", true)]);
    }

    #[test]
    fn state_round_trip() {
        let database = database();
        let items = pets(&database);
        let ctx = FacetContext { database: &database, all_items: &items };
        let mut facet = facet();
        facet.toggle(&ctx, Some("cat"), false, false).unwrap();
        facet.toggle(&ctx, Some("bird"), false, false).unwrap();
        let state = facet.export_state();
        assert!(!facet.state_differs(&state));
        assert!(!facet.import_state(&state).unwrap());
        let cleared = facet.clear_all_restrictions();
        assert_eq!(cleared, state);
        assert!(facet.import_state(&state).unwrap());
        assert_eq!(facet.selections().len(), 2);
    }
}
