use super::{Facet, FacetConfig, FacetContext, FacetEntry, FacetState, ListFacet};
use crate::error::Result;
use crate::set::Set;

/// A shown cloud value with its relative weight, 1 (rarest) to 5.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudEntry {
    pub entry: FacetEntry,
    pub weight: u8,
}

/// A list facet displayed as a weighted cloud. Values below the minimum
/// count are hidden unless selected.
#[derive(Debug)]
pub struct CloudFacet {
    list: ListFacet,
    minimum_count: usize,
    cloud: Vec<CloudEntry>,
}

impl CloudFacet {
    pub fn new(list: ListFacet, minimum_count: usize) -> Self {
        Self { list, minimum_count, cloud: Vec::new() }
    }

    pub fn from_config(id: &str, config: &FacetConfig) -> Self {
        Self::new(ListFacet::from_config(id, config), config.minimum_count.unwrap_or(1))
    }

    pub fn list(&self) -> &ListFacet {
        &self.list
    }
    pub fn list_mut(&mut self) -> &mut ListFacet {
        &mut self.list
    }
    pub fn minimum_count(&self) -> usize {
        self.minimum_count
    }
    pub fn entries(&self) -> &[CloudEntry] {
        &self.cloud
    }

    fn compute_cloud(&mut self) {
        let shown: Vec<&FacetEntry> = self
            .list
            .entries()
            .iter()
            .filter(|entry| entry.count >= self.minimum_count || entry.selected)
            .collect();
        let min = shown.iter().map(|entry| entry.count).min().unwrap_or(0);
        let max = shown.iter().map(|entry| entry.count).max().unwrap_or(0);
        let range = max - min;
        self.cloud = shown
            .into_iter()
            .map(|entry| {
                let weight = if range == 0 { 3 } else { 1 + (4 * (entry.count - min) + range / 2) / range };
                CloudEntry { entry: entry.clone(), weight: weight as u8 }
            })
            .collect();
    }
}

impl Facet for CloudFacet {
    fn id(&self) -> &str {
        self.list.id()
    }
    fn has_restrictions(&self) -> bool {
        self.list.has_restrictions()
    }
    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        self.list.restrict(ctx, items)
    }
    fn update(&mut self, ctx: &FacetContext, items: &Set) -> Result<()> {
        self.list.update(ctx, items)?;
        self.compute_cloud();
        Ok(())
    }
    fn clear_all_restrictions(&mut self) -> FacetState {
        self.list.clear_all_restrictions()
    }
    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()> {
        self.list.apply_restrictions(state)
    }
    fn export_state(&self) -> FacetState {
        self.list.export_state()
    }
    fn export_empty_state(&self) -> FacetState {
        self.list.export_empty_state()
    }
    fn state_differs(&self, state: &FacetState) -> bool {
        self.list.state_differs(state)
    }
    fn on_root_items_changed(&mut self) {
        self.list.on_root_items_changed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::expression::parse;
    use serde_json::json;

    #[test]
    fn hides_rare_values_unless_selected() {
        let mut database = Database::new();
        database
            .load_data(
                &json!({
                    "items": [
                        { "label": "a", "tag": ["common", "rare"] },
                        { "label": "b", "tag": "common" },
                        { "label": "c", "tag": ["common", "odd"] },
                        { "label": "d", "tag": "odd" }
                    ]
                }),
                "http://example.org/",
            )
            .unwrap();
        let all = database.get_all_items();
        let ctx = FacetContext { database: &database, all_items: &all };
        let mut facet = CloudFacet::new(ListFacet::new("tag", Some(parse(".tag").unwrap())), 2);
        facet.update(&ctx, &all).unwrap();
        let shown: Vec<_> = facet.entries().iter().map(|e| (e.entry.label.as_str(), e.weight)).collect();
        assert_eq!(shown, vec![("common", 5), ("odd", 1)]);
        facet.list_mut().toggle(Some("rare"), false);
        facet.update(&ctx, &all).unwrap();
        let shown: Vec<_> = facet.entries().iter().map(|e| e.entry.label.as_str()).collect();
        assert_eq!(shown, vec!["common", "odd", "rare"]);
        assert_eq!(facet.restrict(&ctx, &all).unwrap().to_sorted_vec(), vec!["a"]);
    }
}
