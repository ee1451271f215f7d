use std::time::{Duration, Instant};

use exhibit::collection::Collection;
use exhibit::database::Database;
use exhibit::exhibit::{CollectionConfig, Exhibit, ExhibitState, DEFAULT_COLLECTION};
use exhibit::expression::parse;
use exhibit::facet::{
    Facet, FacetConfig, FacetContext, FacetKind, FacetState, HierarchicalSelection, ListFacet, NumericRangeFacet,
};
use exhibit::settings::{ErrorPolicy, Settings};
use exhibit::Result;
use serde_json::json;

fn tagged() -> Database {
    let mut db = Database::new();
    db.load_data(
        &json!({
            "items": [
                { "label": "a", "tag": "v", "size": "big" },
                { "label": "b", "tag": "w", "size": "big" },
                { "label": "c", "tag": "v", "size": "small" }
            ]
        }),
        "http://example.org/",
    )
    .expect("load ok");
    db
}

fn list(id: &str, source: &str, selected: &[&str]) -> FacetKind {
    let mut facet = ListFacet::new(id, Some(parse(source).expect("parse ok")));
    facet.set_selection(selected.iter().copied(), false);
    FacetKind::List(facet)
}

fn counts(facet: Option<&FacetKind>) -> Vec<(String, usize)> {
    match facet {
        Some(FacetKind::List(list)) => list.entries().iter().filter_map(|e| e.value.clone().map(|v| (v, e.count))).collect(),
        _ => Vec::new(),
    }
}

#[test]
fn single_facet_restriction() {
    let db = tagged();
    let mut collection = Collection::all_items("items");
    collection.on_root_items_changed(&db).expect("root ok");
    collection.add_facet(&db, list("tag", ".tag", &["v"])).expect("facet ok");
    assert_eq!(collection.get_restricted_items().to_sorted_vec(), vec!["a", "c"]);
    assert_eq!(collection.count_restricted_items(), 2);
    assert_eq!(collection.count_all_items(), 3);
}

#[test]
fn cross_counting_uses_the_other_facets() {
    let db = tagged();
    let mut collection = Collection::all_items("items");
    collection.on_root_items_changed(&db).expect("root ok");
    collection.add_facet(&db, list("tag", ".tag", &["v"])).expect("facet ok");
    collection.add_facet(&db, list("size", ".size", &[])).expect("facet ok");
    collection.update_facets(&db).expect("update ok");
    // the unselected facet sees everything the selected one lets through
    assert_eq!(counts(collection.facet("size")), vec![("big".into(), 1), ("small".into(), 1)]);
    // and the selected one, being alone, sees all items
    assert_eq!(counts(collection.facet("tag")), vec![("v".into(), 2), ("w".into(), 1)]);

    collection
        .with_facet(&db, "size", |facet, _| Ok(facet.as_list_mut().is_some_and(|l| l.toggle(Some("big"), false))))
        .expect("toggle ok");
    assert_eq!(collection.get_restricted_items().to_sorted_vec(), vec!["a"]);
    // tag counts over the items with size big, size over the items tagged v
    assert_eq!(counts(collection.facet("tag")), vec![("v".into(), 1), ("w".into(), 1)]);
    assert_eq!(counts(collection.facet("size")), vec![("big".into(), 1), ("small".into(), 1)]);
}

#[test]
fn export_then_import_changes_nothing() {
    let db = tagged();
    let all = db.get_all_items();
    let ctx = FacetContext { database: &db, all_items: &all };
    let mut facets = vec![
        list("tag", ".tag", &["w", "v"]),
        FacetKind::NumericRange(NumericRangeFacet::new("n", None, 10.0)),
    ];
    if let FacetKind::NumericRange(range) = &mut facets[1] {
        range.toggle_range(10.0, 20.0, false);
        range.toggle_range(0.0, 10.0, false);
    }
    for facet in facets.iter_mut() {
        let state = facet.export_state();
        assert!(!facet.state_differs(&state));
        let before = facet.restrict(&ctx, &all).expect("restrict ok");
        assert!(!facet.import_state(&state).expect("import ok"));
        assert!(!facet.state_differs(&state));
        assert_eq!(facet.restrict(&ctx, &all).expect("restrict ok"), before);
        let json = serde_json::to_string(&state).expect("serialize ok");
        let back: FacetState = serde_json::from_str(&json).expect("deserialize ok");
        assert!(!facet.state_differs(&back));
    }
}

#[test]
fn numeric_range_end_to_end() {
    let mut exhibit = Exhibit::new(Settings::default());
    exhibit
        .load_data(
            &json!({ "items": [
                { "label": "Alice", "type": "Person", "age": 30 },
                { "label": "Bob", "type": "Person", "age": 45 }
            ] }),
            None,
        )
        .expect("load ok");
    let config = FacetConfig {
        id: Some("age".into()),
        facet_class: Some("NumericRange".into()),
        expression: Some(".age".into()),
        interval: Some(20.0),
        ..FacetConfig::default()
    };
    exhibit.add_facet(DEFAULT_COLLECTION, &config).expect("facet ok");
    let selected = exhibit
        .update_facet(DEFAULT_COLLECTION, "age", |facet, _| match facet {
            FacetKind::NumericRange(range) => Ok(range.toggle_range(40.0, 60.0, false)),
            _ => Ok(false),
        })
        .expect("select ok");
    assert!(selected);
    let collection = exhibit.default_collection().expect("default collection");
    assert_eq!(collection.get_restricted_items().to_sorted_vec(), vec!["Bob"]);
    match collection.facet("age") {
        Some(FacetKind::NumericRange(range)) => {
            let buckets: Vec<_> = range.entries().iter().map(|e| (e.label.as_str(), e.count, e.selected)).collect();
            assert_eq!(buckets, vec![("20 - 40", 1, false), ("40 - 60", 1, true)]);
        }
        other => panic!("unexpected facet {other:?}"),
    }
}

fn library() -> Exhibit {
    let mut exhibit = Exhibit::new(Settings { errors: ErrorPolicy::Throw, ..Settings::default() });
    exhibit
        .load_data(
            &json!({
                "properties": {
                    "author": { "valueType": "item" },
                    "genre": { "valueType": "item" },
                    "within": { "valueType": "item" }
                },
                "items": [
                    { "label": "fiction" },
                    { "label": "horror", "within": "fiction" },
                    { "label": "romance", "within": "fiction" },
                    { "label": "Austen", "type": "Author", "born": 1775, "home": "Bath", "country": "England" },
                    { "label": "Stoker", "type": "Author", "born": 1847, "home": "Dublin", "country": "Ireland" },
                    { "label": "Emma", "type": "Book", "author": "Austen", "genre": "romance" },
                    { "label": "Dracula", "type": "Book", "author": "Stoker", "genre": "horror" },
                    { "label": "Essays", "type": "Book", "genre": "fiction" },
                    { "label": "Atlas", "type": "Book" }
                ]
            }),
            Some("http://example.org/"),
        )
        .expect("load ok");
    exhibit
        .create_collection(&CollectionConfig {
            id: Some("books".into()),
            item_types: Some(vec!["Book".into()]),
            ..CollectionConfig::default()
        })
        .expect("collection ok");
    exhibit
}

fn pick(value: &'static str, others: bool) -> impl FnOnce(&mut FacetKind, &FacetContext) -> Result<bool> {
    move |facet, ctx| match facet {
        FacetKind::Hierarchical(tree) => tree.toggle(ctx, Some(value), others, false),
        _ => Ok(false),
    }
}

#[test]
fn hierarchical_selection_through_the_exhibit() {
    let mut exhibit = library();
    let config: FacetConfig = serde_json::from_value(json!({
        "id": "genre",
        "facetClass": "Hierarchical",
        "expression": ".genre",
        "uniformGrouping": ".within"
    }))
    .expect("config ok");
    exhibit.add_facet("books", &config).expect("facet ok");
    exhibit.update_facet("books", "genre", pick("fiction", false)).expect("select ok");
    let restricted = |exhibit: &Exhibit| exhibit.collection("books").map(|c| c.get_restricted_items().to_sorted_vec());
    assert_eq!(restricted(&exhibit).expect("books"), vec!["Dracula", "Emma", "Essays"]);
    exhibit.update_facet("books", "genre", pick("horror", false)).expect("select ok");
    assert_eq!(restricted(&exhibit).expect("books"), vec!["Dracula"]);
    exhibit.update_facet("books", "genre", pick("fiction", true)).expect("select ok");
    assert_eq!(restricted(&exhibit).expect("books"), vec!["Dracula", "Essays"]);
    let state = exhibit.export_state();
    let expected = FacetState::Hierarchical {
        selections: vec![
            HierarchicalSelection { value: Some("fiction".into()), select_others: true },
            HierarchicalSelection { value: Some("horror".into()), select_others: false },
        ],
    };
    assert_eq!(state["books"]["genre"], expected);
}

#[test]
fn restricting_collection_feeds_back_into_its_base() {
    let mut exhibit = library();
    exhibit
        .create_collection(&CollectionConfig {
            id: Some("authors".into()),
            base_collection_id: Some("books".into()),
            expression: Some(".author".into()),
            restrict_base_collection: true,
            ..CollectionConfig::default()
        })
        .expect("collection ok");
    let authors = exhibit.collection("authors").expect("authors");
    assert_eq!(authors.get_all_items().to_sorted_vec(), vec!["Austen", "Stoker"]);
    let config = FacetConfig {
        id: Some("born".into()),
        facet_class: Some("NumericRange".into()),
        expression: Some(".born".into()),
        interval: Some(100.0),
        ..FacetConfig::default()
    };
    exhibit.add_facet("authors", &config).expect("facet ok");
    exhibit
        .update_facet("authors", "born", |facet, _| match facet {
            FacetKind::NumericRange(range) => Ok(range.toggle_range(1800.0, 1900.0, true)),
            _ => Ok(false),
        })
        .expect("select ok");
    assert_eq!(exhibit.collection("authors").map(|c| c.get_restricted_items().to_sorted_vec()), Some(vec!["Stoker".to_string()]));
    assert_eq!(exhibit.collection("books").map(|c| c.get_restricted_items().to_sorted_vec()), Some(vec!["Dracula".to_string()]));
    // a book facet narrows the authors' root
    exhibit.add_facet("books", &FacetConfig { id: Some("genre".into()), expression: Some(".genre".into()), ..FacetConfig::default() }).expect("facet ok");
    exhibit
        .update_facet("books", "genre", |facet, _| Ok(facet.as_list_mut().is_some_and(|l| l.toggle(Some("romance"), false))))
        .expect("select ok");
    assert_eq!(exhibit.collection("authors").map(|c| c.get_all_items().to_sorted_vec()), Some(vec!["Austen".to_string()]));
    assert!(exhibit.collection("books").is_some_and(|c| c.get_restricted_items().is_empty()));
    let cleared: ExhibitState = exhibit.clear_all_restrictions().expect("clear ok");
    assert_eq!(exhibit.collection("books").map(|c| c.count_restricted_items()), Some(4));
    exhibit.apply_restrictions(&cleared).expect("apply ok");
    assert!(exhibit.collection("books").is_some_and(|c| c.get_restricted_items().is_empty()));
}

fn sorted(exhibit: &Exhibit, collection: &str, restricted: bool) -> Vec<String> {
    let collection = exhibit.collection(collection).expect("collection exists");
    let items = if restricted { collection.get_restricted_items() } else { collection.get_all_items() };
    items.to_sorted_vec()
}

#[test]
fn collections_based_on_a_restricting_collection_follow_it() {
    let mut exhibit = library();
    for (id, base, source, restricting) in [("authors", "books", ".author", true), ("homes", "authors", ".home", false)] {
        exhibit
            .create_collection(&CollectionConfig {
                id: Some(id.into()),
                base_collection_id: Some(base.into()),
                expression: Some(source.into()),
                restrict_base_collection: restricting,
                ..CollectionConfig::default()
            })
            .expect("collection ok");
    }
    assert_eq!(sorted(&exhibit, "homes", false), vec!["Bath", "Dublin"]);
    let country = FacetConfig { id: Some("country".into()), expression: Some(".country".into()), ..FacetConfig::default() };
    exhibit.add_facet("authors", &country).expect("facet ok");
    exhibit
        .update_facet("authors", "country", |facet, _| {
            Ok(facet.as_list_mut().is_some_and(|l| l.toggle(Some("England"), false)))
        })
        .expect("select ok");
    assert_eq!(sorted(&exhibit, "authors", true), vec!["Austen"]);
    assert_eq!(sorted(&exhibit, "books", true), vec!["Emma"]);
    assert_eq!(sorted(&exhibit, "homes", false), vec!["Bath"]);
    exhibit.clear_all_restrictions().expect("clear ok");
    assert_eq!(sorted(&exhibit, "homes", false), vec!["Bath", "Dublin"]);
}

#[test]
fn failed_import_leaves_consistent_items() {
    let mut exhibit = library();
    let author = FacetConfig { id: Some("author".into()), expression: Some(".author".into()), ..FacetConfig::default() };
    exhibit.add_facet("books", &author).expect("facet ok");
    let search = FacetConfig { id: Some("q".into()), facet_class: Some("TextSearch".into()), ..FacetConfig::default() };
    exhibit.add_facet("books", &search).expect("facet ok");
    let state: ExhibitState = serde_json::from_value(json!({
        "books": {
            "author": { "selection": ["Austen"] },
            "q": { "ranges": [] }
        }
    }))
    .expect("state ok");
    assert!(exhibit.import_state(&state).is_err());
    // the author selection went in before the bad state was met
    let exported = exhibit.export_state();
    assert_eq!(exported["books"]["author"], FacetState::List { selection: vec!["Austen".into()], select_missing: false });
    assert_eq!(sorted(&exhibit, "books", true), vec!["Emma"]);
}

#[test]
fn debounced_text_search() {
    let mut exhibit = library();
    let config = FacetConfig { id: Some("q".into()), facet_class: Some("TextSearch".into()), expression: Some(".label".into()), ..FacetConfig::default() };
    exhibit.add_facet("books", &config).expect("facet ok");
    let start = Instant::now();
    exhibit.text_input("books", "q", "dr", start, false).expect("input ok");
    exhibit.text_input("books", "q", "em", start + Duration::from_millis(300), false).expect("input ok");
    assert!(!exhibit.tick(start + Duration::from_millis(600)).expect("tick ok"));
    assert!(exhibit.tick(start + Duration::from_millis(800)).expect("tick ok"));
    assert_eq!(exhibit.collection("books").map(|c| c.get_restricted_items().to_sorted_vec()), Some(vec!["Emma".to_string()]));
}
