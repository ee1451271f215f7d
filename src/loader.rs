//! Loading of data links.
//!
//! Links are read one after another, never concurrently, so later files can
//! refer to items, types and properties declared by earlier ones. Each file
//! mints URIs relative to its own directory.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::exhibit::Exhibit;

/// Base URI for ids in the file at `path`: its directory as a `file:` URI.
pub fn base_uri_for(path: &Path) -> String {
    let directory = path
        .canonicalize()
        .ok()
        .and_then(|full| full.parent().map(Path::to_path_buf))
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let directory = directory.to_string_lossy().replace('\\', "/");
    let directory = directory.trim_end_matches('/');
    if directory.starts_with('/') {
        format!("file://{}/", directory)
    } else {
        format!("file:///{}/", directory)
    }
}

async fn read_link(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

/// Loads every link in order and returns how many loaded. A link that
/// cannot be read or parsed goes through the exhibit's error policy.
pub async fn load_links(exhibit: &mut Exhibit, links: &[PathBuf]) -> Result<usize> {
    let mut loaded = 0;
    for link in links {
        let result = read_link(link).await;
        let Some(data) = exhibit.reporter().report(&link.display().to_string(), result)? else {
            warn!(link = %link.display(), "skipping data link");
            continue;
        };
        exhibit.load_data(&data, Some(&base_uri_for(link)))?;
        info!(link = %link.display(), items = exhibit.database().get_all_items_count(), "data link loaded");
        loaded += 1;
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ErrorPolicy, Settings};
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn links_load_in_order() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path();
        let first = write(dir, "people.json", r#"{ "properties": { "knows": { "valueType": "item" } }, "items": [{ "label": "Ann" }] }"#);
        let second = write(dir, "more.json", r#"{ "items": [{ "label": "Bo", "knows": "Ann" }] }"#);
        let mut exhibit = Exhibit::new(Settings::default());
        let loaded = load_links(&mut exhibit, &[first.clone(), second]).await.unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(exhibit.default_collection().unwrap().count_all_items(), 2);
        let uri = exhibit.database().get_object("Ann", "uri").unwrap().to_string();
        assert!(uri.starts_with(&base_uri_for(&first)), "{}", uri);
        assert_eq!(exhibit.evaluate_on_item("!knows", "Ann").unwrap().to_vec(), vec!["Bo"]);
    }

    #[tokio::test]
    async fn bad_links_follow_the_error_policy() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path();
        let broken = write(dir, "broken.json", "{ not json");
        let good = write(dir, "good.json", r#"{ "items": [{ "label": "Ann" }] }"#);
        let mut strict = Exhibit::new(Settings { errors: ErrorPolicy::Throw, ..Settings::default() });
        assert!(load_links(&mut strict, &[broken.clone(), good.clone()]).await.is_err());
        let mut lenient = Exhibit::new(Settings { errors: ErrorPolicy::Log, ..Settings::default() });
        assert_eq!(load_links(&mut lenient, &[broken, dir.join("absent.json"), good]).await.unwrap(), 1);
    }

    #[test]
    fn base_uri_is_the_link_directory() {
        assert_eq!(base_uri_for(Path::new("/nonexistent/data/items.json")), "file:///nonexistent/data/");
    }
}
