//! Task definitions (PRDs) listed in the project's `.prd-files` index.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

/// Load every task definition named in `index`, one path per line.
///
/// Relative paths are resolved against `project_dir`. Entries that cannot be
/// read or are not JSON objects are skipped; a missing index yields an empty
/// list. Each definition gains a `file` field with its base filename, unless
/// it already carries one.
pub async fn load_task_definitions(project_dir: &Path, index: &Path) -> Vec<Value> {
    let listing = match tokio::fs::read_to_string(index).await {
        Ok(listing) => listing,
        Err(err) => {
            debug!(index = %index.display(), error = %err, "no task index");
            return Vec::new();
        }
    };

    let mut definitions = Vec::new();
    for entry in listing.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let path = project_dir.join(entry);
        match load_definition(&path).await {
            Some(definition) => definitions.push(definition),
            None => debug!(path = %path.display(), "skipping unreadable task definition"),
        }
    }
    definitions
}

async fn load_definition(path: &Path) -> Option<Value> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    let Value::Object(fields) = serde_json::from_str(&contents).ok()? else {
        return None;
    };

    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut definition = Map::new();
    definition.insert("file".to_string(), Value::String(file));
    definition.extend(fields);
    Some(Value::Object(definition))
}
