//! Filesystem-backed asset fetcher.
//!
//! Serves `file://` locators (and root-relative locators joined to a root
//! directory). Two file forms are understood:
//!
//! - a JSON manifest, `{"id": …, "dependencies": […], "exports": …,
//!   "source": …}` with every field optional, or an array of such manifests
//!   for batch responses;
//! - anything else is treated as raw module source: dependencies are derived
//!   by the static extractor and the module exports nothing.
//!
//! A missing or unreadable file yields an empty response; the distinction is
//! invisible to the loader core by design.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use super::{AssetFetcher, FetchHint};
use crate::core::registry::{Definition, Factory};
use crate::extract;

const MANIFEST_KEYS: [&str; 4] = ["id", "dependencies", "exports", "source"];

/// Fetcher serving module files beneath a root directory.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileFetcher { root: root.into() }
    }

    /// Map a request locator to a filesystem path. Non-file schemes are not
    /// servable.
    fn locator_path(&self, locator: &str) -> Option<PathBuf> {
        let pre_query = locator.split('?').next().unwrap_or(locator);
        if let Some(path) = pre_query.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if pre_query.contains("://") || pre_query.starts_with("//") {
            return None;
        }
        Some(self.root.join(pre_query.trim_start_matches('/')))
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    async fn request(&self, locator: &str, _hint: &FetchHint) -> Vec<Definition> {
        let Some(path) = self.locator_path(locator) else {
            tracing::debug!(%locator, "unsupported scheme");
            return Vec::new();
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => parse_asset(&content),
            Err(e) => {
                tracing::debug!(%locator, path = %path.display(), error = %e, "fetch failed");
                Vec::new()
            }
        }
    }
}

/// Decode file content into definitions.
fn parse_asset(content: &str) -> Vec<Definition> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(ref map)) if is_manifest(map) => vec![manifest_definition(map)],
        Ok(Value::Array(items)) => {
            let manifests: Vec<Definition> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(map) if is_manifest(map) => Some(manifest_definition(map)),
                    _ => None,
                })
                .collect();
            if manifests.len() == items.len() && !manifests.is_empty() {
                manifests
            } else {
                source_definition(content)
            }
        }
        _ => source_definition(content),
    }
}

fn is_manifest(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| MANIFEST_KEYS.contains(&k.as_str()))
}

fn manifest_definition(map: &serde_json::Map<String, Value>) -> Definition {
    let id = map.get("id").and_then(Value::as_str).map(str::to_string);
    let dependencies = match map.get("dependencies").and_then(Value::as_array) {
        Some(deps) => Some(
            deps.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        // No explicit list: fall back to static extraction over the source.
        None => map
            .get("source")
            .and_then(Value::as_str)
            .map(extract::extract),
    };
    Definition {
        id,
        dependencies,
        factory: map.get("exports").cloned().map(Factory::Literal),
    }
}

fn source_definition(content: &str) -> Vec<Definition> {
    vec![Definition {
        id: None,
        dependencies: Some(extract::extract(content)),
        factory: Some(Factory::Literal(Value::Null)),
    }]
}

/// Convenience for CLI bootstrapping: the `file://` locator of a directory,
/// with a trailing slash.
pub fn dir_locator(dir: &Path) -> String {
    let mut locator = format!("file://{}", dir.display());
    if !locator.ends_with('/') {
        locator.push('/');
    }
    locator
}
