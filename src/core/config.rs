//! Loader session configuration: base path, aliases, id variables, locator
//! map rules, preloads, and the fetch charset hint.
//!
//! `Config` is the typed in-process store; `ConfigFile` is its YAML form for
//! the CLI. Merging follows append/replace rules per field: `alias` and
//! `vars` merge per key (a changed value is logged), `map` and `preload`
//! append, scalar fields replace.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use super::error::ConfigError;
use super::resolver;

/// A locator rewrite rule, applied after normalization (first match wins).
#[derive(Clone)]
pub enum MapRule {
    /// Replace the first match of `pattern` with `replacement`.
    Pattern { pattern: Regex, replacement: String },
    /// Arbitrary rewrite; `None` means "no match, try the next rule".
    Func(Arc<dyn Fn(&str) -> Option<String> + Send + Sync>),
}

impl MapRule {
    pub fn pattern(pattern: Regex, replacement: impl Into<String>) -> Self {
        MapRule::Pattern {
            pattern,
            replacement: replacement.into(),
        }
    }

    pub fn func(f: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        MapRule::Func(Arc::new(f))
    }
}

impl fmt::Debug for MapRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapRule::Pattern {
                pattern,
                replacement,
            } => f
                .debug_struct("Pattern")
                .field("pattern", &pattern.as_str())
                .field("replacement", replacement)
                .finish(),
            MapRule::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// The configuration store read by the resolver and the fetch coordinator.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Base path for top-level identifiers.
    pub base: String,
    /// Referencing locator for top-level requests (the entry context).
    pub context: String,
    /// Wholesale substitutions for top-level identifiers.
    pub alias: IndexMap<String, String>,
    /// Values for `{name}` placeholders.
    pub vars: IndexMap<String, String>,
    /// Ordered locator rewrite rules.
    pub map: Vec<MapRule>,
    /// Identifiers loaded (and discarded) before the first top-level load.
    pub preload: Vec<String>,
    /// Charset hint forwarded to the asset fetcher.
    pub charset: Option<String>,
}

/// A partial configuration merged into a `Config` with `apply`.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub base: Option<String>,
    pub context: Option<String>,
    pub alias: IndexMap<String, String>,
    pub vars: IndexMap<String, String>,
    pub map: Vec<MapRule>,
    pub preload: Vec<String>,
    pub charset: Option<String>,
}

impl Config {
    /// Merge a patch into this configuration.
    pub fn apply(&mut self, patch: ConfigPatch) {
        merge_keyed(&mut self.alias, patch.alias, "alias");
        merge_keyed(&mut self.vars, patch.vars, "vars");
        self.map.extend(patch.map);
        self.preload.extend(patch.preload);

        if let Some(context) = patch.context {
            self.context = context;
        }
        if let Some(charset) = patch.charset {
            self.charset = Some(charset);
        }
        if let Some(base) = patch.base {
            self.base = base;
            self.make_base_absolute();
        }
    }

    /// Resolve a non-absolute base against the context so every top-level
    /// identifier lands on an absolute locator. The trailing slash keeps the
    /// resolver from appending a default extension.
    fn make_base_absolute(&mut self) {
        if resolver::is_absolute(&self.base) {
            return;
        }
        let id = if resolver::is_root(&self.base) {
            self.base.trim_end_matches('/').to_string()
        } else {
            format!("./{}", self.base.trim_end_matches('/'))
        };
        let snapshot = self.clone();
        match resolver::resolve(&format!("{id}/"), &snapshot.context, &snapshot) {
            Ok(abs) => self.base = abs,
            Err(e) => tracing::warn!(base = %self.base, error = %e, "base left as-is"),
        }
    }
}

fn merge_keyed(into: &mut IndexMap<String, String>, from: IndexMap<String, String>, what: &str) {
    for (key, value) in from {
        if let Some(prev) = into.get(&key) {
            if prev != &value {
                tracing::warn!(%key, from = %prev, to = %value, "{what} entry changed");
            }
        }
        into.insert(key, value);
    }
}

/// YAML form of a configuration patch.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub base: Option<String>,
    pub context: Option<String>,
    pub alias: IndexMap<String, String>,
    pub vars: IndexMap<String, String>,
    pub map: Vec<MapEntry>,
    pub preload: Vec<String>,
    pub charset: Option<String>,
}

/// One pattern/replacement map rule in file form.
#[derive(Debug, Clone, Deserialize)]
pub struct MapEntry {
    pub pattern: String,
    pub replacement: String,
}

impl ConfigFile {
    /// Load a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Compile the file form into an applicable patch.
    pub fn into_patch(self) -> Result<ConfigPatch, ConfigError> {
        let mut map = Vec::with_capacity(self.map.len());
        for entry in self.map {
            let pattern = Regex::new(&entry.pattern).map_err(|source| ConfigError::Pattern {
                pattern: entry.pattern.clone(),
                source: Box::new(source),
            })?;
            map.push(MapRule::pattern(pattern, entry.replacement));
        }
        Ok(ConfigPatch {
            base: self.base,
            context: self.context,
            alias: self.alias,
            vars: self.vars,
            map,
            preload: self.preload,
            charset: self.charset,
        })
    }
}
