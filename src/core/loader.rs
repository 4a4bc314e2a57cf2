//! The loader session and its orchestration loop.
//!
//! A `Loader` owns one registry, one fetch board, one hook set, and one
//! asset fetcher; sessions are fully isolated from each other. `load` is the
//! top-level entry point: resolve identifiers, ensure the transitive
//! dependency closure is loaded, compile each requested module, and hand the
//! exports back in request order.
//!
//! `ensure_loaded` drives a set of locators to Loaded concurrently. A branch
//! whose fetch yields no definition finishes without advancing its module.
//! A branch caught in a circular wait is forced to Loaded early to avoid
//! deadlock, and is not revisited when its real dependencies finish later.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;
use tokio::task::JoinSet;

use super::config::{Config, ConfigPatch};
use super::error::ResolveError;
use super::fetch::FetchBoard;
use super::registry::{Definition, ModuleRecord, Registry, Status};
use super::resolver;
use crate::events::{HookSet, LoaderHooks};
use crate::transport::AssetFetcher;

/// One module-loading session.
pub struct Loader {
    pub(crate) config: RwLock<Config>,
    pub(crate) registry: Registry,
    pub(crate) board: FetchBoard,
    pub(crate) hooks: HookSet,
    pub(crate) fetcher: Arc<dyn AssetFetcher>,
    /// Back-reference for handing owned session handles to spawned branches
    /// and require capabilities.
    self_ref: Weak<Loader>,
}

impl Loader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Arc<Self> {
        Loader::with_config(Config::default(), fetcher)
    }

    pub fn with_config(config: Config, fetcher: Arc<dyn AssetFetcher>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Loader {
            config: RwLock::new(config),
            registry: Registry::new(),
            board: FetchBoard::new(),
            hooks: HookSet::new(),
            fetcher,
            self_ref: self_ref.clone(),
        })
    }

    /// Owned handle to this session. Valid for as long as any `&self` is,
    /// since the session is only ever constructed behind an `Arc`.
    pub(crate) fn strong(&self) -> Arc<Loader> {
        self.self_ref.upgrade().expect("loader session dropped")
    }

    /// Merge a configuration patch into the session.
    pub fn configure(&self, patch: ConfigPatch) {
        self.config
            .write()
            .expect("config lock poisoned")
            .apply(patch);
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn add_hook(&self, hook: Arc<dyn LoaderHooks>) {
        self.hooks.add(hook);
    }

    /// Resolve an identifier; `reference` defaults to the session context.
    pub fn resolve(&self, id: &str, reference: Option<&str>) -> Result<String, ResolveError> {
        let config = self.config();
        let reference = reference.unwrap_or(&config.context);
        resolver::resolve(id, reference, &config)
    }

    /// Register a definition programmatically. The definition must carry an
    /// explicit id: outside a fetch completion there is no locator to
    /// attribute an anonymous definition to, so those are dropped.
    pub fn register(&self, definition: Definition) -> bool {
        let config = self.config();
        match definition.id.as_deref() {
            Some(id) => match resolver::resolve(id, &config.context, &config) {
                Ok(target) => self.save_definition(&target, definition, &config),
                Err(e) => {
                    tracing::error!(%id, error = %e, "definition id failed to resolve; dropped");
                    false
                }
            },
            None => {
                tracing::warn!("anonymous definition outside a fetch; dropped");
                false
            }
        }
    }

    /// Snapshot of one module record.
    pub fn module(&self, locator: &str) -> Option<ModuleRecord> {
        self.registry.snapshot(locator)
    }

    /// Snapshots of every module record, ordered by locator.
    pub fn modules(&self) -> Vec<ModuleRecord> {
        self.registry.snapshots()
    }

    /// Resolve `ids` against the session context and drive their transitive
    /// closure to Loaded, without compiling. Returns the canonical locators
    /// in request order.
    pub async fn ensure(&self, ids: &[&str]) -> Result<Vec<String>, ResolveError> {
        let config = self.config();
        let locators = resolve_all(ids, &config.context, &config)?;
        self.ensure_loaded(locators.clone(), false).await;
        Ok(locators)
    }

    /// Top-level entry point: load and compile `ids`, returning their
    /// exports in request order. Configured preloads are drained and loaded
    /// (exports discarded) before the first request proceeds.
    pub async fn load(&self, ids: &[&str]) -> Result<Vec<Value>, ResolveError> {
        let (context, preload) = {
            let mut config = self.config.write().expect("config lock poisoned");
            (config.context.clone(), std::mem::take(&mut config.preload))
        };
        if !preload.is_empty() {
            self.load_from(preload, context.clone()).await?;
        }
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        self.load_from(ids, context).await
    }

    /// Load and compile `ids` resolved against `reference`.
    pub(crate) async fn load_from(
        &self,
        ids: Vec<String>,
        reference: String,
    ) -> Result<Vec<Value>, ResolveError> {
        let config = self.config();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let locators = resolve_all(&id_refs, &reference, &config)?;
        self.ensure_loaded(locators.clone(), false).await;
        locators.iter().map(|locator| self.compile(locator)).collect()
    }

    /// Drive `locators` to Loaded. `filtered` marks a recursive call whose
    /// set was already filtered (and whose records already exist).
    pub(crate) fn ensure_loaded(
        &self,
        locators: Vec<String>,
        filtered: bool,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let this = self.strong();
        Box::pin(async move {
            let pending = if filtered {
                locators
            } else {
                this.unloaded(&locators)
            };
            if pending.is_empty() {
                return;
            }

            this.hooks.load_set(&pending);

            // Branches run concurrently with no ordering between them; the
            // joined set is the single completion signal.
            let mut branches = JoinSet::new();
            for locator in pending {
                let session = Arc::clone(&this);
                branches.spawn(async move { session.load_one(locator).await });
            }
            while branches.join_next().await.is_some() {}
        })
    }

    /// Drive one module to a terminal per-branch state.
    async fn load_one(self: Arc<Self>, locator: String) {
        if self.registry.status(&locator) < Status::Saved {
            self.fetch_module(&locator).await;
        }

        // The fetch may not have yielded a definition (missing or invalid
        // resource); the branch finishes without advancing the module.
        if self.registry.status(&locator) < Status::Saved {
            return;
        }

        let mut stack = Vec::new();
        if self.has_circular_wait(&locator, &mut stack) {
            let mut cycle = stack;
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            tracing::warn!(cycle = %cycle.join(" -> "), "circular dependencies found");
            self.registry.advance(&locator, Status::Loaded);
            return;
        }

        let waitings = self.unloaded(&self.registry.dependencies(&locator));
        self.registry.set_pending(&locator, waitings.clone());
        if waitings.is_empty() {
            self.registry.advance(&locator, Status::Loaded);
            return;
        }

        self.ensure_loaded(waitings, true).await;
        self.registry.advance(&locator, Status::Loaded);
    }

    /// Depth-first search over the currently-waiting relation. The traversal
    /// stack is owned by one detection call; on a hit it is left holding the
    /// discovered chain for the caller's diagnostic.
    fn has_circular_wait(&self, locator: &str, stack: &mut Vec<String>) -> bool {
        let waitings = self.registry.pending(locator);
        if waitings.is_empty() {
            return false;
        }

        stack.push(locator.to_string());
        if waitings.iter().any(|waiting| stack.contains(waiting)) {
            return true;
        }
        for waiting in &waitings {
            if self.has_circular_wait(waiting, stack) {
                return true;
            }
        }
        stack.pop();
        false
    }

    /// Filter to modules below Loaded, creating records as a side effect.
    fn unloaded(&self, locators: &[String]) -> Vec<String> {
        locators
            .iter()
            .filter(|locator| {
                self.registry.ensure(locator);
                self.registry.status(locator) < Status::Loaded
            })
            .cloned()
            .collect()
    }
}

fn resolve_all(
    ids: &[&str],
    reference: &str,
    config: &Config,
) -> Result<Vec<String>, ResolveError> {
    ids.iter()
        .map(|id| resolver::resolve(id, reference, config))
        .collect()
}
