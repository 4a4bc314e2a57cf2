//! Module compilation: exactly-once factory execution with reentrancy
//! support.
//!
//! A module that transitively requires itself is safe: the requester
//! observes the in-progress exports rather than triggering a second factory
//! execution. A module that never reached Loaded compiles to the failure
//! sentinel (`null`), the subsystem's only local failure signal, which
//! propagates silently to whatever consumed it as a dependency.

use std::sync::Arc;

use serde_json::Value;

use super::error::ResolveError;
use super::loader::Loader;
use super::registry::{CompileEntry, Factory, ModuleRecord, Status};

/// The require capability handed to an executing factory, scoped to the
/// requiring module's locator.
pub struct Require {
    loader: Arc<Loader>,
    locator: String,
}

impl Require {
    pub(crate) fn new(loader: Arc<Loader>, locator: String) -> Self {
        Require { loader, locator }
    }

    /// Locator of the requiring module.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Synchronously compile a dependency and return its exports. Yields the
    /// sentinel for targets that were never registered; only a malformed
    /// identifier is an error.
    pub fn require(&self, id: &str) -> Result<Value, ResolveError> {
        let target = self.resolve(id)?;
        if self.loader.registry.status(&target) == Status::Unregistered {
            return Ok(Value::Null);
        }
        self.loader.registry.set_parent(&target, &self.locator);
        self.loader.compile(&target)
    }

    /// Resolve an identifier relative to the requiring module.
    pub fn resolve(&self, id: &str) -> Result<String, ResolveError> {
        self.loader.resolve(id, Some(&self.locator))
    }

    /// Asynchronously load and compile `ids` (resolved relative to the
    /// requiring module) and hand their exports to `callback` once all of
    /// them and their transitive dependencies are satisfied.
    pub fn load(
        &self,
        ids: &[&str],
        callback: impl FnOnce(Result<Vec<Value>, ResolveError>) + Send + 'static,
    ) {
        let loader = Arc::clone(&self.loader);
        let reference = self.locator.clone();
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        tokio::spawn(async move {
            callback(loader.load_from(ids, reference).await);
        });
    }

    /// Registry introspection: snapshots of every known module.
    pub fn cache(&self) -> Vec<ModuleRecord> {
        self.loader.modules()
    }
}

impl Loader {
    /// Compile a module to its exports. Idempotent: once compiled (or while
    /// compiling), the current exports are returned without re-executing the
    /// factory.
    pub fn compile(&self, locator: &str) -> Result<Value, ResolveError> {
        if let Some(exports) = self.registry.reentrant_exports(locator) {
            return Ok(exports);
        }

        self.hooks.compile(locator);

        match self.registry.enter_compile(locator) {
            CompileEntry::AlreadyEntered(exports) => Ok(exports),
            CompileEntry::Missing | CompileEntry::Unready => Ok(Value::Null),
            CompileEntry::Run { factory, info } => {
                let produced = match factory {
                    Some(Factory::Body(body)) => {
                        let require = Require::new(self.strong(), locator.to_string());
                        let mut container = Value::Object(serde_json::Map::new());
                        match body(&require, &mut container, &info)? {
                            // An explicit return value wins over the container.
                            Some(value) => Some(value),
                            None => Some(container),
                        }
                    }
                    Some(Factory::Literal(value)) => Some(value),
                    None => None,
                };
                let exports = self.registry.complete_compile(locator, produced);
                self.hooks.compiled(locator);
                Ok(exports)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::registry::Definition;
    use crate::events::LoaderHooks;
    use crate::transport::memory::MemoryFetcher;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn session(fetcher: Arc<MemoryFetcher>) -> Arc<Loader> {
        let config = Config {
            base: "http://h/libs/".to_string(),
            context: "http://h/app".to_string(),
            ..Config::default()
        };
        Loader::with_config(config, fetcher)
    }

    fn lib(name: &str) -> String {
        format!("http://h/libs/{name}.js")
    }

    #[tokio::test]
    async fn test_factory_runs_exactly_once() {
        static RUNS: AtomicUsize = AtomicUsize::new(0);
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("once"),
            Definition::body(|_, _, _| {
                RUNS.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!(42)))
            }),
        );
        let loader = session(fetcher);

        loader.load(&["once"]).await.unwrap();
        let again = loader.compile(&lib("once")).unwrap();
        assert_eq!(again, json!(42));
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_container_mutation_without_return() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("exports"),
            Definition::body(|_, exports, _| {
                exports["answer"] = json!(42);
                Ok(None)
            }),
        );
        let loader = session(fetcher);

        let out = loader.load(&["exports"]).await.unwrap();
        assert_eq!(out, vec![json!({"answer": 42})]);
    }

    #[tokio::test]
    async fn test_factory_sees_module_info() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("who"),
            Definition::body(|_, _, info| Ok(Some(json!(info.locator)))).with_id("who"),
        );
        let loader = session(fetcher);

        // Named definition: registered under its own resolved id.
        let out = loader.load(&["who"]).await.unwrap();
        assert_eq!(out, vec![json!(lib("who"))]);
    }

    #[tokio::test]
    async fn test_require_compiles_dependency_and_sets_parent() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("app"),
            Definition::body(|require, _, _| {
                let dep = require.require("./dep")?;
                Ok(Some(json!({ "dep": dep })))
            })
            .with_dependencies(["./dep"]),
        );
        fetcher.insert(lib("dep"), Definition::value(json!("d")));
        let loader = session(fetcher);

        let out = loader.load(&["app"]).await.unwrap();
        assert_eq!(out, vec![json!({"dep": "d"})]);
        assert_eq!(
            loader.module(&lib("dep")).unwrap().parent.as_deref(),
            Some(lib("app").as_str())
        );
    }

    #[tokio::test]
    async fn test_require_missing_module_yields_sentinel() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("app"),
            Definition::body(|require, _, _| {
                // Declared, but the resource 404s.
                let lib = require.require("./lib")?;
                assert_eq!(lib, Value::Null);
                // Never declared at all.
                let ghost = require.require("./ghost")?;
                assert_eq!(ghost, Value::Null);
                Ok(Some(json!("survived")))
            })
            .with_dependencies(["./lib"]),
        );
        let loader = session(fetcher);

        let out = loader.load(&["app"]).await.unwrap();
        assert_eq!(out, vec![json!("survived")]);
    }

    #[tokio::test]
    async fn test_reentrant_require_gets_in_progress_exports() {
        static B_RUNS: AtomicUsize = AtomicUsize::new(0);
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("a"),
            Definition::body(|require, exports, _| {
                exports["name"] = json!("a");
                let b = require.require("./b")?;
                Ok(Some(json!({ "b_saw": b })))
            })
            .with_dependencies(["./b"]),
        );
        fetcher.insert(
            lib("b"),
            Definition::body(|require, _, _| {
                B_RUNS.fetch_add(1, Ordering::SeqCst);
                // Reentrant: "a" is mid-compile; this must not re-run it.
                let a = require.require("./a")?;
                Ok(Some(json!({ "a_in_progress": a })))
            })
            .with_dependencies(["./a"]),
        );
        let loader = session(fetcher);

        let out = loader.load(&["a"]).await.unwrap();
        // b observed a's seeded in-progress container, not its final value.
        assert_eq!(out, vec![json!({ "b_saw": { "a_in_progress": {} } })]);
        assert_eq!(B_RUNS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compile_unready_module_is_sentinel() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let loader = session(fetcher);
        loader.registry.ensure(&lib("limbo"));
        assert_eq!(loader.compile(&lib("limbo")).unwrap(), Value::Null);
        // The failed attempt leaves the status untouched.
        assert_eq!(loader.registry.status(&lib("limbo")), Status::Loading);
    }

    #[tokio::test]
    async fn test_factory_resolution_error_propagates() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("bad"),
            Definition::body(|require, _, _| {
                require.require("../../../../../escape")?;
                Ok(None)
            }),
        );
        let loader = session(fetcher);

        let err = loader.load(&["bad"]).await.unwrap_err();
        assert!(matches!(err, ResolveError::AscentPastRoot(_)));
    }

    #[tokio::test]
    async fn test_require_resolve_is_module_relative() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("deep/mod"),
            Definition::body(|require, _, _| {
                Ok(Some(json!(require.resolve("./sibling")?)))
            }),
        );
        let loader = session(fetcher);

        let out = loader.load(&["deep/mod"]).await.unwrap();
        assert_eq!(out, vec![json!(lib("deep/sibling"))]);
    }

    #[tokio::test]
    async fn test_require_cache_exposes_registry() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("introspect"),
            Definition::body(|require, _, _| {
                let locators: Vec<String> =
                    require.cache().into_iter().map(|m| m.locator).collect();
                Ok(Some(json!(locators)))
            }),
        );
        let loader = session(fetcher);

        let out = loader.load(&["introspect"]).await.unwrap();
        assert_eq!(out, vec![json!([lib("introspect")])]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_require_load_is_asynchronous() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            lib("main"),
            Definition::body(|require, _, _| {
                let (tx, rx) = std::sync::mpsc::channel();
                require.load(&["./later"], move |result| {
                    let _ = tx.send(result);
                });
                let later = rx.recv().unwrap().unwrap();
                Ok(Some(json!({ "later": later })))
            }),
        );
        fetcher.insert(lib("later"), Definition::value(json!("l")));
        let loader = session(fetcher);

        let out = loader.load(&["main"]).await.unwrap();
        assert_eq!(out, vec![json!({ "later": ["l"] })]);
    }

    struct CompileSpy(Mutex<Vec<String>>);

    impl LoaderHooks for CompileSpy {
        fn on_compile(&self, locator: &str) {
            self.0.lock().unwrap().push(format!("pre:{locator}"));
        }

        fn on_compiled(&self, locator: &str) {
            self.0.lock().unwrap().push(format!("post:{locator}"));
        }
    }

    #[tokio::test]
    async fn test_compile_hooks_fire_around_execution() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(lib("observed"), Definition::value(json!(1)));
        let loader = session(fetcher);
        let spy = Arc::new(CompileSpy(Mutex::new(Vec::new())));
        loader.add_hook(spy.clone());

        loader.load(&["observed"]).await.unwrap();
        let seen = spy.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![format!("pre:{}", lib("observed")), format!("post:{}", lib("observed"))]
        );
    }
}
