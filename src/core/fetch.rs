//! Fetch coordination: request deduplication and completion fan-out.
//!
//! Concurrent fetches for one request locator share a single dispatch to the
//! asset fetcher; late arrivals join the in-flight request's waiter list and
//! are released in FIFO order when it completes. Completed requests stay
//! marked so later fetches return immediately. Success and failure are
//! indistinguishable here: a failed fetch registers nothing and the module
//! simply never reaches Saved.

use std::sync::{Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use super::config::Config;
use super::loader::Loader;
use super::registry::{Definition, Status};
use super::resolver;
use crate::transport::FetchHint;

/// Where a fetch request stands for one request locator.
enum RequestState {
    /// Dispatched; completion will release the queued waiters in order.
    InFlight(Vec<oneshot::Sender<()>>),
    /// Completed once; later requests are no-ops.
    Completed,
}

/// What the caller of `ticket` should do.
pub(crate) enum FetchTicket {
    /// The request already completed; proceed immediately.
    Completed,
    /// Another caller owns the dispatch; await the receiver.
    Join(oneshot::Receiver<()>),
    /// The caller owns the dispatch and must call `complete` afterwards.
    Dispatch,
}

/// Per-session table of fetch request state.
#[derive(Default)]
pub struct FetchBoard {
    requests: Mutex<FxHashMap<String, RequestState>>,
}

impl FetchBoard {
    pub fn new() -> Self {
        FetchBoard::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, RequestState>> {
        self.requests.lock().expect("fetch board lock poisoned")
    }

    pub(crate) fn ticket(&self, locator: &str) -> FetchTicket {
        let mut requests = self.lock();
        match requests.get_mut(locator) {
            Some(RequestState::Completed) => FetchTicket::Completed,
            Some(RequestState::InFlight(waiters)) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                FetchTicket::Join(rx)
            }
            None => {
                requests.insert(locator.to_string(), RequestState::InFlight(Vec::new()));
                FetchTicket::Dispatch
            }
        }
    }

    /// Mark the request completed and take its waiters, in arrival order.
    pub(crate) fn complete(&self, locator: &str) -> Vec<oneshot::Sender<()>> {
        let mut requests = self.lock();
        match requests.insert(locator.to_string(), RequestState::Completed) {
            Some(RequestState::InFlight(waiters)) => waiters,
            _ => Vec::new(),
        }
    }
}

impl Loader {
    /// Fetch one canonical locator through the coordinator. Returns once the
    /// underlying request has completed, however many callers share it.
    pub(crate) async fn fetch_module(&self, locator: &str) {
        // Collaborators may rewrite the request locator (batching, cache
        // busting); all bookkeeping below uses the rewritten form.
        let request_locator = self.hooks.rewrite(locator);

        match self.board.ticket(&request_locator) {
            FetchTicket::Completed => {}
            FetchTicket::Join(rx) => {
                // The sender is dropped only after completion, so an error
                // here still means the request finished.
                let _ = rx.await;
            }
            FetchTicket::Dispatch => {
                let hint = FetchHint {
                    charset: self.config().charset,
                };
                let definitions = self.fetcher.request(&request_locator, &hint).await;
                if !definitions.is_empty() {
                    // Anonymous definitions belong to the locator this fetch
                    // was issued for, not the rewritten request.
                    self.register_fetched(locator, definitions);
                }
                for waiter in self.board.complete(&request_locator) {
                    let _ = waiter.send(());
                }
            }
        }
    }

    /// Register definitions produced by a completed fetch.
    pub(crate) fn register_fetched(&self, locator: &str, definitions: Vec<Definition>) {
        let config = self.config();
        for definition in definitions {
            let target = match definition.id.as_deref() {
                Some(id) => match resolver::resolve(id, &config.context, &config) {
                    Ok(target) => target,
                    Err(e) => {
                        tracing::error!(%id, error = %e, "definition id failed to resolve; dropped");
                        continue;
                    }
                },
                None => locator.to_string(),
            };
            self.save_definition(&target, definition, &config);
        }
    }

    /// Resolve a definition's dependencies relative to its locator and save
    /// it. First registration wins; an unresolvable dependency drops the
    /// whole definition, leaving the module to look like a failed fetch.
    pub(crate) fn save_definition(
        &self,
        target: &str,
        definition: Definition,
        config: &Config,
    ) -> bool {
        if self.registry.status(target) >= Status::Saved {
            return false;
        }
        let raw = definition.dependencies.unwrap_or_default();
        let mut resolved = Vec::with_capacity(raw.len());
        for dep in &raw {
            match resolver::resolve(dep, target, config) {
                Ok(locator) => resolved.push(locator),
                Err(e) => {
                    tracing::error!(%dep, %target, error = %e, "dependency failed to resolve; definition dropped");
                    return false;
                }
            }
        }
        self.registry.save(target, definition.id, resolved, definition.factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loader::Loader;
    use crate::events::LoaderHooks;
    use crate::transport::memory::MemoryFetcher;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_board_dedup_states() {
        let board = FetchBoard::new();
        assert!(matches!(board.ticket("a"), FetchTicket::Dispatch));
        assert!(matches!(board.ticket("a"), FetchTicket::Join(_)));
        assert!(matches!(board.ticket("a"), FetchTicket::Join(_)));

        let waiters = board.complete("a");
        assert_eq!(waiters.len(), 2);
        assert!(matches!(board.ticket("a"), FetchTicket::Completed));
        // Completion is sticky.
        assert!(board.complete("a").is_empty());
    }

    fn session(fetcher: Arc<MemoryFetcher>) -> Arc<Loader> {
        let config = Config {
            base: "http://h/libs/".to_string(),
            context: "http://h/app".to_string(),
            ..Config::default()
        };
        Loader::with_config(config, fetcher)
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_dispatch() {
        let fetcher = Arc::new(MemoryFetcher::with_delay(Duration::from_millis(10)));
        fetcher.insert("http://h/libs/a.js", Definition::value(json!(1)));
        let loader = session(fetcher.clone());

        tokio::join!(
            loader.fetch_module("http://h/libs/a.js"),
            loader.fetch_module("http://h/libs/a.js"),
        );
        assert_eq!(fetcher.requests().len(), 1);
        assert_eq!(loader.registry.status("http://h/libs/a.js"), Status::Saved);
    }

    #[tokio::test]
    async fn test_completed_fetch_is_not_redispatched() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("http://h/libs/a.js", Definition::value(json!(1)));
        let loader = session(fetcher.clone());

        loader.fetch_module("http://h/libs/a.js").await;
        loader.fetch_module("http://h/libs/a.js").await;
        assert_eq!(fetcher.requests().len(), 1);
    }

    struct VersionRewrite;

    impl LoaderHooks for VersionRewrite {
        fn rewrite_fetch(&self, locator: &str) -> Option<String> {
            locator
                .strip_suffix(".js")
                .map(|stem| format!("{stem}.v2.js"))
        }
    }

    #[tokio::test]
    async fn test_rewrite_hook_redirects_request_but_not_attribution() {
        let fetcher = Arc::new(MemoryFetcher::new());
        // Only the rewritten asset exists; it is anonymous.
        fetcher.insert("http://h/libs/a.v2.js", Definition::value(json!("v2")));
        let loader = session(fetcher.clone());
        loader.add_hook(Arc::new(VersionRewrite));

        loader.fetch_module("http://h/libs/a.js").await;

        assert_eq!(fetcher.requests(), vec!["http://h/libs/a.v2.js"]);
        // The definition is attributed to the original canonical locator.
        assert_eq!(loader.registry.status("http://h/libs/a.js"), Status::Saved);
        assert_eq!(
            loader.registry.status("http://h/libs/a.v2.js"),
            Status::Unregistered
        );
    }

    #[tokio::test]
    async fn test_named_definition_registers_under_own_id() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert_batch(
            "http://h/libs/combo.js",
            vec![
                Definition::value(json!(1)).with_id("a"),
                Definition::value(json!(2)).with_id("b"),
            ],
        );
        let loader = session(fetcher);

        loader.fetch_module("http://h/libs/combo.js").await;

        assert_eq!(loader.registry.status("http://h/libs/a.js"), Status::Saved);
        assert_eq!(loader.registry.status("http://h/libs/b.js"), Status::Saved);
        // The combo asset itself carried no anonymous definition.
        assert_eq!(
            loader.registry.status("http://h/libs/combo.js"),
            Status::Unregistered
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_registers_nothing() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let loader = session(fetcher);

        loader.fetch_module("http://h/libs/ghost.js").await;
        assert_eq!(
            loader.registry.status("http://h/libs/ghost.js"),
            Status::Unregistered
        );
    }
}
