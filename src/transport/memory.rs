//! In-memory asset fetcher for tests and embedders.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use super::{AssetFetcher, FetchHint};
use crate::core::registry::Definition;

/// Serves definitions from a locator-keyed table, with an optional artificial
/// latency so concurrent-request behavior can be exercised deterministically.
/// Every dispatched request is logged for deduplication assertions.
#[derive(Default)]
pub struct MemoryFetcher {
    assets: Mutex<FxHashMap<String, Vec<Definition>>>,
    delay: Option<Duration>,
    requested: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        MemoryFetcher::default()
    }

    /// Add artificial latency before each response.
    pub fn with_delay(delay: Duration) -> Self {
        MemoryFetcher {
            delay: Some(delay),
            ..MemoryFetcher::default()
        }
    }

    /// Register a single-definition asset under `locator`.
    pub fn insert(&self, locator: impl Into<String>, definition: Definition) {
        self.insert_batch(locator, vec![definition]);
    }

    /// Register a batch-response asset under `locator`.
    pub fn insert_batch(&self, locator: impl Into<String>, definitions: Vec<Definition>) {
        self.assets
            .lock()
            .expect("asset table lock poisoned")
            .insert(locator.into(), definitions);
    }

    /// Locators requested so far, in dispatch order.
    pub fn requests(&self) -> Vec<String> {
        self.requested
            .lock()
            .expect("request log lock poisoned")
            .clone()
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn request(&self, locator: &str, _hint: &FetchHint) -> Vec<Definition> {
        self.requested
            .lock()
            .expect("request log lock poisoned")
            .push(locator.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.assets
            .lock()
            .expect("asset table lock poisoned")
            .get(locator)
            .cloned()
            .unwrap_or_default()
    }
}
