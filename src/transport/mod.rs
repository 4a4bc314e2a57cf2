//! Asset transport abstraction — how a locator becomes module definitions.
//!
//! The loader core never touches I/O; it hands a request locator to an
//! `AssetFetcher` and registers whatever definitions come back. Completion
//! carries no success/failure distinction: an empty result simply leaves the
//! module unregistered, which the orchestrator later observes as a module
//! that never reached Saved.

pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::core::registry::Definition;

/// Per-request hints forwarded from the session configuration.
#[derive(Debug, Clone, Default)]
pub struct FetchHint {
    /// Charset of the requested resource, when configured.
    pub charset: Option<String>,
}

/// External collaborator that turns one request locator into the definitions
/// its evaluation produced.
///
/// Must complete exactly once per dispatch. Anonymous definitions (no `id`)
/// are attributed to the requested locator by the fetch coordinator; named
/// ones register under their own resolved identifier, so a single response
/// may define several modules (batch responses).
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn request(&self, locator: &str, hint: &FetchHint) -> Vec<Definition>;
}
