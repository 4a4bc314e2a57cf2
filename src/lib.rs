//! Halyard — asynchronous module loader.
//!
//! Resolves module identifiers to canonical locators, fetches code units
//! through pluggable transports with request deduplication, and compiles
//! dynamically discovered dependency graphs with circular-wait breaking.

pub mod cli;
pub mod core;
pub mod events;
pub mod extract;
pub mod transport;
