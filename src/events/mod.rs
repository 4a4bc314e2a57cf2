//! Extensibility hooks emitted by the loader core.
//!
//! Hooks observe (pre-fetch set, pre/post compile) or rewrite (per-fetch
//! locator). Core behavior never depends on a hook being registered.

use std::sync::{Arc, RwLock};

/// Listener seam for loader sessions. Every method has a no-op default;
/// implement only what the collaborator needs.
pub trait LoaderHooks: Send + Sync {
    /// The filtered, not-yet-loaded locator set of one orchestration pass,
    /// emitted before any fetch is dispatched.
    fn on_load_set(&self, locators: &[String]) {
        let _ = locators;
    }

    /// Rewrite a locator before fetch dispatch (request batching, cache
    /// busting). `None` leaves it unchanged; rewrites fold across hooks in
    /// registration order.
    fn rewrite_fetch(&self, locator: &str) -> Option<String> {
        let _ = locator;
        None
    }

    /// A module is about to be compiled.
    fn on_compile(&self, locator: &str) {
        let _ = locator;
    }

    /// A module finished compiling.
    fn on_compiled(&self, locator: &str) {
        let _ = locator;
    }
}

/// Registered hook list. The list is snapshotted before each emission so a
/// hook may register or clear hooks without deadlocking the emitter.
#[derive(Default)]
pub struct HookSet {
    hooks: RwLock<Vec<Arc<dyn LoaderHooks>>>,
}

impl HookSet {
    pub fn new() -> Self {
        HookSet::default()
    }

    pub fn add(&self, hook: Arc<dyn LoaderHooks>) {
        self.hooks.write().expect("hook list lock poisoned").push(hook);
    }

    pub fn clear(&self) {
        self.hooks.write().expect("hook list lock poisoned").clear();
    }

    fn snapshot(&self) -> Vec<Arc<dyn LoaderHooks>> {
        self.hooks.read().expect("hook list lock poisoned").clone()
    }

    pub(crate) fn load_set(&self, locators: &[String]) {
        for hook in self.snapshot() {
            hook.on_load_set(locators);
        }
    }

    pub(crate) fn rewrite(&self, locator: &str) -> String {
        let mut current = locator.to_string();
        for hook in self.snapshot() {
            if let Some(next) = hook.rewrite_fetch(&current) {
                current = next;
            }
        }
        current
    }

    pub(crate) fn compile(&self, locator: &str) {
        for hook in self.snapshot() {
            hook.on_compile(locator);
        }
    }

    pub(crate) fn compiled(&self, locator: &str) {
        for hook in self.snapshot() {
            hook.on_compiled(locator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Suffixer(&'static str);

    impl LoaderHooks for Suffixer {
        fn rewrite_fetch(&self, locator: &str) -> Option<String> {
            Some(format!("{locator}{}", self.0))
        }
    }

    struct Recorder(Mutex<Vec<String>>);

    impl LoaderHooks for Recorder {
        fn on_load_set(&self, locators: &[String]) {
            self.0
                .lock()
                .unwrap()
                .push(format!("load:{}", locators.join(",")));
        }

        fn on_compiled(&self, locator: &str) {
            self.0.lock().unwrap().push(format!("compiled:{locator}"));
        }
    }

    #[test]
    fn test_rewrite_folds_in_order() {
        let hooks = HookSet::new();
        hooks.add(Arc::new(Suffixer(".a")));
        hooks.add(Arc::new(Suffixer(".b")));
        assert_eq!(hooks.rewrite("x"), "x.a.b");
    }

    #[test]
    fn test_rewrite_without_hooks_is_identity() {
        let hooks = HookSet::new();
        assert_eq!(hooks.rewrite("x"), "x");
    }

    #[test]
    fn test_observers_receive_emissions() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let hooks = HookSet::new();
        hooks.add(recorder.clone());

        hooks.load_set(&["a".to_string(), "b".to_string()]);
        hooks.compiled("a");

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec!["load:a,b", "compiled:a"]);
    }
}
