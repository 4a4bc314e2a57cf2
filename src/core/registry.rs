//! Module records and the status state machine.
//!
//! The registry is the single source of truth for module state: one record
//! per canonical locator, append-only, keyed by locator. Every operation is
//! a status-gated, idempotent transition and the status order is total:
//! `Unregistered < Loading < Saved < Loaded < Compiling < Compiled`, never
//! regressing. Callers needing isolation construct a fresh loader session;
//! there is no deletion.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::compiler::Require;
use super::error::ResolveError;

/// Lifecycle state of a module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// Implicit absence state before the record exists.
    Unregistered,
    /// The resource is being fetched.
    Loading,
    /// A definition has been registered.
    Saved,
    /// The module and all its dependencies are ready to compile.
    Loaded,
    /// The factory is executing.
    Compiling,
    /// Exports are available.
    Compiled,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Unregistered => "unregistered",
            Status::Loading => "loading",
            Status::Saved => "saved",
            Status::Loaded => "loaded",
            Status::Compiling => "compiling",
            Status::Compiled => "compiled",
        };
        f.write_str(name)
    }
}

/// Executable factory body: receives the module-scoped require capability, a
/// mutable exports container, and the module's identity. An explicit `Ok`
/// return value wins over the container.
pub type FactoryFn =
    Arc<dyn Fn(&Require, &mut Value, &ModuleInfo) -> Result<Option<Value>, ResolveError> + Send + Sync>;

/// A module's deferred body, tagged at registration time.
#[derive(Clone)]
pub enum Factory {
    /// Executed exactly once at compile time.
    Body(FactoryFn),
    /// Used as the exports directly.
    Literal(Value),
}

impl Factory {
    pub fn body(
        f: impl Fn(&Require, &mut Value, &ModuleInfo) -> Result<Option<Value>, ResolveError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Factory::Body(Arc::new(f))
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factory::Body(_) => f.write_str("Body(..)"),
            Factory::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
        }
    }
}

/// A unit definition as delivered by a fetch or registered programmatically.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    /// Declared identifier; `None` makes the definition anonymous.
    pub id: Option<String>,
    /// Raw dependency identifiers; resolved relative to the target locator
    /// at save time. `None` means "none declared".
    pub dependencies: Option<Vec<String>>,
    pub factory: Option<Factory>,
}

impl Definition {
    /// A literal-value definition.
    pub fn value(exports: Value) -> Self {
        Definition {
            factory: Some(Factory::Literal(exports)),
            ..Definition::default()
        }
    }

    /// An executable definition.
    pub fn body(
        f: impl Fn(&Require, &mut Value, &ModuleInfo) -> Result<Option<Value>, ResolveError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Definition {
            factory: Some(Factory::body(f)),
            ..Definition::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = Some(deps.into_iter().map(Into::into).collect());
        self
    }
}

/// Identity handed to an executing factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub locator: String,
    pub logical_id: String,
}

/// One module per canonical locator.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Canonical resource locator; the registry key.
    pub locator: String,
    /// Declared identifier, defaulting to the locator.
    pub logical_id: String,
    pub status: Status,
    /// Resolved once at save time, relative to `locator`; immutable after.
    pub dependencies: Vec<String>,
    /// Not-yet-loaded dependencies of the current load pass. Stale outside
    /// of it; never read after the pass completes.
    pub pending: Vec<String>,
    pub factory: Option<Factory>,
    pub exports: Option<Value>,
    /// Most recent requiring module; diagnostics only, last write wins.
    pub parent: Option<String>,
}

impl ModuleRecord {
    fn new(locator: &str) -> Self {
        ModuleRecord {
            locator: locator.to_string(),
            logical_id: locator.to_string(),
            status: Status::Loading,
            dependencies: Vec::new(),
            pending: Vec::new(),
            factory: None,
            exports: None,
            parent: None,
        }
    }
}

/// Outcome of attempting the Loaded → Compiling transition.
pub(crate) enum CompileEntry {
    /// Already compiling or compiled; carries the current exports.
    AlreadyEntered(Value),
    /// Never reached Loaded and has no preset exports: the failure case.
    Unready,
    /// No record under this locator.
    Missing,
    /// Transitioned to Compiling; run the factory.
    Run {
        factory: Option<Factory>,
        info: ModuleInfo,
    },
}

/// Locator-keyed module table.
#[derive(Debug, Default)]
pub struct Registry {
    modules: Mutex<FxHashMap<String, ModuleRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, ModuleRecord>> {
        self.modules.lock().expect("module registry lock poisoned")
    }

    /// Create the record if absent (status Loading).
    pub fn ensure(&self, locator: &str) {
        self.lock()
            .entry(locator.to_string())
            .or_insert_with(|| ModuleRecord::new(locator));
    }

    /// Current status; `Unregistered` when no record exists.
    pub fn status(&self, locator: &str) -> Status {
        self.lock()
            .get(locator)
            .map_or(Status::Unregistered, |m| m.status)
    }

    /// Register a definition under `locator`. Only takes effect while the
    /// record is below Saved: the first registration wins and later
    /// duplicates are silently ignored.
    pub fn save(
        &self,
        locator: &str,
        declared_id: Option<String>,
        dependencies: Vec<String>,
        factory: Option<Factory>,
    ) -> bool {
        let mut modules = self.lock();
        let record = modules
            .entry(locator.to_string())
            .or_insert_with(|| ModuleRecord::new(locator));
        if record.status >= Status::Saved {
            return false;
        }
        record.logical_id = declared_id.unwrap_or_else(|| locator.to_string());
        record.dependencies = dependencies;
        record.factory = factory;
        record.status = Status::Saved;
        true
    }

    /// Advance the record's status; a no-op when already at or past `to`.
    pub fn advance(&self, locator: &str, to: Status) {
        if let Some(record) = self.lock().get_mut(locator) {
            record.status = record.status.max(to);
        }
    }

    pub fn dependencies(&self, locator: &str) -> Vec<String> {
        self.lock()
            .get(locator)
            .map(|m| m.dependencies.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_pending(&self, locator: &str, pending: Vec<String>) {
        if let Some(record) = self.lock().get_mut(locator) {
            record.pending = pending;
        }
    }

    pub(crate) fn pending(&self, locator: &str) -> Vec<String> {
        self.lock()
            .get(locator)
            .map(|m| m.pending.clone())
            .unwrap_or_default()
    }

    pub fn exports(&self, locator: &str) -> Option<Value> {
        self.lock().get(locator).and_then(|m| m.exports.clone())
    }

    pub fn set_parent(&self, locator: &str, parent: &str) {
        if let Some(record) = self.lock().get_mut(locator) {
            record.parent = Some(parent.to_string());
        }
    }

    /// Clone of one record.
    pub fn snapshot(&self, locator: &str) -> Option<ModuleRecord> {
        self.lock().get(locator).cloned()
    }

    /// Clones of every record, ordered by locator.
    pub fn snapshots(&self) -> Vec<ModuleRecord> {
        let mut all: Vec<ModuleRecord> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.locator.cmp(&b.locator));
        all
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current exports when the module is already compiling or compiled.
    pub(crate) fn reentrant_exports(&self, locator: &str) -> Option<Value> {
        let modules = self.lock();
        let record = modules.get(locator)?;
        if record.status >= Status::Compiling {
            Some(record.exports.clone().unwrap_or(Value::Null))
        } else {
            None
        }
    }

    /// Attempt the transition into Compiling. For executable factories the
    /// in-progress exports container is seeded so reentrant requires observe
    /// it instead of re-running the factory.
    pub(crate) fn enter_compile(&self, locator: &str) -> CompileEntry {
        let mut modules = self.lock();
        let Some(record) = modules.get_mut(locator) else {
            return CompileEntry::Missing;
        };
        if record.status >= Status::Compiling {
            return CompileEntry::AlreadyEntered(record.exports.clone().unwrap_or(Value::Null));
        }
        if record.status < Status::Loaded && record.exports.is_none() {
            return CompileEntry::Unready;
        }
        record.status = Status::Compiling;
        if matches!(record.factory, Some(Factory::Body(_))) {
            record.exports = Some(Value::Object(serde_json::Map::new()));
        }
        CompileEntry::Run {
            factory: record.factory.clone(),
            info: ModuleInfo {
                locator: record.locator.clone(),
                logical_id: record.logical_id.clone(),
            },
        }
    }

    /// Store the compile outcome and advance to Compiled. `None` keeps
    /// whatever exports the record already carries.
    pub(crate) fn complete_compile(&self, locator: &str, produced: Option<Value>) -> Value {
        let mut modules = self.lock();
        let Some(record) = modules.get_mut(locator) else {
            return Value::Null;
        };
        if let Some(value) = produced {
            record.exports = Some(value);
        }
        record.status = record.status.max(Status::Compiled);
        record.exports.clone().unwrap_or(Value::Null)
    }
}
