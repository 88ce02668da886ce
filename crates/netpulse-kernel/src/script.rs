//! Embedded scripting contract.
//!
//! The core never assumes a particular scripting implementation: the
//! transformation hook, `%[name]` schedule expansion and `%{script:name}`
//! macros all go through [`ScriptEnv`]. Compilation errors and runtime
//! errors are distinguishable values and are never fatal to collection.
//!
//! The concrete rhai-backed implementation lives in `netpulse-scripting`;
//! this crate deliberately has no dependency on it, the same way the kernel
//! keeps the scheduler contract free of the backing timer machinery.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure modes of the scripting environment.
///
/// `Compile` is reported once when a script is assigned; `Runtime` surfaces
/// per execution; `NotFound` covers `%[name]` references to scripts missing
/// from the library.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ScriptError {
    #[error("script compilation failed: {0}")]
    Compile(String),

    #[error("script execution failed: {0}")]
    Runtime(String),

    #[error("script '{0}' not found")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// CompiledScript
// ---------------------------------------------------------------------------

/// Opaque handle to a script compiled by a [`ScriptEnv`].
///
/// The handle is produced and consumed by the same environment; passing it
/// to a different backend yields a runtime error, never undefined behavior.
#[derive(Clone)]
pub struct CompiledScript {
    inner: Arc<dyn Any + Send + Sync>,
}

impl CompiledScript {
    pub fn new(inner: impl Any + Send + Sync) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Recover the backend-specific representation.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ScriptValue
// ---------------------------------------------------------------------------

/// Result of a script run, convertible to the handful of shapes the core
/// consumes (sample strings, schedule expressions).
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptValue(serde_json::Value);

impl ScriptValue {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn null() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Render the value as a string the way the collection pipeline expects:
    /// strings pass through, numbers and booleans are formatted, null and
    /// structured values yield `None`.
    pub fn as_string(&self) -> Option<String> {
        match &self.0 {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        Self(serde_json::Value::String(s))
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        Self(serde_json::Value::String(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ScriptBindings
// ---------------------------------------------------------------------------

/// Variables exposed to a script run.
///
/// The collection core binds `$node` (owner snapshot) and `$dci` (item
/// snapshot) for schedule expansion, and additionally `$value` for
/// transformation runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptBindings {
    variables: HashMap<String, serde_json::Value>,
}

impl ScriptBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(json) = serde_json::to_value(value) {
            self.variables.insert(key.to_string(), json);
        }
    }

    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.variables.iter()
    }
}

// ---------------------------------------------------------------------------
// ScriptEnv
// ---------------------------------------------------------------------------

/// Capability set of the embedded scripting environment.
///
/// All methods are synchronous: scripts run with operation limits and are
/// not expected to perform I/O.
pub trait ScriptEnv: Send + Sync {
    /// Compile a script source. The returned handle is reusable across runs.
    fn compile(&self, source: &str) -> Result<CompiledScript, ScriptError>;

    /// Run a previously compiled script.
    fn run(
        &self,
        script: &CompiledScript,
        bindings: &ScriptBindings,
    ) -> Result<ScriptValue, ScriptError>;

    /// Run a script registered in the environment's library by name.
    /// Used by `%[name]` schedule references and `%{script:name}` macros.
    fn run_named(
        &self,
        name: &str,
        bindings: &ScriptBindings,
    ) -> Result<ScriptValue, ScriptError>;
}

/// A [`ScriptEnv`] for deployments without scripting: every compile fails
/// and every library lookup misses. Items with transformation scripts fall
/// back to raw values, script-expanded schedules never match.
pub struct NullScriptEnv;

impl ScriptEnv for NullScriptEnv {
    fn compile(&self, _source: &str) -> Result<CompiledScript, ScriptError> {
        Err(ScriptError::Compile("scripting is not available".into()))
    }

    fn run(
        &self,
        _script: &CompiledScript,
        _bindings: &ScriptBindings,
    ) -> Result<ScriptValue, ScriptError> {
        Err(ScriptError::Runtime("scripting is not available".into()))
    }

    fn run_named(
        &self,
        name: &str,
        _bindings: &ScriptBindings,
    ) -> Result<ScriptValue, ScriptError> {
        Err(ScriptError::NotFound(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
