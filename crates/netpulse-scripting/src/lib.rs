//! Rhai-backed [`ScriptEnv`] implementation.
//!
//! Provides the embedded scripting environment used for per-item
//! transformations, `%[name]` schedule expansion and `%{script:name}`
//! macros. Scripts run sandboxed: no file or network access is registered,
//! and execution is bounded by operation and call-depth limits so a
//! misbehaving script surfaces as a runtime error instead of stalling a
//! collector worker.
//!
//! Binding names arrive with the platform's `$` sigil (`$node`, `$dci`,
//! `$value`); rhai identifiers cannot carry it, so the sigil is stripped
//! when variables are pushed into the script scope: a transformation script
//! reads `value`, `node` and `dci`.

use std::collections::HashMap;

use parking_lot::RwLock;
use rhai::{AST, Dynamic, Engine, Scope};
use tracing::debug;

use netpulse_kernel::script::{
    CompiledScript, ScriptBindings, ScriptEnv, ScriptError, ScriptValue,
};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Execution bounds applied to every script run.
#[derive(Debug, Clone)]
pub struct ScriptLimits {
    /// Maximum abstract operations per run.
    pub max_operations: u64,
    /// Maximum call stack depth.
    pub max_call_depth: usize,
    /// Maximum array size scripts may build.
    pub max_array_size: usize,
    /// Maximum string length scripts may build.
    pub max_string_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_depth: 64,
            max_array_size: 10_000,
            max_string_size: 1_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// RhaiScriptEnv
// ---------------------------------------------------------------------------

/// Script environment backed by a sandboxed rhai engine with a named script
/// library.
pub struct RhaiScriptEnv {
    engine: Engine,
    library: RwLock<HashMap<String, AST>>,
}

impl Default for RhaiScriptEnv {
    fn default() -> Self {
        Self::new(ScriptLimits::default())
    }
}

impl RhaiScriptEnv {
    pub fn new(limits: ScriptLimits) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_depth);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_string_size(limits.max_string_size);
        // Context variables are injected per run; names cannot be known at
        // compile time.
        engine.set_strict_variables(false);

        Self::register_builtin_functions(&mut engine);

        Self {
            engine,
            library: RwLock::new(HashMap::new()),
        }
    }

    fn register_builtin_functions(engine: &mut Engine) {
        engine.register_fn("trim", |s: &str| -> String { s.trim().to_string() });
        engine.register_fn("upper", |s: &str| -> String { s.to_uppercase() });
        engine.register_fn("lower", |s: &str| -> String { s.to_lowercase() });
        engine.register_fn("contains", |s: &str, pattern: &str| -> bool {
            s.contains(pattern)
        });
        engine.register_fn("debug", |msg: &str| {
            debug!("script debug: {msg}");
        });
    }

    /// Register (or replace) a library script runnable through
    /// [`ScriptEnv::run_named`].
    pub fn register_script(&self, name: &str, source: &str) -> Result<(), ScriptError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        self.library.write().insert(name.to_string(), ast);
        Ok(())
    }

    /// Remove a library script. Unknown names are ignored.
    pub fn unregister_script(&self, name: &str) {
        self.library.write().remove(name);
    }

    fn scope_from_bindings(bindings: &ScriptBindings) -> Scope<'static> {
        let mut scope = Scope::new();
        for (name, value) in bindings.iter() {
            let name = name.strip_prefix('$').unwrap_or(name).to_string();
            let dynamic = rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT);
            scope.push_dynamic(name, dynamic);
        }
        scope
    }

    fn eval(&self, ast: &AST, bindings: &ScriptBindings) -> Result<ScriptValue, ScriptError> {
        let mut scope = Self::scope_from_bindings(bindings);
        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        let json = rhai::serde::from_dynamic::<serde_json::Value>(&result)
            .unwrap_or(serde_json::Value::Null);
        Ok(ScriptValue::new(json))
    }
}

impl ScriptEnv for RhaiScriptEnv {
    fn compile(&self, source: &str) -> Result<CompiledScript, ScriptError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        Ok(CompiledScript::new(ast))
    }

    fn run(
        &self,
        script: &CompiledScript,
        bindings: &ScriptBindings,
    ) -> Result<ScriptValue, ScriptError> {
        let ast = script.downcast_ref::<AST>().ok_or_else(|| {
            ScriptError::Runtime("script was not compiled by this environment".into())
        })?;
        self.eval(ast, bindings)
    }

    fn run_named(
        &self,
        name: &str,
        bindings: &ScriptBindings,
    ) -> Result<ScriptValue, ScriptError> {
        let library = self.library.read();
        let ast = library
            .get(name)
            .ok_or_else(|| ScriptError::NotFound(name.to_string()))?;
        self.eval(ast, bindings)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
