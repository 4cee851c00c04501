//! Embedded Rhai interpreter.
//!
//! There is one interpreter per process, created lazily on first use and
//! never torn down. Every invocation holds the global lock for its whole
//! duration, so embedded scripts never run concurrently.

use crate::ScriptHandler;
use crate::result::ExecutionResult;
use crate::runtime::{EMBEDDED_TRACEBACK_BANNER, ScriptRuntime, normalize_newlines};
use parking_lot::{Mutex, MutexGuard};
use rhai::{Engine, Map, Position, Scope};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Process-wide interpreter plus its lock.
#[derive(Default)]
pub struct EmbeddedRuntime {
    engine: Mutex<Option<Engine>>,
    initializations: AtomicUsize,
}

impl EmbeddedRuntime {
    /// A standalone runtime. Most callers want [`EmbeddedRuntime::process`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The runtime shared by every handler in this process.
    pub fn process() -> Arc<Self> {
        static PROCESS: OnceLock<Arc<EmbeddedRuntime>> = OnceLock::new();
        Arc::clone(PROCESS.get_or_init(|| Arc::new(Self::new())))
    }

    /// Take the global lock, building the interpreter on first use.
    pub fn lock(&self) -> EmbeddedGuard<'_> {
        let mut engine = self.engine.lock();
        if engine.is_none() {
            *engine = Some(Engine::new());
            let count = self.initializations.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(count, "embedded interpreter initialized");
        }
        EmbeddedGuard { engine }
    }

    pub fn is_initialized(&self) -> bool {
        self.initializations.load(Ordering::SeqCst) > 0
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

/// Scoped hold on the global interpreter lock.
pub struct EmbeddedGuard<'a> {
    engine: MutexGuard<'a, Option<Engine>>,
}

impl EmbeddedGuard<'_> {
    pub fn engine(&mut self) -> &mut Engine {
        self.engine.get_or_insert_with(Engine::new)
    }
}

/// Runs `.rhai` scripts on the process-wide interpreter.
pub struct EmbeddedHandler {
    runtime: Arc<EmbeddedRuntime>,
}

impl EmbeddedHandler {
    pub fn new(runtime: Arc<EmbeddedRuntime>) -> Self {
        Self { runtime }
    }
}

impl Default for EmbeddedHandler {
    fn default() -> Self {
        Self::new(EmbeddedRuntime::process())
    }
}

fn build_scope(runtime: &ScriptRuntime) -> Result<Scope<'static>, String> {
    let host = rhai::serde::to_dynamic(runtime.host.to_value()).map_err(|err| err.to_string())?;
    let mut scope = Scope::new();
    scope.push_constant("__host__", host);
    scope.push("__file__", runtime.source_path.display().to_string());
    scope.push("__name__", "__main__".to_string());
    scope.push("__debug__", runtime.debug_mode);
    scope.push("__result__", Map::new());
    for (name, value) in runtime.command.bindings(&runtime.source_path) {
        scope.push(name, value);
    }
    Ok(scope)
}

fn copy_results(scope: &Scope<'_>, runtime: &mut ScriptRuntime) {
    let Some(published) = scope.get_value::<Map>("__result__") else {
        return;
    };
    for (key, value) in published {
        match rhai::serde::from_dynamic::<serde_json::Value>(&value) {
            Ok(json) => {
                runtime.results.insert(key.to_string(), json);
            }
            Err(err) => tracing::debug!(key = %key, error = %err, "skipping unserializable result"),
        }
    }
}

fn run_script(engine: &Engine, runtime: &mut ScriptRuntime) -> Result<(), String> {
    let source = std::fs::read_to_string(&runtime.source_path)
        .map_err(|err| format!("cannot read {}: {err}", runtime.source_path.display()))?;
    let mut scope = build_scope(runtime)?;
    engine
        .run_with_scope(&mut scope, &source)
        .map_err(|err| err.to_string())?;
    copy_results(&scope, runtime);
    Ok(())
}

impl ScriptHandler for EmbeddedHandler {
    fn execute(&self, runtime: &mut ScriptRuntime) -> ExecutionResult {
        let mut guard = self.runtime.lock();
        let engine = guard.engine();

        let out = Arc::clone(&runtime.output);
        engine.on_print(move |text| out.write(&format!("{text}\n")));
        let out = Arc::clone(&runtime.output);
        engine.on_debug(move |text, source, pos: Position| {
            let origin = source.unwrap_or("script");
            if pos.is_none() {
                out.write(&format!("[{origin}] {text}\n"));
            } else {
                out.write(&format!("[{origin} {pos}] {text}\n"));
            }
        });

        let outcome = run_script(engine, runtime);

        // The interpreter outlives this invocation; drop our sink.
        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});

        match outcome {
            Ok(()) => ExecutionResult::Succeeded,
            Err(message) => {
                let text = normalize_newlines(&message);
                runtime
                    .output
                    .write_error(&format!("{EMBEDDED_TRACEBACK_BANNER}\n{text}\n"));
                runtime.diagnostics.embedded = Some(text);
                ExecutionResult::ExecutionException
            }
        }
    }

    fn engine_name(&self) -> &str {
        "rhai"
    }
}
