//! Single entry point routing a [`ScriptRuntime`] to its engine's handler.

use crate::ScriptHandler;
use crate::binary_engine::BinaryHandler;
use crate::compiled_engine::CompiledHandler;
use crate::config::ScriptrunConfig;
use crate::embedded_engine::{EmbeddedHandler, EmbeddedRuntime};
use crate::error::DispatchError;
use crate::lua_engine::LuaHandler;
use crate::output::Notifier;
use crate::pool::DocumentPool;
use crate::result::ExecutionResult;
use crate::runtime::{EngineKind, ScriptRuntime};
use crate::stub_engine::UnimplementedHandler;
use crate::wasm_runtime::WasmRuntime;
use crate::workflow_engine::WorkflowHandler;
use anyhow::Result;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Collects one handler per [`EngineKind`].
pub struct DispatcherBuilder {
    handlers: [Option<Arc<dyn ScriptHandler>>; EngineKind::COUNT],
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// Register `handler` for `kind`, replacing any previous one.
    #[must_use]
    pub fn register(mut self, kind: EngineKind, handler: Arc<dyn ScriptHandler>) -> Self {
        self.handlers[kind.index()] = Some(handler);
        self
    }

    pub fn build(self) -> Result<ScriptDispatcher, DispatchError> {
        let mut handlers = Vec::with_capacity(EngineKind::COUNT);
        for (kind, handler) in EngineKind::ALL.into_iter().zip(self.handlers) {
            handlers.push(handler.ok_or(DispatchError::MissingHandler(kind))?);
        }
        Ok(ScriptDispatcher { handlers })
    }
}

/// Routes every dispatch to the handler registered for the runtime's engine.
pub struct ScriptDispatcher {
    handlers: Vec<Arc<dyn ScriptHandler>>,
}

impl ScriptDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// The stock handler set: pooled Lua, the process-wide Rhai runtime, and
    /// one wasmtime runtime shared by the compiled, binary and workflow
    /// handlers.
    pub fn with_defaults(config: &ScriptrunConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let wasm = Arc::new(WasmRuntime::new()?);
        let dispatcher = Self::builder()
            .register(EngineKind::Lua, Arc::new(LuaHandler::new(Arc::new(DocumentPool::new()))))
            .register(
                EngineKind::Rhai,
                Arc::new(EmbeddedHandler::new(EmbeddedRuntime::process())),
            )
            .register(EngineKind::Wat, compiled(&wasm, config, &notifier))
            .register(EngineKind::Wast, compiled(&wasm, config, &notifier))
            .register(
                EngineKind::Binary,
                Arc::new(BinaryHandler::new(Arc::clone(&wasm), Arc::clone(&notifier))),
            )
            .register(
                EngineKind::Ruby,
                Arc::new(UnimplementedHandler::new(EngineKind::Ruby, Arc::clone(&notifier))),
            )
            .register(
                EngineKind::NodeGraph,
                Arc::new(UnimplementedHandler::new(EngineKind::NodeGraph, Arc::clone(&notifier))),
            )
            .register(
                EngineKind::Workflow,
                Arc::new(WorkflowHandler::new(wasm, config.workflow.clone(), notifier)),
            )
            .build()?;
        Ok(dispatcher)
    }

    pub fn handler(&self, kind: EngineKind) -> &Arc<dyn ScriptHandler> {
        &self.handlers[kind.index()]
    }

    /// `(kind, handler name)` for every engine kind.
    pub fn engine_names(&self) -> Vec<(EngineKind, String)> {
        EngineKind::ALL
            .into_iter()
            .map(|kind| (kind, self.handler(kind).engine_name().to_string()))
            .collect()
    }

    /// Run `runtime` through its engine's handler. Never fails: the outcome
    /// is the returned code plus whatever the handler left in
    /// `runtime.diagnostics`.
    pub fn dispatch(&self, runtime: &mut ScriptRuntime) -> ExecutionResult {
        let span = tracing::debug_span!(
            "dispatch",
            engine = %runtime.engine,
            interface = %runtime.interface,
            script = %runtime.source_path.display(),
            document = %runtime.host.document,
        );
        let _guard = span.enter();

        runtime.diagnostics.clear();
        runtime.results.clear();
        runtime.command_message.clear();
        runtime.command_status = None;
        let handler = self.handler(runtime.engine);
        let result = match catch_unwind(AssertUnwindSafe(|| handler.execute(runtime))) {
            Ok(result) => result,
            Err(payload) => {
                let text = format!("{} handler panicked: {}", handler.engine_name(), panic_message(&*payload));
                tracing::error!(error = %text, "handler panicked");
                runtime.diagnostics.runtime = Some(text);
                ExecutionResult::ExecutionException
            }
        };

        if result.is_failure() {
            tracing::debug!(%result, "script failed");
        } else {
            tracing::trace!(%result, "script finished");
        }
        result
    }
}

fn compiled(
    wasm: &Arc<WasmRuntime>,
    config: &ScriptrunConfig,
    notifier: &Arc<dyn Notifier>,
) -> Arc<dyn ScriptHandler> {
    Arc::new(CompiledHandler::new(
        Arc::clone(wasm),
        Arc::new(config.compiler.clone()),
        Arc::clone(notifier),
        config.host_define(),
    ))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
