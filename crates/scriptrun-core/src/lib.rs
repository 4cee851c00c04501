//! Multi-runtime script dispatch for scriptrun.
//!
//! A [`ScriptRuntime`] describes one invocation: which script, which engine
//! family, which host entry point, and the host handles the script may see.
//! [`ScriptDispatcher`] routes it to the [`ScriptHandler`] registered for the
//! engine kind and hands back an [`ExecutionResult`]. Handlers never return
//! errors to the caller; diagnostics land in the runtime's error report and
//! output sink instead.
//!
//! Engine families:
//!
//! - Lua scripts run in pooled interpreters, one pool per host document.
//! - Rhai scripts run in a single process-wide embedded runtime guarded by a
//!   global lock.
//! - WebAssembly text (`.wat` / `.wast`) is compiled on the fly and then
//!   scanned structurally for a command type or an event-handler method.
//! - Precompiled modules (`.wasm`) are addressed as `path::Type`.
//! - Ruby and node-graph scripts are acknowledged but not implemented.
//! - Workflow graphs are handed to a pre-loaded automation module.

pub mod binary_engine;
pub mod compiled_engine;
pub mod config;
pub mod dispatcher;
pub mod embedded_engine;
pub mod error;
pub mod logging;
pub mod lua_engine;
pub mod module_registry;
pub mod output;
pub mod pool;
pub mod preprocess;
pub mod reflect;
pub mod result;
pub mod runtime;
pub mod structural;
pub mod stub_engine;
pub mod wasm_host;
pub mod wasm_runtime;
pub mod workflow_engine;

pub use config::{CompilerSettings, EnvironmentSettings, ScriptrunConfig, WorkflowSettings};
pub use dispatcher::{DispatcherBuilder, ScriptDispatcher};
pub use error::{AddressError, ConfigError, DispatchError};
pub use output::{BufferedOutput, ConsoleOutput, LogNotifier, Notifier, OutputSink};
pub use pool::{DocumentPool, InterpreterPool};
pub use result::ExecutionResult;
pub use runtime::{DocumentId, EngineKind, ErrorReport, HostHandles, InterfaceKind, ScriptRuntime};

/// Executes one engine family.
///
/// Implementations must be safe to share across threads; the dispatcher holds
/// one instance per [`EngineKind`] for its whole lifetime.
pub trait ScriptHandler: Send + Sync + 'static {
    /// Run the script described by `runtime`, recording diagnostics on it.
    fn execute(&self, runtime: &mut ScriptRuntime) -> ExecutionResult;

    /// Human-readable runtime name (`lua-5.4`, `rhai`, `wasmtime`, ...).
    fn engine_name(&self) -> &str;
}
