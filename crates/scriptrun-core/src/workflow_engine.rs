//! Workflow graphs, handed to a pre-loaded automation module.
//!
//! The automation module is produced and registered by the workflow tool;
//! this handler only builds the journal and invokes the module's entry type.

use crate::ScriptHandler;
use crate::compiled_engine::run_command;
use crate::config::WorkflowSettings;
use crate::output::Notifier;
use crate::result::ExecutionResult;
use crate::runtime::{HostHandles, ScriptRuntime};
use crate::wasm_runtime::WasmRuntime;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Key/value set the automation entry point reads as command data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalData {
    pub target_document: String,
    pub show_ui: bool,
    pub automation: bool,
    pub path_execute: bool,
    pub force_manual_run: bool,
    pub shutdown_existing_session: bool,
}

impl JournalData {
    pub fn for_runtime(runtime: &ScriptRuntime) -> Self {
        Self {
            target_document: runtime.source_path.display().to_string(),
            show_ui: runtime.debug_mode,
            automation: true,
            path_execute: true,
            force_manual_run: false,
            shutdown_existing_session: true,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub struct WorkflowHandler {
    wasm: Arc<WasmRuntime>,
    settings: WorkflowSettings,
    notifier: Arc<dyn Notifier>,
}

impl WorkflowHandler {
    pub fn new(wasm: Arc<WasmRuntime>, settings: WorkflowSettings, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            wasm,
            settings,
            notifier,
        }
    }
}

impl ScriptHandler for WorkflowHandler {
    fn execute(&self, runtime: &mut ScriptRuntime) -> ExecutionResult {
        let Some(module) = self.wasm.registry().find(&self.settings.module) else {
            let text = format!(
                "Automation module `{}` is not loaded. Has the workflow tool been run yet?",
                self.settings.module
            );
            self.notifier.notify("Workflow unavailable", &text);
            runtime.diagnostics.runtime = Some(text);
            return ExecutionResult::ExecutionException;
        };

        let journal = JournalData::for_runtime(runtime);
        tracing::debug!(module = %module.name, ?journal, "running workflow");
        let host = HostHandles {
            command_data: journal.to_value(),
            ..runtime.host.clone()
        };
        let references: Vec<_> = self
            .wasm
            .registry()
            .loaded()
            .into_iter()
            .filter(|loaded| loaded.name != module.name)
            .collect();
        run_command(
            &self.wasm,
            self.notifier.as_ref(),
            &module,
            Some(&self.settings.entry_type),
            runtime,
            &host,
            &references,
        )
    }

    fn engine_name(&self) -> &str {
        "wasmtime"
    }
}
