//! Engine kinds that are recognized but have no runtime behind them.

use crate::ScriptHandler;
use crate::output::Notifier;
use crate::result::ExecutionResult;
use crate::runtime::{EngineKind, ScriptRuntime};
use std::sync::Arc;

pub struct UnimplementedHandler {
    kind: EngineKind,
    notifier: Arc<dyn Notifier>,
}

impl UnimplementedHandler {
    pub fn new(kind: EngineKind, notifier: Arc<dyn Notifier>) -> Self {
        Self { kind, notifier }
    }
}

impl ScriptHandler for UnimplementedHandler {
    fn execute(&self, runtime: &mut ScriptRuntime) -> ExecutionResult {
        tracing::debug!(engine = %self.kind, script = %runtime.source_path.display(), "engine not implemented");
        self.notifier.notify(
            "Engine not implemented",
            &format!(
                "The {} engine is not implemented; `{}` was not run.",
                self.kind,
                runtime.script_name()
            ),
        );
        ExecutionResult::EngineNotImplementedException
    }

    fn engine_name(&self) -> &str {
        "unimplemented"
    }
}
