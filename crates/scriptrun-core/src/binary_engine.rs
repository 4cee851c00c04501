//! Direct invocation of precompiled `.wasm` modules.

use crate::ScriptHandler;
use crate::compiled_engine::{invocation_failure, run_command};
use crate::error::AddressError;
use crate::output::Notifier;
use crate::result::ExecutionResult;
use crate::runtime::ScriptRuntime;
use crate::wasm_runtime::WasmRuntime;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// `module-path` or `module-path::TypeName`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryAddress {
    pub module: PathBuf,
    pub type_name: Option<String>,
}

impl FromStr for BinaryAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let (module, type_name) = match s.split_once("::") {
            Some((module, type_name)) => {
                let type_name = type_name.trim();
                if type_name.is_empty() {
                    return Err(AddressError::EmptyTypeName(s.to_string()));
                }
                (module.trim(), Some(type_name.to_string()))
            }
            None => (s, None),
        };
        if module.is_empty() {
            return Err(AddressError::MissingModule(s.to_string()));
        }
        Ok(Self {
            module: PathBuf::from(module),
            type_name,
        })
    }
}

impl fmt::Display for BinaryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.module.display())?;
        if let Some(type_name) = &self.type_name {
            write!(f, "::{type_name}")?;
        }
        Ok(())
    }
}

pub struct BinaryHandler {
    wasm: Arc<WasmRuntime>,
    notifier: Arc<dyn Notifier>,
}

impl BinaryHandler {
    pub fn new(wasm: Arc<WasmRuntime>, notifier: Arc<dyn Notifier>) -> Self {
        Self { wasm, notifier }
    }
}

impl ScriptHandler for BinaryHandler {
    fn execute(&self, runtime: &mut ScriptRuntime) -> ExecutionResult {
        if runtime.config_source_path.trim().is_empty() {
            self.notifier.notify(
                "No binary configured",
                &format!("`{}` has no module address to invoke.", runtime.script_name()),
            );
            return ExecutionResult::ExternalInterfaceNotImplementedException;
        }

        let address = match runtime.config_source_path.parse::<BinaryAddress>() {
            Ok(address) => address,
            Err(err) => {
                let text = err.to_string();
                self.notifier.notify("Invalid binary address", &text);
                runtime.diagnostics.runtime = Some(text);
                return ExecutionResult::ExecutionException;
            }
        };

        let module = match self.wasm.load_file(&address.module) {
            Ok(module) => module,
            Err(err) => return invocation_failure(runtime, self.notifier.as_ref(), &err),
        };
        tracing::debug!(%address, digest = %module.digest_hex(), "binary module loaded");

        let references: Vec<_> = self
            .wasm
            .registry()
            .loaded()
            .into_iter()
            .filter(|loaded| loaded.name != module.name)
            .collect();
        let host = runtime.host.clone();
        run_command(
            &self.wasm,
            self.notifier.as_ref(),
            &module,
            address.type_name.as_deref(),
            runtime,
            &host,
            &references,
        )
    }

    fn engine_name(&self) -> &str {
        "wasmtime"
    }
}
