//! Compiled-language handler: WebAssembly text compiled on the fly.
//!
//! Sources are preprocessed, translated to a binary module by a
//! [`CompilerFrontEnd`], compiled by wasmtime and reflected. The entry point
//! is then found by shape through the structural scan rather than by a
//! fixed export name.

use crate::ScriptHandler;
use crate::config::EnvironmentSettings;
use crate::module_registry::CompiledModule;
use crate::output::Notifier;
use crate::preprocess::preprocess;
use crate::result::ExecutionResult;
use crate::runtime::{
    EngineKind, HostHandles, InterfaceKind, RUNTIME_TRACEBACK_BANNER, ScriptRuntime,
    normalize_newlines,
};
use crate::structural;
use crate::wasm_runtime::WasmRuntime;
use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use std::sync::Arc;

/// Translates one source language into a wasm binary.
pub trait CompilerFrontEnd: Send + Sync {
    fn language(&self) -> &'static str;

    /// `path` only labels diagnostics.
    fn translate(&self, source: &str, path: &Path) -> Result<Vec<u8>>;
}

/// `.wat`: the WebAssembly text format.
#[derive(Debug, Default, Clone, Copy)]
pub struct WatFrontEnd;

impl CompilerFrontEnd for WatFrontEnd {
    fn language(&self) -> &'static str {
        "wat"
    }

    fn translate(&self, source: &str, path: &Path) -> Result<Vec<u8>> {
        wat::parse_str(source).map_err(|mut err| {
            err.set_path(path);
            anyhow!(err)
        })
    }
}

/// `.wast`: a WebAssembly test script; its first `(module ...)` form is compiled.
#[derive(Debug, Default, Clone, Copy)]
pub struct WastFrontEnd;

impl CompilerFrontEnd for WastFrontEnd {
    fn language(&self) -> &'static str {
        "wast"
    }

    fn translate(&self, source: &str, path: &Path) -> Result<Vec<u8>> {
        let (start, end) = first_module_form(source)
            .ok_or_else(|| anyhow!("{}: script contains no (module ...) form", path.display()))?;
        // Pad with the lines before the form so reported lines still match.
        let padding = "\n".repeat(source[..start].matches('\n').count());
        WatFrontEnd.translate(&format!("{padding}{}", &source[start..end]), path)
    }
}

pub fn front_end_for(kind: EngineKind) -> Option<&'static dyn CompilerFrontEnd> {
    match kind {
        EngineKind::Wat => Some(&WatFrontEnd),
        EngineKind::Wast => Some(&WastFrontEnd),
        _ => None,
    }
}

/// Byte range of the first top-level `(module ...)` form. Strings, line
/// comments and nested block comments are skipped.
pub fn first_module_form(source: &str) -> Option<(usize, usize)> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b';' if bytes.get(i + 1) == Some(&b';') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'(' if bytes.get(i + 1) == Some(&b';') => {
                let mut nesting = 1;
                i += 2;
                while i < bytes.len() && nesting > 0 {
                    if bytes[i..].starts_with(b"(;") {
                        nesting += 1;
                        i += 2;
                    } else if bytes[i..].starts_with(b";)") {
                        nesting -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                continue;
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
            }
            b'(' => {
                if depth == 0 && is_module_keyword(&bytes[i + 1..]) {
                    start = Some(i);
                }
                depth += 1;
            }
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    if let Some(start) = start {
                        return Some((start, i + 1));
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_module_keyword(rest: &[u8]) -> bool {
    rest.strip_prefix(b"module")
        .is_some_and(|after| after.first().is_none_or(|b| b.is_ascii_whitespace() || *b == b')'))
}

/// Runs `.wat` and `.wast` sources.
pub struct CompiledHandler {
    wasm: Arc<WasmRuntime>,
    settings: Arc<dyn EnvironmentSettings>,
    notifier: Arc<dyn Notifier>,
    defines: Vec<String>,
}

impl CompiledHandler {
    pub fn new(
        wasm: Arc<WasmRuntime>,
        settings: Arc<dyn EnvironmentSettings>,
        notifier: Arc<dyn Notifier>,
        host_define: String,
    ) -> Self {
        Self {
            wasm,
            settings,
            notifier,
            defines: vec![host_define],
        }
    }

    /// Configured references, or every registered module when none are set.
    fn references(&self) -> Result<Vec<Arc<CompiledModule>>> {
        let paths = self.settings.referenced_modules();
        if paths.is_empty() {
            return Ok(self.wasm.registry().loaded());
        }
        paths
            .iter()
            .map(|path| {
                self.wasm
                    .load_file(path)
                    .with_context(|| format!("failed to load reference {}", path.display()))
            })
            .collect()
    }

    pub fn compile(
        &self,
        kind: EngineKind,
        path: &Path,
        source: &str,
        references: &[Arc<CompiledModule>],
    ) -> Result<CompiledModule> {
        let front_end =
            front_end_for(kind).ok_or_else(|| anyhow!("no compiler front-end for `{kind}`"))?;
        let expanded = preprocess(source, &self.defines)
            .with_context(|| format!("failed to preprocess {}", path.display()))?;
        let bytes = front_end.translate(&expanded, path)?;
        let name = path
            .file_stem()
            .map_or_else(|| "script".to_string(), |stem| stem.to_string_lossy().into_owned());
        let module = self.wasm.compile(&name, &bytes)?;

        let unresolved = WasmRuntime::unresolved_imports(&module, references);
        if !unresolved.is_empty() {
            bail!("unresolved imports: {}", unresolved.join(", "));
        }
        Ok(module)
    }

    fn compile_runtime(&self, runtime: &ScriptRuntime) -> Result<(CompiledModule, Vec<Arc<CompiledModule>>)> {
        let source = std::fs::read_to_string(&runtime.source_path)
            .with_context(|| format!("failed to read {}", runtime.source_path.display()))?;
        let references = self.references()?;
        let module = self.compile(runtime.engine, &runtime.source_path, &source, &references)?;
        Ok((module, references))
    }
}

impl ScriptHandler for CompiledHandler {
    fn execute(&self, runtime: &mut ScriptRuntime) -> ExecutionResult {
        let (module, references) = match self.compile_runtime(runtime) {
            Ok(compiled) => compiled,
            Err(err) => {
                let text = normalize_newlines(&format!("{err:#}"));
                runtime
                    .output
                    .write_error(&format!("{RUNTIME_TRACEBACK_BANNER}\n{text}\n"));
                self.notifier.notify("Compile error", &text);
                runtime.diagnostics.runtime = Some(text);
                return ExecutionResult::CompileException;
            }
        };

        let host = runtime.host.clone();
        dispatch_interface(
            &self.wasm,
            self.notifier.as_ref(),
            &module,
            None,
            runtime,
            &host,
            &references,
        )
    }

    fn engine_name(&self) -> &str {
        "wasmtime"
    }
}

/// Route a compiled module to the entry point `runtime.interface` asks for.
pub(crate) fn dispatch_interface(
    wasm: &WasmRuntime,
    notifier: &dyn Notifier,
    module: &CompiledModule,
    required_type: Option<&str>,
    runtime: &mut ScriptRuntime,
    host: &HostHandles,
    references: &[Arc<CompiledModule>],
) -> ExecutionResult {
    match runtime.interface {
        InterfaceKind::Command => {
            run_command(wasm, notifier, module, required_type, runtime, host, references)
        }
        InterfaceKind::EventHandler => {
            let Some((ty, method)) = structural::find_event_handler(&module.descriptor) else {
                tracing::debug!(module = %module.name, "no event handler method");
                return ExecutionResult::ExternalInterfaceNotImplementedException;
            };
            tracing::debug!(module = %module.name, handler = %ty.name, method = %method.name, "invoking event handler");
            match wasm.invoke_event_handler(module, method, host, Arc::clone(&runtime.output), references) {
                Ok(()) => ExecutionResult::Succeeded,
                Err(err) => invocation_failure(runtime, notifier, &err),
            }
        }
        InterfaceKind::Availability => ExecutionResult::ExternalInterfaceNotImplementedException,
    }
}

/// Structural command scan plus invocation.
pub(crate) fn run_command(
    wasm: &WasmRuntime,
    notifier: &dyn Notifier,
    module: &CompiledModule,
    required_type: Option<&str>,
    runtime: &mut ScriptRuntime,
    host: &HostHandles,
    references: &[Arc<CompiledModule>],
) -> ExecutionResult {
    let Some(command) = structural::find_command_type(&module.descriptor, required_type) else {
        let wanted = required_type.map_or_else(
            || "any command type".to_string(),
            |name| format!("command type `{name}`"),
        );
        notifier.notify(
            "Command not found",
            &format!("Module `{}` does not implement {wanted}.", module.name),
        );
        return ExecutionResult::ExternalInterfaceNotImplementedException;
    };

    match wasm.invoke_command(module, command, host, Arc::clone(&runtime.output), references) {
        Ok(outcome) => {
            runtime.command_status = Some(outcome.status);
            runtime.command_message = outcome.message;
            ExecutionResult::Succeeded
        }
        Err(err) => invocation_failure(runtime, notifier, &err),
    }
}

pub(crate) fn invocation_failure(
    runtime: &mut ScriptRuntime,
    notifier: &dyn Notifier,
    err: &anyhow::Error,
) -> ExecutionResult {
    let text = normalize_newlines(&format!("{err:#}"));
    runtime
        .output
        .write_error(&format!("{RUNTIME_TRACEBACK_BANNER}\n{text}\n"));
    notifier.notify("Script execution failed", &text);
    runtime.diagnostics.runtime = Some(text);
    ExecutionResult::ExecutionException
}
