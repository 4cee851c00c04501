//! Wasm execution backed by wasmtime.
//!
//! One [`WasmRuntime`] owns the wasmtime `Engine` and the
//! [`ModuleRegistry`]. Every invocation gets a fresh `Store` carrying a
//! [`HostState`], a linker with WASI p1 and the host ABI, and instances of
//! whichever reference modules the script imports from.

use crate::module_registry::{CompiledModule, ModuleRegistry};
use crate::output::OutputSink;
use crate::runtime::{CommandStatus, HostHandles};
use crate::structural::{MethodDescriptor, TypeDescriptor};
use crate::wasm_host::{self, HOST_FUNCTIONS, HOST_MODULE, HostState, WASI_MODULE};
use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use std::sync::Arc;
use wasmtime::{Config, Engine, Instance, Linker, OptLevel, Store, Val, ValType};

/// What a command's `execute` handed back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutcome {
    pub code: i32,
    pub status: CommandStatus,
    pub message: String,
}

pub struct WasmRuntime {
    engine: Engine,
    registry: ModuleRegistry,
}

impl WasmRuntime {
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        config.cranelift_opt_level(OptLevel::Speed);
        let engine = Engine::new(&config).context("failed to create wasmtime engine")?;
        Ok(Self {
            engine,
            registry: ModuleRegistry::new(),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Compile a transient module; it is not registered.
    pub fn compile(&self, name: &str, bytes: &[u8]) -> Result<CompiledModule> {
        CompiledModule::compile(&self.engine, name, bytes)
    }

    /// Load a binary module from disk and register it.
    pub fn load_file(&self, path: &Path) -> Result<Arc<CompiledModule>> {
        self.registry.load_file(&self.engine, path)
    }

    /// Imports satisfied by neither the host ABI, WASI, nor a reference,
    /// as `module::name`.
    pub fn unresolved_imports(module: &CompiledModule, references: &[Arc<CompiledModule>]) -> Vec<String> {
        module
            .module
            .imports()
            .filter(|import| match import.module() {
                HOST_MODULE => !HOST_FUNCTIONS.contains(&import.name()),
                WASI_MODULE => false,
                other => !references
                    .iter()
                    .any(|reference| reference.name == other && reference.exports(import.name())),
            })
            .map(|import| format!("{}::{}", import.module(), import.name()))
            .collect()
    }

    fn instantiate(
        &self,
        module: &CompiledModule,
        state: HostState,
        references: &[Arc<CompiledModule>],
    ) -> Result<(Store<HostState>, Instance)> {
        let mut store = Store::new(&self.engine, state);
        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        wasmtime_wasi::p1::add_to_linker_sync(&mut linker, HostState::wasi_ctx)
            .context("failed to add WASI to linker")?;
        wasm_host::register_host_functions(&mut linker)
            .context("failed to register host functions")?;

        for reference in references.iter().filter(|r| module.imports_from(&r.name)) {
            linker
                .module(&mut store, &reference.name, &reference.module)
                .with_context(|| format!("failed to link reference module `{}`", reference.name))?;
        }

        let instance = linker
            .instantiate(&mut store, &module.module)
            .with_context(|| format!("failed to instantiate module `{}`", module.name))?;
        Ok((store, instance))
    }

    /// Construct `command` (through `new` when exported) and run `execute`.
    pub fn invoke_command(
        &self,
        module: &CompiledModule,
        command: &TypeDescriptor,
        host: &HostHandles,
        output: Arc<dyn OutputSink>,
        references: &[Arc<CompiledModule>],
    ) -> Result<CommandOutcome> {
        let entry = command
            .entry()
            .ok_or_else(|| anyhow!("type `{}` has no execute method", command.name))?;
        let (mut store, instance) = self.instantiate(module, HostState::new(output, host), references)?;

        let this = match command.constructor() {
            Some(ctor) => instance
                .get_typed_func::<(), i32>(&mut store, &ctor.export)
                .with_context(|| format!("`{}` has an unexpected signature", ctor.export))?
                .call(&mut store, ())
                .with_context(|| format!("`{}` failed", ctor.export))?,
            None => 0,
        };

        let code = instance
            .get_typed_func::<i32, i32>(&mut store, &entry.export)
            .with_context(|| format!("`{}` has an unexpected signature", entry.export))?
            .call(&mut store, this)
            .with_context(|| format!("`{}` failed", entry.export))?;

        tracing::debug!(module = %module.name, command = %command.name, code, "command returned");
        Ok(CommandOutcome {
            code,
            status: CommandStatus::from_code(code),
            message: store.into_data().into_message(),
        })
    }

    /// Call a static `(sender, e)` method with the event handles.
    pub fn invoke_event_handler(
        &self,
        module: &CompiledModule,
        method: &MethodDescriptor,
        host: &HostHandles,
        output: Arc<dyn OutputSink>,
        references: &[Arc<CompiledModule>],
    ) -> Result<()> {
        let (mut store, instance) = self.instantiate(module, HostState::new(output, host), references)?;
        let func = instance
            .get_func(&mut store, &method.export)
            .ok_or_else(|| anyhow!("module `{}` has no export `{}`", module.name, method.export))?;

        let ty = func.ty(&store);
        let handles = [HostHandles::EVENT_SENDER, HostHandles::EVENT_ARGS];
        let args = ty
            .params()
            .zip(handles)
            .map(|(param, handle)| handle_val(&param, handle))
            .collect::<Result<Vec<_>>>()?;
        let mut results = vec![Val::I32(0); ty.results().len()];

        func.call(&mut store, &args, &mut results)
            .with_context(|| format!("`{}` failed", method.export))?;
        Ok(())
    }
}

fn handle_val(ty: &ValType, handle: u32) -> Result<Val> {
    match ty {
        ValType::I32 => Ok(Val::I32(handle as i32)),
        ValType::I64 => Ok(Val::I64(i64::from(handle))),
        other => bail!("event parameter of type {other:?} cannot carry a host handle"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BufferedOutput;
    use crate::structural::{find_command_type, find_event_handler};

    const GREETER: &str = r#"(module
        (import "host" "print" (func $print (param i32 i32)))
        (import "host" "set_message" (func $message (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 16) "hello from wasm\n")
        (data (i32.const 64) "done")
        (func (export "Greeter.new") (result i32) i32.const 7)
        (func (export "Greeter.execute") (param $self i32) (result i32)
            (call $print (i32.const 16) (i32.const 16))
            (call $message (i32.const 64) (i32.const 4))
            (i32.sub (local.get $self) (i32.const 6))))"#;

    fn compile(runtime: &WasmRuntime, wat: &str) -> CompiledModule {
        runtime.compile("script", &wat::parse_str(wat).unwrap()).unwrap()
    }

    #[test]
    fn command_runs_with_constructor_and_message() {
        let runtime = WasmRuntime::new().unwrap();
        let module = compile(&runtime, GREETER);
        let command = find_command_type(&module.descriptor, None).unwrap();
        let sink = Arc::new(BufferedOutput::new());

        let outcome = runtime
            .invoke_command(&module, command, &HostHandles::default(), sink.clone(), &[])
            .unwrap();
        assert_eq!(outcome.code, 1);
        assert_eq!(outcome.status, CommandStatus::Cancelled);
        assert_eq!(outcome.message, "done");
        assert_eq!(sink.stdout(), "hello from wasm\n");
    }

    #[test]
    fn trap_is_an_error() {
        let runtime = WasmRuntime::new().unwrap();
        let module = compile(
            &runtime,
            r#"(module (func (export "Broken.execute") (param $self i32) (result i32) unreachable))"#,
        );
        let command = find_command_type(&module.descriptor, None).unwrap();
        let err = runtime
            .invoke_command(&module, command, &HostHandles::default(), Arc::new(BufferedOutput::new()), &[])
            .unwrap_err();
        assert!(format!("{err:#}").contains("Broken.execute"));
    }

    #[test]
    fn event_handler_reads_handles() {
        let runtime = WasmRuntime::new().unwrap();
        let module = compile(
            &runtime,
            r#"(module
                (import "host" "handle_read" (func $read (param i32 i32 i32) (result i32)))
                (import "host" "print" (func $print (param i32 i32)))
                (memory (export "memory") 1)
                (func (export "Hooks.opened") (param $sender i32) (param $e i32)
                    (local $n i32)
                    (local.set $n (call $read (local.get $e) (i32.const 0) (i32.const 256)))
                    (call $print (i32.const 0) (local.get $n))))"#,
        );
        let (_, method) = find_event_handler(&module.descriptor).unwrap();
        let host = HostHandles {
            event_args: serde_json::json!({"doc": "a"}),
            ..HostHandles::default()
        };
        let sink = Arc::new(BufferedOutput::new());
        runtime
            .invoke_event_handler(&module, method, &host, sink.clone(), &[])
            .unwrap();
        assert_eq!(sink.stdout(), r#"{"doc":"a"}"#);
    }

    #[test]
    fn reference_modules_are_linked() {
        let runtime = WasmRuntime::new().unwrap();
        let geometry = runtime
            .registry()
            .get_or_compile(
                runtime.engine(),
                "geometry",
                &wat::parse_str(r#"(module (func (export "double") (param i32) (result i32)
                    local.get 0 i32.const 2 i32.mul))"#)
                .unwrap(),
            )
            .unwrap();
        let module = compile(
            &runtime,
            r#"(module
                (import "geometry" "double" (func $double (param i32) (result i32)))
                (func (export "Calc.execute") (param $self i32) (result i32)
                    (call $double (i32.const 21))))"#,
        );

        let references = vec![geometry];
        assert!(WasmRuntime::unresolved_imports(&module, &references).is_empty());
        let command = find_command_type(&module.descriptor, None).unwrap();
        let outcome = runtime
            .invoke_command(&module, command, &HostHandles::default(), Arc::new(BufferedOutput::new()), &references)
            .unwrap();
        assert_eq!(outcome.code, 42);
        assert_eq!(outcome.status, CommandStatus::Failed);
    }

    #[test]
    fn unknown_imports_are_reported() {
        let runtime = WasmRuntime::new().unwrap();
        let module = compile(
            &runtime,
            r#"(module
                (import "host" "print" (func (param i32 i32)))
                (import "host" "launch_missiles" (func))
                (import "physics" "gravity" (func (result f64))))"#,
        );
        assert_eq!(
            WasmRuntime::unresolved_imports(&module, &[]),
            vec!["host::launch_missiles".to_string(), "physics::gravity".to_string()]
        );
    }
}
