//! End-to-end dispatch through the stock handler set.

use scriptrun_core::output::RecordingNotifier;
use scriptrun_core::runtime::{CommandStatus, LUA_TRACEBACK_BANNER};
use scriptrun_core::{
    BufferedOutput, DocumentId, EngineKind, ExecutionResult, HostHandles, InterfaceKind,
    ScriptDispatcher, ScriptRuntime, ScriptrunConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    notifier: Arc<RecordingNotifier>,
    dispatcher: ScriptDispatcher,
}

impl Harness {
    fn new() -> Self {
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = ScriptDispatcher::with_defaults(&ScriptrunConfig::default(), notifier.clone())
            .expect("default dispatcher");
        Self {
            dir: TempDir::new().expect("temp dir"),
            notifier,
            dispatcher,
        }
    }

    fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    fn runtime(&self, name: &str, source: &str) -> (ScriptRuntime, Arc<BufferedOutput>) {
        let path = self.write(name, source);
        let sink = Arc::new(BufferedOutput::new());
        let runtime = ScriptRuntime::for_script(path, sink.clone()).expect("known extension");
        (runtime, sink)
    }
}

// =============================================================================
// Lua
// =============================================================================

#[test]
fn lua_globals_do_not_leak_between_runs() {
    let h = Harness::new();
    let doc = HostHandles {
        document: DocumentId::new("doc-a"),
        ..HostHandles::default()
    };

    let (rt, _) = h.runtime("set.lua", "leaked = 'yes'");
    let mut rt = rt.with_host(doc.clone());
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);

    let (rt, sink) = h.runtime("get.lua", "print(leaked)");
    let mut rt = rt.with_host(doc);
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(sink.stdout(), "nil\n");
}

#[test]
fn lua_globals_survive_when_kept() {
    let h = Harness::new();
    let doc = HostHandles {
        document: DocumentId::new("doc-keep"),
        ..HostHandles::default()
    };

    let (rt, _) = h.runtime("set.lua", "counter = (counter or 0) + 1");
    let mut rt = rt.with_host(doc.clone()).with_clean_engine(true);
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);

    let (rt, sink) = h.runtime("get.lua", "print(counter)");
    let mut rt = rt.with_host(doc);
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(sink.stdout(), "1\n");
}

#[test]
fn lua_runtime_error_fills_both_reports() {
    let h = Harness::new();
    let (mut rt, sink) = h.runtime("boom.lua", "local t = nil\nreturn t.field\n");
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::ExecutionException);
    assert!(rt.diagnostics.interpreter.is_some());
    assert!(rt.diagnostics.runtime.is_some());
    assert!(sink.stderr().starts_with(LUA_TRACEBACK_BANNER));
}

#[test]
fn lua_results_are_copied_back() {
    let h = Harness::new();
    let (mut rt, _) = h.runtime("result.lua", "__result__.answer = 42\n__result__.label = 'ok'");
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(rt.results["answer"], serde_json::json!(42));
    assert_eq!(rt.results["label"], serde_json::json!("ok"));
}

// =============================================================================
// Rhai
// =============================================================================

#[test]
fn rhai_reads_host_handles() {
    let h = Harness::new();
    let (rt, sink) = h.runtime("host.rhai", "print(__host__.command_data.count * 2);");
    let mut rt = rt.with_host(HostHandles {
        command_data: serde_json::json!({ "count": 21 }),
        ..HostHandles::default()
    });
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(sink.stdout(), "42\n");
}

#[test]
fn rhai_error_is_execution_exception() {
    let h = Harness::new();
    let (mut rt, _) = h.runtime("bad.rhai", "let x = undefined_function();");
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::ExecutionException);
    assert!(rt.diagnostics.embedded.is_some());
}

// =============================================================================
// Compiled wasm text
// =============================================================================

const COUNTER: &str = r#"(module
  (import "host" "print" (func $print (param i32 i32)))
  (import "host" "selection_len" (func $selection_len (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "0123456789")
  (func (export "Counter.execute") (param $self i32) (result i32)
    (call $print (call $selection_len) (i32.const 1))
    (i32.const 2)))"#;

#[test]
fn wat_command_sees_selection() {
    let h = Harness::new();
    let (rt, sink) = h.runtime("counter.wat", COUNTER);
    let mut rt = rt.with_host(HostHandles {
        selection: vec![11, 22, 33],
        ..HostHandles::default()
    });
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(sink.stdout(), "3");
    assert_eq!(rt.command_status, Some(CommandStatus::Failed));
}

#[test]
fn wat_compile_error_reports_once() {
    let h = Harness::new();
    let (mut rt, _) = h.runtime("broken.wat", "(module (func $f (i32.add)))");
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::CompileException);
    assert_eq!(h.notifier.count(), 1);
}

#[test]
fn wat_event_handler_interface() {
    let h = Harness::new();
    let (rt, sink) = h.runtime(
        "hooks.wat",
        r#"(module
  (import "host" "print" (func $print (param i32 i32)))
  (import "host" "handle_len" (func $handle_len (param i32) (result i32)))
  (import "host" "handle_read" (func $handle_read (param i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "Hooks.on_saved") (param $sender i32) (param $e i32)
    (local $len i32)
    (local.set $len (call $handle_len (local.get $e)))
    (drop (call $handle_read (local.get $e) (i32.const 0) (local.get $len)))
    (call $print (i32.const 0) (local.get $len))))"#,
    );
    let mut rt = rt
        .with_interface(InterfaceKind::EventHandler)
        .with_host(HostHandles {
            event_args: serde_json::json!("saved"),
            ..HostHandles::default()
        });
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(sink.stdout(), "\"saved\"");
}

#[test]
fn wast_uses_first_module() {
    let h = Harness::new();
    let source = format!("{COUNTER}\n(assert_return (invoke \"Counter.execute\" (i32.const 0)) (i32.const 2))\n");
    let (mut rt, sink) = h.runtime("counter.wast", &source);
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(sink.stdout(), "0");
}

// =============================================================================
// Binary, workflow and stubs
// =============================================================================

#[test]
fn binary_module_is_invoked_by_address() {
    let h = Harness::new();
    let module = h.write("counter.wasm", wat::parse_str(COUNTER).expect("valid wat"));
    let launcher = h.write("launcher.wasm", "");
    let sink = Arc::new(BufferedOutput::new());
    let mut rt = ScriptRuntime::new(EngineKind::Binary, launcher, sink.clone())
        .with_address(format!("{}::Counter", module.display()));

    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(sink.stdout(), "0");
}

#[test]
fn workflow_without_automation_module() {
    let h = Harness::new();
    let (mut rt, _) = h.runtime("nightly.flow", "{}");
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::ExecutionException);
    assert_eq!(h.notifier.count(), 1);
}

#[test]
fn workflow_runs_registered_automation() {
    let h = Harness::new();
    let automation = h.write(
        "workflow_automation.wasm",
        wat::parse_str(
            r#"(module
  (import "host" "print" (func $print (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "automated")
  (func (export "Automation.execute") (param $self i32) (result i32)
    (call $print (i32.const 0) (i32.const 9))
    (i32.const 0)))"#,
        )
        .expect("valid wat"),
    );

    // The workflow tool loads its module through the binary engine.
    let sink = Arc::new(BufferedOutput::new());
    let mut loader = ScriptRuntime::new(EngineKind::Binary, &automation, sink)
        .with_address(automation.display().to_string());
    assert_eq!(h.dispatcher.dispatch(&mut loader), ExecutionResult::Succeeded);

    let (mut rt, sink) = h.runtime("nightly.flow", "{}");
    assert_eq!(h.dispatcher.dispatch(&mut rt), ExecutionResult::Succeeded);
    assert_eq!(sink.stdout(), "automated");
}

#[test]
fn stub_engines_report_not_implemented() {
    let h = Harness::new();
    for name in ["tool.rb", "graph.graph"] {
        let (mut rt, sink) = h.runtime(name, "");
        assert_eq!(
            h.dispatcher.dispatch(&mut rt),
            ExecutionResult::EngineNotImplementedException
        );
        assert!(sink.entries().is_empty());
    }
    assert_eq!(h.notifier.count(), 2);
}
