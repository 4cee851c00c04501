//! CLI contract tests for `sr`.
//!
//! Every test runs against a temp directory with an explicit config file so
//! the user's own scriptrun config is never read.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// Fixture helpers
// =============================================================================

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let config = dir.path().join("scriptrun.toml");
        std::fs::write(&config, "host_version = 2024\n\n[logging]\nlevel = \"error\"\n")
            .expect("write config");
        Self { dir, config }
    }

    fn script(&self, name: &str, source: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, source).expect("write script");
        path
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    #[allow(deprecated)]
    fn sr(&self) -> Command {
        let mut cmd = Command::cargo_bin("sr").expect("sr binary should be built");
        cmd.arg("--config").arg(&self.config);
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

// =============================================================================
// sr run
// =============================================================================

#[test]
fn lua_print_goes_to_stdout() {
    let ws = Workspace::new();
    let script = ws.script("hello.lua", "print('hello', 42)\n");

    ws.sr()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello\t42"));
}

#[test]
fn lua_syntax_error_exits_with_compile_code() {
    let ws = Workspace::new();
    let script = ws.script("broken.lua", "local x = \n");

    ws.sr()
        .arg("run")
        .arg(&script)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Lua Traceback:"));
}

#[test]
fn os_exit_maps_to_sys_exited() {
    let ws = Workspace::new();
    let script = ws.script("quit.lua", "print('before')\nos.exit(0)\nprint('after')\n");

    ws.sr()
        .arg("run")
        .arg(&script)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("before").and(predicate::str::contains("after").not()));
}

#[test]
fn rhai_script_runs() {
    let ws = Workspace::new();
    let script = ws.script("sum.rhai", "let total = 0; for i in 1..=4 { total += i; } print(`total=${total}`);");

    ws.sr()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("total=10"));
}

#[test]
fn data_flag_reaches_the_script() {
    let ws = Workspace::new();
    let script = ws.script("data.lua", "print(__host__.command_data.name)\n");

    ws.sr()
        .args(["run", "--data", r#"{"name":"widget"}"#])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("widget"));
}

#[test]
fn invalid_data_is_fatal() {
    let ws = Workspace::new();
    let script = ws.script("data.lua", "print('unreachable')\n");

    ws.sr()
        .args(["run", "--data", "{not json"])
        .arg(&script)
        .assert()
        .code(64)
        .stderr(predicate::str::contains("--data"));
}

#[test]
fn wat_command_prints_and_sets_message() {
    let ws = Workspace::new();
    let script = ws.script(
        "tool.wat",
        r#"(module
  (import "host" "print" (func $print (param i32 i32)))
  (import "host" "set_message" (func $set_message (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "from wasm\0a")
  (data (i32.const 16) "done")
  (func (export "Tool.execute") (param $self i32) (result i32)
    (call $print (i32.const 0) (i32.const 10))
    (call $set_message (i32.const 16) (i32.const 4))
    (i32.const 0)))"#,
    );

    ws.sr()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("from wasm").and(predicate::str::contains("done")));
}

#[test]
fn binary_without_address_is_not_implemented() {
    let ws = Workspace::new();
    let script = ws.script("launcher.wasm", "");

    ws.sr().arg("run").arg(&script).assert().code(5);
}

#[test]
fn unimplemented_engines_exit_with_code_4() {
    let ws = Workspace::new();
    let script = ws.script("tool.rb", "puts 'hi'\n");

    ws.sr().arg("run").arg(&script).assert().code(4);
}

#[test]
fn engine_flag_overrides_extension() {
    let ws = Workspace::new();
    let script = ws.script("script.txt", "print('as lua')\n");

    ws.sr()
        .args(["run", "--engine", "lua"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("as lua"));
}

#[test]
fn unknown_extension_needs_engine_flag() {
    let ws = Workspace::new();
    let script = ws.script("script.txt", "print('x')\n");

    ws.sr()
        .arg("run")
        .arg(&script)
        .assert()
        .code(64)
        .stderr(predicate::str::contains("--engine"));
}

#[test]
fn unknown_engine_name_is_rejected_by_parser() {
    let ws = Workspace::new();
    ws.sr()
        .args(["run", "--engine", "cobol"])
        .arg(ws.path().join("x.cob"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cobol"));
}

// =============================================================================
// sr engines
// =============================================================================

#[test]
fn engines_lists_every_kind() {
    let ws = Workspace::new();
    ws.sr()
        .arg("engines")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("lua-5.4")
                .and(predicate::str::contains("rhai"))
                .and(predicate::str::contains("node_graph"))
                .and(predicate::str::contains("workflow"))
                .and(predicate::str::contains(".wasm")),
        );
}
