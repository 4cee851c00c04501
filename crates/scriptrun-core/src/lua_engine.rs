//! Reusable Lua interpreters.
//!
//! Each [`PooledInterpreter`] owns a `mlua::Lua` state and a persistent scope
//! table that scripts run in. The scope falls back to a builtins table (where
//! the per-invocation `print` lives) and from there to the real globals, so
//! stripping the scope never touches the standard library.

use crate::ScriptHandler;
use crate::output::OutputSink;
use crate::pool::InterpreterPool;
use crate::result::ExecutionResult;
use crate::runtime::{
    DocumentId, LUA_TRACEBACK_BANNER, RUNTIME_TRACEBACK_BANNER, ScriptRuntime, normalize_newlines,
};
use anyhow::{Context, Result};
use mlua::{Function, Lua, LuaSerdeExt, RegistryKey, Table, Value, Variadic};
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// Raised by `os.exit` to stop a script without it counting as a failure.
#[derive(Debug, thiserror::Error)]
#[error("script exited with status {code}")]
pub struct ScriptExit {
    pub code: i64,
}

/// One line of compiler output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub message: String,
    pub line: Option<u32>,
}

/// Accumulates every compiler message instead of stopping at the first.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    diagnostics: Vec<CompileDiagnostic>,
}

fn location_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:.*?):(\d+): (.*)$").ok())
        .as_ref()
}

impl ErrorCollector {
    pub fn collect(&mut self, err: &mlua::Error) {
        match err {
            mlua::Error::SyntaxError { message, .. } => {
                for line in message.lines().filter(|line| !line.trim().is_empty()) {
                    self.push(line);
                }
            }
            other => self.push(&other.to_string()),
        }
    }

    pub fn push(&mut self, raw: &str) {
        let parsed = location_re().and_then(|re| re.captures(raw)).and_then(|caps| {
            let line = caps.get(1)?.as_str().parse().ok()?;
            Some(CompileDiagnostic {
                message: caps.get(2)?.as_str().to_string(),
                line: Some(line),
            })
        });
        self.diagnostics.push(parsed.unwrap_or_else(|| CompileDiagnostic {
            message: raw.to_string(),
            line: None,
        }));
    }

    pub fn diagnostics(&self) -> &[CompileDiagnostic] {
        &self.diagnostics
    }

    pub fn render(&self) -> String {
        self.diagnostics
            .iter()
            .map(|diag| match diag.line {
                Some(line) => format!("{} (line {line})", diag.message),
                None => diag.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A Lua state plus the scope table scripts run against.
pub struct PooledInterpreter {
    lua: Lua,
    scope: RegistryKey,
    builtins: RegistryKey,
    id: u64,
    document: DocumentId,
    runs: u64,
}

fn index_metatable<'lua>(lua: &'lua Lua, fallback: Table<'lua>) -> mlua::Result<Table<'lua>> {
    let meta = lua.create_table()?;
    meta.set("__index", fallback)?;
    Ok(meta)
}

fn exit_status(code: Option<&Value<'_>>) -> i64 {
    match code {
        None | Some(Value::Nil | Value::Boolean(true)) => 0,
        Some(Value::Integer(code)) => *code,
        Some(Value::Number(code)) => *code as i64,
        Some(_) => 1,
    }
}

/// Walk callback wrappers looking for a [`ScriptExit`].
fn exit_code(err: &mlua::Error) -> Option<i64> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<ScriptExit>().map(|exit| exit.code),
        mlua::Error::CallbackError { cause, .. } => exit_code(cause),
        _ => None,
    }
}

/// Bindings `strip_scope` leaves in place: dunders and the scope's own `_G`.
fn is_reserved(key: &Value<'_>) -> bool {
    match key {
        Value::String(name) => name
            .to_str()
            .is_ok_and(|name| name.starts_with("__") || name == "_G"),
        _ => false,
    }
}

impl PooledInterpreter {
    pub fn new(id: u64, document: DocumentId) -> Result<Self> {
        let lua = Lua::new();
        let (scope, builtins) = {
            let globals = lua.globals();
            let os: Table = globals.get("os").context("lua stdlib has no `os` table")?;
            os.set(
                "exit",
                lua.create_function(|_, code: Option<Value>| -> mlua::Result<()> {
                    Err(mlua::Error::external(ScriptExit {
                        code: exit_status(code.as_ref()),
                    }))
                })?,
            )?;

            let builtins = lua.create_table()?;
            builtins.set_metatable(Some(index_metatable(&lua, globals)?));
            let scope = lua.create_table()?;
            scope.set_metatable(Some(index_metatable(&lua, builtins.clone())?));
            (
                lua.create_registry_value(scope)?,
                lua.create_registry_value(builtins)?,
            )
        };

        Ok(Self {
            lua,
            scope,
            builtins,
            id,
            document,
            runs: 0,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    /// Invocations run on this interpreter so far.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    fn print_function(&self, sink: Arc<dyn OutputSink>) -> mlua::Result<Function<'_>> {
        self.lua.create_function(move |lua, args: Variadic<Value>| {
            let tostring: Function = lua.globals().get("tostring")?;
            let mut line = String::new();
            for (idx, arg) in args.into_iter().enumerate() {
                if idx > 0 {
                    line.push('\t');
                }
                let text: mlua::String = tostring.call(arg)?;
                line.push_str(&text.to_string_lossy());
            }
            line.push('\n');
            sink.write(&line);
            Ok(())
        })
    }

    /// Reset dunder bindings and route `print` to this invocation's sink.
    fn prepare_frame(&self, runtime: &ScriptRuntime) -> mlua::Result<Table<'_>> {
        let builtins: Table = self.lua.registry_value(&self.builtins)?;
        builtins.raw_set("print", self.print_function(Arc::clone(&runtime.output))?)?;

        let scope: Table = self.lua.registry_value(&self.scope)?;
        scope.raw_set("_G", scope.clone())?;
        scope.raw_set("__name__", "__main__")?;
        scope.raw_set("__file__", runtime.source_path.display().to_string())?;
        scope.raw_set("__debug__", runtime.debug_mode)?;
        scope.raw_set("__host__", self.lua.to_value(&runtime.host.to_value())?)?;
        scope.raw_set("__result__", self.lua.create_table()?)?;
        for (name, value) in runtime.command.bindings(&runtime.source_path) {
            scope.raw_set(name, value)?;
        }
        Ok(scope)
    }

    /// Compile and run `source` as the main chunk.
    pub fn run(&mut self, runtime: &mut ScriptRuntime, source: &str) -> ExecutionResult {
        self.runs += 1;
        let scope = match self.prepare_frame(runtime) {
            Ok(scope) => scope,
            Err(err) => return report_failure(runtime, &err),
        };

        let chunk = self
            .lua
            .load(source)
            .set_name(format!("@{}", runtime.source_path.display()))
            .set_environment(scope.clone());
        let main = match chunk.into_function() {
            Ok(main) => main,
            Err(err) => {
                let mut collector = ErrorCollector::default();
                collector.collect(&err);
                let text = normalize_newlines(&collector.render());
                runtime
                    .output
                    .write_error(&format!("{LUA_TRACEBACK_BANNER}\n{text}\n"));
                runtime.diagnostics.interpreter = Some(text);
                return ExecutionResult::CompileException;
            }
        };

        match main.call::<_, ()>(()) {
            Ok(()) => {
                copy_results(&self.lua, &scope, runtime);
                ExecutionResult::Succeeded
            }
            Err(err) => match exit_code(&err) {
                Some(code) => {
                    tracing::debug!(code, script = %runtime.source_path.display(), "script exited");
                    ExecutionResult::SysExited
                }
                None => report_failure(runtime, &err),
            },
        }
    }

    /// Point `print` at a no-op so the pooled interpreter stops holding the
    /// finished invocation's sink.
    pub fn detach_output(&self) -> Result<()> {
        let builtins: Table = self.lua.registry_value(&self.builtins)?;
        builtins.raw_set("print", self.lua.create_function(|_, _: Variadic<Value>| Ok(()))?)?;
        // The replaced closure owns the sink until the collector finalizes it.
        self.lua.gc_collect()?;
        self.lua.gc_collect()?;
        Ok(())
    }

    /// Remove every non-dunder binding from the scope. Returns the count.
    pub fn strip_scope(&self) -> Result<usize> {
        let scope: Table = self.lua.registry_value(&self.scope)?;
        let doomed: Vec<Value> = scope
            .clone()
            .pairs::<Value, Value>()
            .filter_map(|pair| pair.ok())
            .map(|(key, _)| key)
            .filter(|key| !is_reserved(key))
            .collect();
        for key in &doomed {
            scope.raw_set(key.clone(), Value::Nil)?;
        }
        Ok(doomed.len())
    }
}

fn copy_results(lua: &Lua, scope: &Table<'_>, runtime: &mut ScriptRuntime) {
    let Ok(Value::Table(published)) = scope.raw_get::<_, Value>("__result__") else {
        return;
    };
    for pair in published.pairs::<String, Value>() {
        let Ok((key, value)) = pair else { continue };
        match lua.from_value::<serde_json::Value>(value) {
            Ok(json) => {
                runtime.results.insert(key, json);
            }
            Err(err) => tracing::debug!(key, error = %err, "skipping unserializable result"),
        }
    }
}

fn report_failure(runtime: &mut ScriptRuntime, err: &mlua::Error) -> ExecutionResult {
    let interpreter = normalize_newlines(&err.to_string());
    let host = normalize_newlines(&format!("{err:?}"));
    runtime.output.write_error(&format!(
        "{LUA_TRACEBACK_BANNER}\n{interpreter}\n\n{RUNTIME_TRACEBACK_BANNER}\n{host}\n"
    ));
    runtime.diagnostics.interpreter = Some(interpreter);
    runtime.diagnostics.runtime = Some(host);
    ExecutionResult::ExecutionException
}

/// Runs `.lua` scripts on interpreters borrowed from an [`InterpreterPool`].
pub struct LuaHandler {
    pool: Arc<dyn InterpreterPool>,
}

impl LuaHandler {
    pub fn new(pool: Arc<dyn InterpreterPool>) -> Self {
        Self { pool }
    }
}

impl ScriptHandler for LuaHandler {
    fn execute(&self, runtime: &mut ScriptRuntime) -> ExecutionResult {
        let source = match std::fs::read_to_string(&runtime.source_path) {
            Ok(source) => source,
            Err(err) => {
                let text = format!("cannot read {}: {err}", runtime.source_path.display());
                runtime
                    .output
                    .write_error(&format!("{LUA_TRACEBACK_BANNER}\n{text}\n"));
                runtime.diagnostics.interpreter = Some(text);
                return ExecutionResult::CompileException;
            }
        };

        let mut interpreter = match self
            .pool
            .acquire(&runtime.host.document, runtime.refresh_engine)
        {
            Ok(interpreter) => interpreter,
            Err(err) => {
                let text = format!("{err:#}");
                runtime
                    .output
                    .write_error(&format!("{RUNTIME_TRACEBACK_BANNER}\n{text}\n"));
                runtime.diagnostics.runtime = Some(text);
                return ExecutionResult::ExecutionException;
            }
        };

        let result = interpreter.run(runtime, source.trim_start_matches('\u{FEFF}'));

        if !runtime.needs_clean_engine {
            match interpreter.strip_scope() {
                Ok(stripped) => tracing::trace!(stripped, id = interpreter.id(), "scope stripped"),
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "failed to strip lua scope"),
            }
        }
        if let Err(err) = interpreter.detach_output() {
            tracing::warn!(error = %format!("{err:#}"), "failed to detach lua output");
        }
        self.pool.release(interpreter);
        result
    }

    fn engine_name(&self) -> &str {
        "lua-5.4"
    }
}
