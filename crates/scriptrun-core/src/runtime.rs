//! Per-invocation context handed from the caller, through the dispatcher,
//! to exactly one handler.

use crate::error::DispatchError;
use crate::output::OutputSink;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub const LUA_TRACEBACK_BANNER: &str = "Lua Traceback:";
pub const RUNTIME_TRACEBACK_BANNER: &str = "Script Executor Traceback:";
pub const EMBEDDED_TRACEBACK_BANNER: &str = "Rhai Traceback:";

/// Engine family a script is written for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Lua,
    Rhai,
    Wat,
    Wast,
    Binary,
    Ruby,
    NodeGraph,
    Workflow,
}

impl EngineKind {
    pub const COUNT: usize = 8;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Lua,
        Self::Rhai,
        Self::Wat,
        Self::Wast,
        Self::Binary,
        Self::Ruby,
        Self::NodeGraph,
        Self::Workflow,
    ];

    /// Slot of this kind in the dispatcher's handler table.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lua => "lua",
            Self::Rhai => "rhai",
            Self::Wat => "wat",
            Self::Wast => "wast",
            Self::Binary => "binary",
            Self::Ruby => "ruby",
            Self::NodeGraph => "node_graph",
            Self::Workflow => "workflow",
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Lua => "lua",
            Self::Rhai => "rhai",
            Self::Wat => "wat",
            Self::Wast => "wast",
            Self::Binary => "wasm",
            Self::Ruby => "rb",
            Self::NodeGraph => "graph",
            Self::Workflow => "flow",
        }
    }

    /// Infer the engine from a script path's extension, case-insensitively.
    pub fn from_script_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.extension() == ext)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle || kind.extension() == needle)
            .ok_or_else(|| DispatchError::UnknownEngine(s.to_string()))
    }
}

/// Host entry point the script is expected to expose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    #[default]
    Command,
    EventHandler,
    /// Declared by hosts for toolbar availability checks; no handler
    /// dispatches it.
    Availability,
}

impl InterfaceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::EventHandler => "event_handler",
            Self::Availability => "availability",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "command" => Ok(Self::Command),
            "event_handler" | "event" => Ok(Self::EventHandler),
            "availability" => Ok(Self::Availability),
            _ => Err(DispatchError::UnknownInterface(s.to_string())),
        }
    }
}

/// Identity of the host document an invocation runs against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host handles passed through to script code unmodified.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostHandles {
    pub document: DocumentId,
    pub command_data: Value,
    pub event_sender: Value,
    pub event_args: Value,
    pub selection: Vec<u64>,
}

impl HostHandles {
    pub const COMMAND_DATA: u32 = 0;
    pub const EVENT_SENDER: u32 = 1;
    pub const EVENT_ARGS: u32 = 2;

    /// Look a handle up by its wasm ABI id.
    pub fn handle(&self, id: u32) -> Option<&Value> {
        match id {
            Self::COMMAND_DATA => Some(&self.command_data),
            Self::EVENT_SENDER => Some(&self.event_sender),
            Self::EVENT_ARGS => Some(&self.event_args),
            _ => None,
        }
    }

    /// Single structured value exposed to interpreters as `__host__`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "document": self.document.0,
            "command_data": self.command_data,
            "event_sender": self.event_sender,
            "event_args": self.event_args,
            "selection": self.selection,
        })
    }
}

/// Command metadata exposed to interpreters as dunder bindings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    pub bundle: String,
    pub extension: String,
    pub unique_id: String,
    pub alternate_path: Option<PathBuf>,
}

impl CommandInfo {
    /// `(binding, value)` pairs, `__commandpath__` included.
    pub fn bindings(&self, source_path: &Path) -> Vec<(&'static str, String)> {
        vec![
            ("__commandpath__", path_dir(source_path)),
            (
                "__alternatecommandpath__",
                self.alternate_path
                    .as_deref()
                    .map(path_dir)
                    .unwrap_or_default(),
            ),
            ("__commandname__", self.name.clone()),
            ("__commandbundle__", self.bundle.clone()),
            ("__commandextension__", self.extension.clone()),
            ("__commanduniqueid__", self.unique_id.clone()),
        ]
    }
}

fn path_dir(path: &Path) -> String {
    path.parent()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default()
}

/// Status returned by a compiled command's `execute` method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Succeeded,
    Cancelled,
    Failed,
}

impl CommandStatus {
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Succeeded,
            1 => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

/// One optional rendering per diagnostic source. Empty unless the
/// invocation failed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// The interpreter's own rendering of the failure.
    pub interpreter: Option<String>,
    /// The host runtime's rendering (traps, compile errors, panics).
    pub runtime: Option<String>,
    /// Output of the embedded interpreter.
    pub embedded: Option<String>,
}

impl ErrorReport {
    pub fn is_empty(&self) -> bool {
        self.interpreter.is_none() && self.runtime.is_none() && self.embedded.is_none()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Every populated field under its banner, blank-line separated.
    pub fn render(&self) -> String {
        [
            (LUA_TRACEBACK_BANNER, &self.interpreter),
            (RUNTIME_TRACEBACK_BANNER, &self.runtime),
            (EMBEDDED_TRACEBACK_BANNER, &self.embedded),
        ]
        .into_iter()
        .filter_map(|(banner, text)| text.as_ref().map(|text| format!("{banner}\n{text}")))
        .collect::<Vec<_>>()
        .join("\n\n")
    }
}

/// Rewrite `\r\n` and lone `\r` as `\n`.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Everything a handler needs for one invocation.
pub struct ScriptRuntime {
    pub engine: EngineKind,
    pub interface: InterfaceKind,
    pub source_path: PathBuf,
    /// Direct-binary address, `module-path` or `module-path::TypeName`.
    pub config_source_path: String,
    pub debug_mode: bool,
    /// Keep the interpreter's globals after the run instead of stripping them.
    pub needs_clean_engine: bool,
    /// Discard the document's pooled interpreters before acquiring one.
    pub refresh_engine: bool,
    pub output: Arc<dyn OutputSink>,
    pub host: HostHandles,
    pub command: CommandInfo,
    pub diagnostics: ErrorReport,
    pub results: BTreeMap<String, Value>,
    pub command_message: String,
    pub command_status: Option<CommandStatus>,
}

impl ScriptRuntime {
    pub fn new(engine: EngineKind, source_path: impl Into<PathBuf>, output: Arc<dyn OutputSink>) -> Self {
        Self {
            engine,
            interface: InterfaceKind::Command,
            source_path: source_path.into(),
            config_source_path: String::new(),
            debug_mode: false,
            needs_clean_engine: false,
            refresh_engine: false,
            output,
            host: HostHandles::default(),
            command: CommandInfo::default(),
            diagnostics: ErrorReport::default(),
            results: BTreeMap::new(),
            command_message: String::new(),
            command_status: None,
        }
    }

    /// Infer the engine from the script extension.
    pub fn for_script(source_path: impl Into<PathBuf>, output: Arc<dyn OutputSink>) -> Result<Self, DispatchError> {
        let source_path = source_path.into();
        let engine = EngineKind::from_script_path(&source_path)
            .ok_or_else(|| DispatchError::UnknownEngine(source_path.display().to_string()))?;
        Ok(Self::new(engine, source_path, output))
    }

    pub fn with_interface(mut self, interface: InterfaceKind) -> Self {
        self.interface = interface;
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.config_source_path = address.into();
        self
    }

    pub fn with_host(mut self, host: HostHandles) -> Self {
        self.host = host;
        self
    }

    pub fn with_command(mut self, command: CommandInfo) -> Self {
        self.command = command;
        self
    }

    pub fn with_debug(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn with_clean_engine(mut self, needs_clean_engine: bool) -> Self {
        self.needs_clean_engine = needs_clean_engine;
        self
    }

    pub fn with_refresh(mut self, refresh_engine: bool) -> Self {
        self.refresh_engine = refresh_engine;
        self
    }

    pub fn script_name(&self) -> String {
        self.source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("engine", &self.engine)
            .field("interface", &self.interface)
            .field("source_path", &self.source_path)
            .field("config_source_path", &self.config_source_path)
            .field("debug_mode", &self.debug_mode)
            .field("needs_clean_engine", &self.needs_clean_engine)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}
