//! Outcome taxonomy shared by every handler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single script invocation.
///
/// The numeric codes are stable: hosts persist them and the CLI uses them as
/// its process exit status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The script ran to completion.
    Succeeded,
    /// The script asked the interpreter to exit.
    SysExited,
    /// The script (or the host plumbing around it) failed while running.
    ExecutionException,
    /// The source failed to produce an executable unit.
    CompileException,
    /// The engine family is recognized but not supported.
    EngineNotImplementedException,
    /// The script does not expose the entry point the host asked for.
    ExternalInterfaceNotImplementedException,
}

impl ExecutionResult {
    pub const ALL: [Self; 6] = [
        Self::Succeeded,
        Self::SysExited,
        Self::ExecutionException,
        Self::CompileException,
        Self::EngineNotImplementedException,
        Self::ExternalInterfaceNotImplementedException,
    ];

    pub const fn code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::SysExited => 1,
            Self::ExecutionException => 2,
            Self::CompileException => 3,
            Self::EngineNotImplementedException => 4,
            Self::ExternalInterfaceNotImplementedException => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|result| result.code() == code)
    }

    /// Whether the outcome should be surfaced to the user as a failure.
    pub const fn is_failure(self) -> bool {
        !matches!(self, Self::Succeeded | Self::SysExited)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::SysExited => "sys_exited",
            Self::ExecutionException => "execution_exception",
            Self::CompileException => "compile_exception",
            Self::EngineNotImplementedException => "engine_not_implemented",
            Self::ExternalInterfaceNotImplementedException => {
                "external_interface_not_implemented"
            }
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
