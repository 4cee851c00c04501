//! Host ABI that compiled scripts import from the `host` module.
//!
//! | import | signature | effect |
//! |---|---|---|
//! | `print` | `(ptr, len)` | write UTF-8 text to the output sink |
//! | `print_error` | `(ptr, len)` | write to the sink's error channel |
//! | `set_message` | `(ptr, len)` | fill the command's output message slot |
//! | `handle_len` | `(id) -> i32` | byte length of a host handle's JSON, or -1 |
//! | `handle_read` | `(id, ptr, len) -> i32` | copy the JSON into memory, bytes written or -1 |
//! | `selection_len` | `() -> i32` | number of selected element ids |
//! | `selection_get` | `(idx) -> i64` | selected element id, or -1 |
//!
//! Handle ids: 0 command data, 1 event sender, 2 event args. Strings are read
//! from the caller's exported `memory`.

use crate::output::OutputSink;
use crate::runtime::HostHandles;
use std::sync::Arc;
use wasmtime::{Caller, Extern, Linker};
use wasmtime_wasi::p1::WasiP1Ctx;

pub const HOST_MODULE: &str = "host";
pub const WASI_MODULE: &str = "wasi_snapshot_preview1";

pub const HOST_FUNCTIONS: [&str; 7] = [
    "print",
    "print_error",
    "set_message",
    "handle_len",
    "handle_read",
    "selection_len",
    "selection_get",
];

/// Store data for one invocation.
pub struct HostState {
    wasi: WasiP1Ctx,
    output: Arc<dyn OutputSink>,
    handles: Vec<Vec<u8>>,
    selection: Vec<u64>,
    message: String,
}

impl HostState {
    pub fn new(output: Arc<dyn OutputSink>, host: &HostHandles) -> Self {
        let handles = [
            HostHandles::COMMAND_DATA,
            HostHandles::EVENT_SENDER,
            HostHandles::EVENT_ARGS,
        ]
        .into_iter()
        .map(|id| {
            host.handle(id)
                .and_then(|value| serde_json::to_vec(value).ok())
                .unwrap_or_default()
        })
        .collect();
        Self {
            wasi: wasmtime_wasi::WasiCtxBuilder::new().inherit_stderr().build_p1(),
            output,
            handles,
            selection: host.selection.clone(),
            message: String::new(),
        }
    }

    /// Accessor handed to the WASI p1 linker.
    pub fn wasi_ctx(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }

    fn handle(&self, id: i32) -> Option<&[u8]> {
        let idx = usize::try_from(id).ok()?;
        self.handles.get(idx).map(Vec::as_slice)
    }
}

pub fn register_host_functions(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "print",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
            if let Some(text) = read_wasm_string(&mut caller, ptr, len) {
                caller.data().output.write(&text);
            }
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "print_error",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
            if let Some(text) = read_wasm_string(&mut caller, ptr, len) {
                caller.data().output.write_error(&text);
            }
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "set_message",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
            if let Some(text) = read_wasm_string(&mut caller, ptr, len) {
                caller.data_mut().message = text;
            }
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "handle_len",
        |caller: Caller<'_, HostState>, id: i32| -> i32 {
            caller
                .data()
                .handle(id)
                .and_then(|bytes| i32::try_from(bytes.len()).ok())
                .unwrap_or(-1)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "handle_read",
        |mut caller: Caller<'_, HostState>, id: i32, out_ptr: i32, out_len: i32| -> i32 {
            let Some(bytes) = caller.data().handle(id).map(<[u8]>::to_vec) else {
                return -1;
            };
            write_wasm_bytes(&mut caller, out_ptr, out_len, &bytes).unwrap_or(-1)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "selection_len",
        |caller: Caller<'_, HostState>| -> i32 {
            i32::try_from(caller.data().selection.len()).unwrap_or(i32::MAX)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "selection_get",
        |caller: Caller<'_, HostState>, idx: i32| -> i64 {
            usize::try_from(idx)
                .ok()
                .and_then(|idx| caller.data().selection.get(idx).copied())
                .and_then(|id| i64::try_from(id).ok())
                .unwrap_or(-1)
        },
    )?;

    Ok(())
}

fn memory_range(ptr: i32, len: i32) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(ptr).ok()?;
    let len = usize::try_from(len).ok()?;
    Some(start..start.checked_add(len)?)
}

/// Read a UTF-8 string from the caller's linear memory.
fn read_wasm_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Option<String> {
    if len == 0 {
        return Some(String::new());
    }
    let range = memory_range(ptr, len)?;
    let Some(Extern::Memory(memory)) = caller.get_export("memory") else {
        return None;
    };
    let data = memory.data(&*caller).get(range)?;
    std::str::from_utf8(data).ok().map(String::from)
}

/// Copy as much of `bytes` as fits; returns the count written.
fn write_wasm_bytes(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    capacity: i32,
    bytes: &[u8],
) -> Option<i32> {
    let to_write = bytes.len().min(usize::try_from(capacity).ok()?);
    if to_write == 0 {
        return Some(0);
    }
    let range = memory_range(ptr, i32::try_from(to_write).ok()?)?;
    let Some(Extern::Memory(memory)) = caller.get_export("memory") else {
        return None;
    };
    memory
        .data_mut(&mut *caller)
        .get_mut(range)?
        .copy_from_slice(&bytes[..to_write]);
    i32::try_from(to_write).ok()
}
