//! Per-document pooling of Lua interpreters.

use crate::lua_engine::PooledInterpreter;
use crate::runtime::DocumentId;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Owns the pooling policy for reusable interpreters.
///
/// An acquired interpreter belongs to the caller exclusively until it is
/// handed back through [`release`](InterpreterPool::release).
pub trait InterpreterPool: Send + Sync {
    /// Take an idle interpreter for `document`, or build one. With
    /// `refresh`, the document's idle interpreters are dropped first.
    fn acquire(&self, document: &DocumentId, refresh: bool) -> Result<PooledInterpreter>;

    /// Return an interpreter for reuse.
    fn release(&self, interpreter: PooledInterpreter);

    /// Drop every idle interpreter for `document`. Returns how many went.
    fn teardown(&self, document: &DocumentId) -> usize;
}

/// Default pool: idle interpreters keyed by document.
#[derive(Default)]
pub struct DocumentPool {
    idle: Mutex<HashMap<DocumentId, Vec<PooledInterpreter>>>,
    next_id: AtomicU64,
}

impl DocumentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpreters built so far, across documents.
    pub fn created(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    pub fn idle_count(&self, document: &DocumentId) -> usize {
        self.idle
            .lock()
            .map(|idle| idle.get(document).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl InterpreterPool for DocumentPool {
    fn acquire(&self, document: &DocumentId, refresh: bool) -> Result<PooledInterpreter> {
        let cached = {
            let mut idle = self
                .idle
                .lock()
                .map_err(|_| anyhow!("interpreter pool lock poisoned"))?;
            if refresh {
                if let Some(dropped) = idle.remove(document) {
                    tracing::debug!(%document, dropped = dropped.len(), "refreshing interpreters");
                }
                None
            } else {
                idle.get_mut(document).and_then(Vec::pop)
            }
        };

        if let Some(interpreter) = cached {
            tracing::debug!(%document, id = interpreter.id(), "reusing interpreter");
            return Ok(interpreter);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(%document, id, "creating interpreter");
        PooledInterpreter::new(id, document.clone())
    }

    fn release(&self, interpreter: PooledInterpreter) {
        match self.idle.lock() {
            Ok(mut idle) => idle
                .entry(interpreter.document().clone())
                .or_default()
                .push(interpreter),
            Err(_) => tracing::warn!("interpreter pool lock poisoned; dropping interpreter"),
        }
    }

    fn teardown(&self, document: &DocumentId) -> usize {
        self.idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.remove(document))
            .map_or(0, |dropped| dropped.len())
    }
}
