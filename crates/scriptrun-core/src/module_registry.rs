//! Registry of loaded wasm modules.
//!
//! Binary modules loaded by the direct-binary handler stay registered for the
//! rest of the process so later compilations can import from them. Entries
//! are keyed by the SHA-256 of their bytes, so loading the same file again
//! skips recompilation; names come from the file stem.

use crate::reflect::describe_module;
use crate::structural::ModuleDescriptor;
use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use wasmtime::{Engine, Module};

/// A compiled module and its reflected shape.
pub struct CompiledModule {
    pub name: String,
    pub digest: [u8; 32],
    pub module: Module,
    pub descriptor: ModuleDescriptor,
}

impl CompiledModule {
    pub fn compile(engine: &Engine, name: &str, bytes: &[u8]) -> Result<Self> {
        let module = Module::new(engine, bytes)
            .with_context(|| format!("failed to compile wasm module `{name}`"))?;
        let descriptor = describe_module(name, bytes, &module)
            .with_context(|| format!("failed to reflect wasm module `{name}`"))?;
        Ok(Self {
            name: name.to_string(),
            digest: sha256(bytes),
            module,
            descriptor,
        })
    }

    pub fn digest_hex(&self) -> String {
        hex_encode(&self.digest)
    }

    /// Whether this module imports anything from `module_name`.
    pub fn imports_from(&self, module_name: &str) -> bool {
        self.module
            .imports()
            .any(|import| import.module() == module_name)
    }

    pub fn exports(&self, name: &str) -> bool {
        self.module.get_export(name).is_some()
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("name", &self.name)
            .field("digest", &self.digest_hex())
            .field("types", &self.descriptor.types.len())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    /// Load order; one entry per module name.
    modules: Vec<Arc<CompiledModule>>,
    by_digest: HashMap<[u8; 32], Arc<CompiledModule>>,
}

#[derive(Default)]
pub struct ModuleRegistry {
    state: Mutex<RegistryState>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the registered module for `bytes`, compiling it on first sight.
    /// A module with a new digest replaces an older one of the same name.
    pub fn get_or_compile(&self, engine: &Engine, name: &str, bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let digest = sha256(bytes);
        if let Some(hit) = self.lock()?.by_digest.get(&digest) {
            tracing::trace!(module = %hit.name, "module registry hit");
            return Ok(Arc::clone(hit));
        }

        let compiled = Arc::new(CompiledModule::compile(engine, name, bytes)?);

        let mut state = self.lock()?;
        if let Some(raced) = state.by_digest.get(&digest) {
            return Ok(Arc::clone(raced));
        }
        match state.modules.iter().position(|m| m.name == compiled.name) {
            Some(idx) => {
                let replaced = std::mem::replace(&mut state.modules[idx], Arc::clone(&compiled));
                state.by_digest.remove(&replaced.digest);
                tracing::debug!(module = %compiled.name, "replaced registered module");
            }
            None => state.modules.push(Arc::clone(&compiled)),
        }
        state.by_digest.insert(digest, Arc::clone(&compiled));
        tracing::debug!(module = %compiled.name, digest = %compiled.digest_hex(), "registered module");
        Ok(compiled)
    }

    /// Load a module from disk, named after its file stem.
    pub fn load_file(&self, engine: &Engine, path: &Path) -> Result<Arc<CompiledModule>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read wasm module {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("wasm module path {} has no file name", path.display()))?;
        self.get_or_compile(engine, &name, &bytes)
    }

    pub fn find(&self, name: &str) -> Option<Arc<CompiledModule>> {
        self.lock()
            .ok()?
            .modules
            .iter()
            .find(|module| module.name == name)
            .cloned()
    }

    /// Every registered module, in load order.
    pub fn loaded(&self) -> Vec<Arc<CompiledModule>> {
        self.lock()
            .map(|state| state.modules.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.modules.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.lock() {
            *state = RegistryState::default();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("module registry lock poisoned"))
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
