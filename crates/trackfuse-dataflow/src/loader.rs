// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Plug-in loading contract.

Component libraries export a single registration entry point named
[`REGISTER_COMPONENT_SYMBOL`] that receives the factory and registers its
classes. The platform-specific symbol lookup is abstracted behind the
[`ModuleLoader`] trait; a [`StaticLoader`] backs builds that link their
component libraries statically (and the tests).

A library that fails to load or resolve is skipped; the rest of the
runtime continues.
*/

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{DataflowError, Result};
use crate::factory::ComponentFactory;

/// The symbol every component library exports.
pub const REGISTER_COMPONENT_SYMBOL: &str = "registerComponent";

/// Signature of the exported registration entry point.
pub type RegisterComponentsFn = fn(&ComponentFactory);

/// An opened module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHandle {
    pub path: String,
    id: u64,
}

/// Platform-specific dynamic library access.
pub trait ModuleLoader: Send + Sync {
    /// Opens a shared library.
    fn open(&self, path: &str) -> Result<ModuleHandle>;

    /// Resolves the registration entry point in an opened library.
    fn resolve(&self, handle: &ModuleHandle, symbol: &str) -> Result<RegisterComponentsFn>;

    /// Closes an opened library.
    fn close(&self, handle: ModuleHandle) -> Result<()>;
}

/// Loader over a fixed set of statically linked registration functions.
#[derive(Default)]
pub struct StaticLoader {
    modules: Mutex<AHashMap<String, RegisterComponentsFn>>,
    next_id: Mutex<u64>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a registration function available under a library path.
    pub fn provide(&self, path: impl Into<String>, register: RegisterComponentsFn) {
        self.modules.lock().insert(path.into(), register);
    }
}

impl ModuleLoader for StaticLoader {
    fn open(&self, path: &str) -> Result<ModuleHandle> {
        if !self.modules.lock().contains_key(path) {
            return Err(DataflowError::ModuleLoad(format!("no such library: {}", path)));
        }
        let mut next = self.next_id.lock();
        *next += 1;
        Ok(ModuleHandle { path: path.to_string(), id: *next })
    }

    fn resolve(&self, handle: &ModuleHandle, symbol: &str) -> Result<RegisterComponentsFn> {
        if symbol != REGISTER_COMPONENT_SYMBOL {
            return Err(DataflowError::ModuleLoad(format!(
                "{}: unknown symbol {}",
                handle.path, symbol
            )));
        }
        self.modules
            .lock()
            .get(&handle.path)
            .copied()
            .ok_or_else(|| DataflowError::ModuleLoad(format!("library closed: {}", handle.path)))
    }

    fn close(&self, _handle: ModuleHandle) -> Result<()> {
        Ok(())
    }
}

/// Opens each library, resolves its entry point and lets it register its
/// classes. A failing library only loses itself.
pub fn load_component_libraries(
    loader: &dyn ModuleLoader,
    paths: &[&str],
    factory: &Arc<ComponentFactory>,
) -> usize {
    let mut loaded = 0;
    for path in paths {
        let handle = match loader.open(path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("skipping component library {}: {}", path, e);
                continue;
            }
        };
        match loader.resolve(&handle, REGISTER_COMPONENT_SYMBOL) {
            Ok(register) => {
                register(factory);
                info!("loaded component library {}", path);
                loaded += 1;
            }
            Err(e) => {
                warn!("skipping component library {}: {}", path, e);
                let _ = loader.close(handle);
            }
        }
    }
    loaded
}
