// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Components.

A component owns a named set of ports, a reentrant mutex that serializes
event dispatch and pulls against it, and an event scheduling priority
assigned by the network. Concrete components embed a [`ComponentCore`]
and implement the [`Component`] trait.
*/

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use crate::error::{DataflowError, Result};
use crate::port::Connector;

/// Highest assignable event scheduling priority.
pub const MAX_EVENT_PRIORITY: i32 = 255;

/// Shared state of a component: identity, lock, priority and port map.
pub struct ComponentCore {
    name: String,
    /// Reentrant: a triggered component's compute may pull its own
    /// supplier ports, which lock the supplier's component.
    mutex: Arc<ReentrantMutex<()>>,
    running: AtomicBool,
    /// Priority of events *received* by this component.
    event_priority: AtomicI32,
    ports: RwLock<BTreeMap<String, Arc<dyn Connector>>>,
}

impl std::fmt::Debug for ComponentCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentCore")
            .field("name", &self.name)
            .field("event_priority", &self.event_priority.load(Ordering::Relaxed))
            .finish()
    }
}

impl ComponentCore {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(ComponentCore {
            name: name.into(),
            mutex: Arc::new(ReentrantMutex::new(())),
            running: AtomicBool::new(false),
            event_priority: AtomicI32::new(MAX_EVENT_PRIORITY),
            ports: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mutex(&self) -> &Arc<ReentrantMutex<()>> {
        &self.mutex
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn event_priority(&self) -> i32 {
        self.event_priority.load(Ordering::Relaxed)
    }

    /// Sets the event scheduling priority, clamped to `0..=255`.
    pub fn set_event_priority(&self, priority: i32) {
        self.event_priority
            .store(priority.clamp(0, MAX_EVENT_PRIORITY), Ordering::Relaxed);
    }

    /// Registers a port. Port names are unique per component.
    pub fn add_port(&self, port: Arc<dyn Connector>) -> Result<()> {
        let mut ports = self.ports.write();
        let name = port.name().to_string();
        if ports.contains_key(&name) {
            return Err(DataflowError::DuplicatePort(format!("{}:{}", self.name, name)));
        }
        ports.insert(name, port);
        Ok(())
    }

    pub fn remove_port(&self, name: &str) {
        self.ports.write().remove(name);
    }

    /// Looks up a port by name.
    pub fn port(&self, name: &str) -> Result<Arc<dyn Connector>> {
        self.ports
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DataflowError::UnknownPort(format!("{}:{}", self.name, name)))
    }

    pub fn port_names(&self) -> Vec<String> {
        self.ports.read().keys().cloned().collect()
    }
}

/// The common interface of all dataflow components.
pub trait Component: Send + Sync {
    /// The component's shared core.
    fn core(&self) -> &Arc<ComponentCore>;

    /// Starts the component. The default only sets the running flag;
    /// components with internal drivers override this.
    fn start(&self) {
        self.core().set_running(true);
    }

    /// Stops the component. Must be idempotent.
    fn stop(&self) {
        self.core().set_running(false);
    }

    fn name(&self) -> &str {
        self.core().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        core: Arc<ComponentCore>,
    }

    impl Component for Probe {
        fn core(&self) -> &Arc<ComponentCore> {
            &self.core
        }
    }

    #[test]
    fn test_priority_is_clamped() {
        let core = ComponentCore::new("c");
        core.set_event_priority(-5);
        assert_eq!(core.event_priority(), 0);
        core.set_event_priority(9000);
        assert_eq!(core.event_priority(), MAX_EVENT_PRIORITY);
        core.set_event_priority(17);
        assert_eq!(core.event_priority(), 17);
    }

    #[test]
    fn test_start_stop_sets_flag() {
        let probe = Probe { core: ComponentCore::new("c") };
        assert!(!probe.core().is_running());
        probe.start();
        assert!(probe.core().is_running());
        probe.stop();
        assert!(!probe.core().is_running());
    }

    #[test]
    fn test_reentrant_mutex_allows_self_lock() {
        let core = ComponentCore::new("c");
        let _outer = core.mutex().lock();
        let _inner = core.mutex().lock();
    }
}
