// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Pull ports.

Pull is synchronous on the calling thread: the consumer invokes the
supplier's handler under the supplier's component mutex and receives a
measurement for the requested timestamp or an error. A pull consumer has
at most one supplier.
*/

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::component::ComponentCore;
use crate::error::{DataflowError, Result};
use crate::event::Event;
use crate::measurement::Timestamp;
use crate::port::{type_mismatch, Connector};

/// Handler answering pull requests for a timestamp.
pub type PullHandler<E> = Arc<dyn Fn(Timestamp) -> Result<E> + Send + Sync>;

/// The supplier side of a pull connection: the handler plus the owning
/// component (whose mutex is held during the call).
pub struct PullSupplierCore<E: Event> {
    handler: PullHandler<E>,
    component: Arc<ComponentCore>,
}

impl<E: Event> Clone for PullSupplierCore<E> {
    fn clone(&self) -> Self {
        PullSupplierCore {
            handler: Arc::clone(&self.handler),
            component: Arc::clone(&self.component),
        }
    }
}

impl<E: Event> PullSupplierCore<E> {
    pub fn new(component: Arc<ComponentCore>, handler: PullHandler<E>) -> Self {
        PullSupplierCore { handler, component }
    }

    /// Calls the handler under the supplier component's mutex.
    pub fn get(&self, t: Timestamp) -> Result<E> {
        let _guard = self.component.mutex().lock();
        (self.handler)(t)
    }
}

/// A port that answers pull requests.
pub struct PullSupplier<E: Event> {
    name: String,
    component: Arc<ComponentCore>,
    core: PullSupplierCore<E>,
}

impl<E: Event> PullSupplier<E> {
    pub fn new(
        name: impl Into<String>,
        component: Arc<ComponentCore>,
        handler: PullHandler<E>,
    ) -> Arc<Self> {
        let core = PullSupplierCore::new(Arc::clone(&component), handler);
        Arc::new(PullSupplier { name: name.into(), component, core })
    }
}

impl<E: Event> Connector for PullSupplier<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    fn connect(&self, other: &dyn Connector) -> Result<()> {
        if other.accepts_pull(TypeId::of::<E>()) {
            Ok(())
        } else {
            Err(type_mismatch(self, other))
        }
    }

    fn disconnect(&self, _other: &dyn Connector) -> Result<()> {
        Ok(())
    }

    fn pull_handler(&self) -> Option<&dyn Any> {
        Some(&self.core)
    }
}

/// A port that pulls measurements from exactly one supplier.
pub struct PullConsumer<E: Event> {
    name: String,
    component: Arc<ComponentCore>,
    supplier: Mutex<Option<PullSupplierCore<E>>>,
}

impl<E: Event> PullConsumer<E> {
    pub fn new(name: impl Into<String>, component: Arc<ComponentCore>) -> Arc<Self> {
        Arc::new(PullConsumer { name: name.into(), component, supplier: Mutex::new(None) })
    }

    pub fn is_connected(&self) -> bool {
        self.supplier.lock().is_some()
    }

    /// Pulls a measurement for the given timestamp.
    pub fn get(&self, t: Timestamp) -> Result<E> {
        let supplier = self
            .supplier
            .lock()
            .clone()
            .ok_or_else(|| DataflowError::NotConnected(self.full_name()))?;
        supplier.get(t)
    }
}

impl<E: Event> Connector for PullConsumer<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    fn connect(&self, other: &dyn Connector) -> Result<()> {
        let handler = other
            .pull_handler()
            .and_then(|any| any.downcast_ref::<PullSupplierCore<E>>())
            .ok_or_else(|| type_mismatch(other, self))?;
        let mut supplier = self.supplier.lock();
        if supplier.is_some() {
            return Err(DataflowError::AlreadyConnected(self.full_name()));
        }
        *supplier = Some(handler.clone());
        Ok(())
    }

    fn disconnect(&self, _other: &dyn Connector) -> Result<()> {
        *self.supplier.lock() = None;
        Ok(())
    }

    fn accepts_pull(&self, event_type: TypeId) -> bool {
        event_type == TypeId::of::<E>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;

    type M = Measurement<f64>;

    fn doubling_supplier() -> Arc<PullSupplier<M>> {
        PullSupplier::<M>::new(
            "out",
            ComponentCore::new("src"),
            Arc::new(|t| Ok(Measurement::new(t, t as f64 * 2.0))),
        )
    }

    #[test]
    fn test_pull_round_trip() {
        let supplier = doubling_supplier();
        let consumer = PullConsumer::<M>::new("in", ComponentCore::new("sink"));
        supplier.connect(consumer.as_ref()).unwrap();
        consumer.connect(supplier.as_ref()).unwrap();

        let m = consumer.get(21).unwrap();
        assert_eq!(m.time(), 21);
        assert_eq!(*m.value(), 42.0);
    }

    #[test]
    fn test_single_supplier_enforced() {
        let consumer = PullConsumer::<M>::new("in", ComponentCore::new("sink"));
        let first = doubling_supplier();
        let second = doubling_supplier();
        consumer.connect(first.as_ref()).unwrap();
        assert!(matches!(
            consumer.connect(second.as_ref()),
            Err(DataflowError::AlreadyConnected(_))
        ));
    }

    #[test]
    fn test_unconnected_pull_fails() {
        let consumer = PullConsumer::<M>::new("in", ComponentCore::new("sink"));
        assert!(matches!(consumer.get(1), Err(DataflowError::NotConnected(_))));
    }

    #[test]
    fn test_pull_type_checked() {
        let supplier = doubling_supplier();
        let consumer = PullConsumer::<Measurement<String>>::new("in", ComponentCore::new("sink"));
        assert!(consumer.connect(supplier.as_ref()).is_err());
        assert!(supplier.connect(consumer.as_ref()).is_err());
    }
}
