// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Push ports.

A push supplier fans out to any number of push consumers. Events are not
delivered directly but queued, so deep recursions cannot occur; the
computed priority is the event's timestamp-derived priority plus the
receiving component's event priority.
*/

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::component::ComponentCore;
use crate::error::Result;
use crate::event::Event;
use crate::port::{type_mismatch, Connector};
use crate::queue::{self, QueueItem, ReceiverInfo};

/// Handler invoked when an event arrives at a consumer.
pub type Slot<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// The consumer side of a push connection: the slot to call and the
/// receiver bookkeeping. Ports that consume pushes embed one of these.
pub struct PushConsumerCore<E: Event> {
    slot: Slot<E>,
    receiver: Arc<ReceiverInfo>,
}

impl<E: Event> Clone for PushConsumerCore<E> {
    fn clone(&self) -> Self {
        PushConsumerCore { slot: Arc::clone(&self.slot), receiver: Arc::clone(&self.receiver) }
    }
}

impl<E: Event> PushConsumerCore<E> {
    pub fn new(port_name: impl Into<String>, component: Arc<ComponentCore>, slot: Slot<E>) -> Self {
        let receiver = ReceiverInfo::new(port_name, component, E::max_queue_length());
        PushConsumerCore { slot, receiver }
    }

    pub fn receiver(&self) -> &Arc<ReceiverInfo> {
        &self.receiver
    }

    /// Number of events queued for this consumer.
    pub fn queued_events(&self) -> i32 {
        self.receiver.queued_events()
    }
}

/// The supplier side of a push connection: the list of connected
/// consumers. Ports that supply pushes embed one of these.
pub struct PushSupplierCore<E: Event> {
    consumers: Mutex<Vec<PushConsumerCore<E>>>,
}

impl<E: Event> Default for PushSupplierCore<E> {
    fn default() -> Self {
        PushSupplierCore { consumers: Mutex::new(Vec::new()) }
    }
}

impl<E: Event> PushSupplierCore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_consumer(&self, consumer: PushConsumerCore<E>) {
        self.consumers.lock().push(consumer);
    }

    pub fn remove_consumer(&self, receiver: &Arc<ReceiverInfo>) {
        self.consumers
            .lock()
            .retain(|c| !Arc::ptr_eq(&c.receiver, receiver));
    }

    pub fn is_connected(&self) -> bool {
        !self.consumers.lock().is_empty()
    }

    /// Queues one event for every connected consumer in a single batch.
    pub fn send(&self, event: &E) {
        let consumers = self.consumers.lock();
        if consumers.is_empty() {
            return;
        }
        let mut batch = Vec::with_capacity(consumers.len());
        for consumer in consumers.iter() {
            // timestamps are much coarser than the 0..=255 priority range,
            // so the offset never reorders distinct timestamps
            let priority =
                event.priority() + consumer.receiver.component().event_priority() as u64;
            let slot = Arc::clone(&consumer.slot);
            let event = event.clone();
            batch.push(QueueItem::new(
                Some(Arc::clone(&consumer.receiver)),
                priority,
                Box::new(move || slot(&event)),
            ));
        }
        drop(consumers);
        queue::dispatcher().queue(batch);
    }
}

/// A port that pushes events to any number of consumers.
pub struct PushSupplier<E: Event> {
    name: String,
    component: Arc<ComponentCore>,
    core: PushSupplierCore<E>,
}

impl<E: Event> PushSupplier<E> {
    pub fn new(name: impl Into<String>, component: Arc<ComponentCore>) -> Arc<Self> {
        Arc::new(PushSupplier { name: name.into(), component, core: PushSupplierCore::new() })
    }

    pub fn send(&self, event: &E) {
        trace!("{} sending event", self.full_name());
        self.core.send(event);
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }
}

impl<E: Event> Connector for PushSupplier<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    fn connect(&self, other: &dyn Connector) -> Result<()> {
        // the consumer side performs the registration
        if other.accepts_push(TypeId::of::<E>()) {
            Ok(())
        } else {
            Err(type_mismatch(self, other))
        }
    }

    fn disconnect(&self, _other: &dyn Connector) -> Result<()> {
        Ok(())
    }

    fn push_registry(&self) -> Option<&dyn Any> {
        Some(&self.core)
    }
}

/// A port that receives events from any number of push suppliers.
pub struct PushConsumer<E: Event> {
    name: String,
    component: Arc<ComponentCore>,
    core: PushConsumerCore<E>,
}

impl<E: Event> PushConsumer<E> {
    pub fn new(
        name: impl Into<String>,
        component: Arc<ComponentCore>,
        slot: Slot<E>,
    ) -> Arc<Self> {
        let name = name.into();
        let core = PushConsumerCore::new(
            format!("{}:{}", component.name(), name),
            Arc::clone(&component),
            slot,
        );
        Arc::new(PushConsumer { name, component, core })
    }

    pub fn core(&self) -> &PushConsumerCore<E> {
        &self.core
    }

    pub fn queued_events(&self) -> i32 {
        self.core.queued_events()
    }
}

impl<E: Event> Connector for PushConsumer<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    fn connect(&self, other: &dyn Connector) -> Result<()> {
        let registry = other
            .push_registry()
            .and_then(|any| any.downcast_ref::<PushSupplierCore<E>>())
            .ok_or_else(|| type_mismatch(other, self))?;
        registry.add_consumer(self.core.clone());
        Ok(())
    }

    fn disconnect(&self, other: &dyn Connector) -> Result<()> {
        if let Some(registry) = other
            .push_registry()
            .and_then(|any| any.downcast_ref::<PushSupplierCore<E>>())
        {
            registry.remove_consumer(&self.core.receiver);
        }
        Ok(())
    }

    fn accepts_push(&self, event_type: TypeId) -> bool {
        event_type == TypeId::of::<E>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use parking_lot::Mutex as PlMutex;

    type M = Measurement<f64>;

    #[test]
    fn test_fan_out_to_two_consumers() {
        let supplier_core = ComponentCore::new("src");
        let supplier = PushSupplier::<M>::new("out", Arc::clone(&supplier_core));

        let received = Arc::new(PlMutex::new(Vec::new()));
        let consumers: Vec<Arc<PushConsumer<M>>> = (0..2)
            .map(|i| {
                let log = Arc::clone(&received);
                PushConsumer::<M>::new(
                    "in",
                    ComponentCore::new(format!("sink{}", i)),
                    Arc::new(move |m: &M| log.lock().push((i, *m.value()))),
                )
            })
            .collect();

        for consumer in &consumers {
            supplier.connect(consumer.as_ref()).unwrap();
            consumer.connect(supplier.as_ref()).unwrap();
        }
        assert!(supplier.is_connected());

        supplier.send(&Measurement::new(100, 1.5));
        queue::global().dispatch_now();

        let mut log = received.lock().clone();
        log.sort_by_key(|entry| entry.0);
        assert_eq!(log, vec![(0, 1.5), (1, 1.5)]);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let supplier = PushSupplier::<M>::new("out", ComponentCore::new("src"));
        let consumer = PushConsumer::<Measurement<String>>::new(
            "in",
            ComponentCore::new("sink"),
            Arc::new(|_| {}),
        );
        assert!(supplier.connect(consumer.as_ref()).is_err());
        assert!(consumer.connect(supplier.as_ref()).is_err());
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let supplier = PushSupplier::<M>::new("out", ComponentCore::new("src"));
        let count = Arc::new(PlMutex::new(0));
        let log = Arc::clone(&count);
        let consumer = PushConsumer::<M>::new(
            "in",
            ComponentCore::new("sink"),
            Arc::new(move |_| *log.lock() += 1),
        );

        supplier.connect(consumer.as_ref()).unwrap();
        consumer.connect(supplier.as_ref()).unwrap();
        supplier.send(&Measurement::new(1, 0.0));

        consumer.disconnect(supplier.as_ref()).unwrap();
        supplier.disconnect(consumer.as_ref()).unwrap();
        assert!(!supplier.is_connected());
        supplier.send(&Measurement::new(2, 0.0));

        queue::global().dispatch_now();
        assert_eq!(*count.lock(), 1);
    }
}
