// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Expansion input ports.

An expansion port aggregates scalar measurements into a vector
measurement, either over time (the same logical input at different
timestamps) or over space (several sibling ports cloned from a master,
one per physical source, aligned on a common timestamp).

The port connects to suppliers of either the scalar or the vector form of
its payload, push or pull. Space-expansion slaves forward their triggers
to the master, which fires the component once all siblings have delivered
for the same timestamp; a scalar arriving with a new timestamp resets the
master's accumulator.
*/

use std::any::TypeId;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::component::ComponentCore;
use crate::error::{DataflowError, Result};
use crate::event::Payload;
use crate::measurement::{Measurement, Timestamp};
use crate::port::{type_mismatch, Connector};
use crate::pull::PullSupplierCore;
use crate::push::{PushConsumerCore, PushSupplierCore};
use crate::trigger::{TriggerCore, TriggerInput, DEFAULT_TRIGGER_GROUP, TIME_EXPANSION_GROUP};

struct ExpansionState<T> {
    timestamp: Timestamp,
    single: Option<Measurement<T>>,
    accumulator: Vec<T>,
    /// Timestamp the accumulator belongs to. Space expansion resets the
    /// accumulator when a sibling stores for a different timestamp; time
    /// expansion keeps aggregating.
    accumulator_timestamp: Timestamp,
}

impl<T> Default for ExpansionState<T> {
    fn default() -> Self {
        ExpansionState { timestamp: 0, single: None, accumulator: Vec::new(), accumulator_timestamp: 0 }
    }
}

/// A time- or space-expanded input port of a triggered component.
pub struct ExpansionInPort<T: Payload + Clone> {
    name: String,
    component: Arc<ComponentCore>,
    trigger: Weak<TriggerCore>,
    group: i32,
    push: bool,
    state: Mutex<ExpansionState<T>>,
    single_consumer: Option<PushConsumerCore<Measurement<T>>>,
    vector_consumer: Option<PushConsumerCore<Measurement<Vec<T>>>>,
    single_supplier: Mutex<Option<PullSupplierCore<Measurement<T>>>>,
    vector_supplier: Mutex<Option<PullSupplierCore<Measurement<Vec<T>>>>>,
    master: Mutex<Option<Weak<ExpansionInPort<T>>>>,
    slaves: Mutex<Vec<Arc<ExpansionInPort<T>>>>,
}

impl<T: Payload + Clone> ExpansionInPort<T> {
    /// Creates the port and registers it with the component and the
    /// trigger core. Without an explicit group, time expansions land in
    /// group 1 so that output pulls do not drag them along.
    pub fn create(
        name: impl Into<String>,
        trigger: &Arc<TriggerCore>,
        group: Option<i32>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let component = Arc::clone(trigger.component());
        let push = trigger.is_port_push(&name)?;
        let group = match group {
            Some(group) => group,
            None => {
                if trigger.is_time_expansion()? {
                    TIME_EXPANSION_GROUP
                } else {
                    DEFAULT_TRIGGER_GROUP
                }
            }
        };

        let port = Arc::new_cyclic(|weak: &Weak<ExpansionInPort<T>>| {
            let full_name = format!("{}:{}", component.name(), name);
            let single_consumer = push.then(|| {
                let weak = weak.clone();
                PushConsumerCore::new(
                    full_name.clone(),
                    Arc::clone(&component),
                    Arc::new(move |event: &Measurement<T>| {
                        if let Some(port) = weak.upgrade() {
                            port.receive_push_single(event);
                        }
                    }),
                )
            });
            let vector_consumer = push.then(|| {
                let weak = weak.clone();
                PushConsumerCore::new(
                    full_name,
                    Arc::clone(&component),
                    Arc::new(move |event: &Measurement<Vec<T>>| {
                        if let Some(port) = weak.upgrade() {
                            port.receive_push_vector(event);
                        }
                    }),
                )
            });
            ExpansionInPort {
                name,
                component: Arc::clone(&component),
                trigger: Arc::downgrade(trigger),
                group,
                push,
                state: Mutex::new(ExpansionState::default()),
                single_consumer,
                vector_consumer,
                single_supplier: Mutex::new(None),
                vector_supplier: Mutex::new(None),
                master: Mutex::new(None),
                slaves: Mutex::new(Vec::new()),
            }
        });

        trigger.add_trigger_input(Arc::clone(&port) as Arc<dyn TriggerInput>, group);
        component.add_port(Arc::clone(&port) as Arc<dyn Connector>)?;
        trace!(
            "{} expansion input port created in trigger group {}",
            Connector::full_name(port.as_ref()),
            group
        );
        Ok(port)
    }

    /// The aggregated vector measurement.
    pub fn get(&self) -> Measurement<Vec<T>> {
        let state = self.state.lock();
        Measurement::new(state.timestamp, state.accumulator.clone())
    }

    fn receive_push_single(&self, event: &Measurement<T>) {
        debug!("{} received single measurement", Connector::full_name(self));
        let t = event.time();
        {
            let mut state = self.state.lock();
            state.timestamp = t;
            state.single = Some(event.clone());
        }
        self.after_receive(t);
    }

    fn receive_push_vector(&self, event: &Measurement<Vec<T>>) {
        debug!("{} received vector measurement", Connector::full_name(self));
        let t = event.time();
        {
            let mut state = self.state.lock();
            state.timestamp = t;
            state.single = None;
            state.accumulator = event.value().clone();
        }
        self.after_receive(t);
    }

    fn after_receive(&self, t: Timestamp) {
        let Some(trigger) = self.trigger.upgrade() else { return };
        if !trigger.trigger_group(self.group, t) {
            return;
        }
        trigger.store_group_measurements(self.group);

        let master = self.master.lock().as_ref().and_then(Weak::upgrade);
        if let Some(master) = master {
            master.slave_trigger(t);
        } else if !self.slaves.lock().is_empty() {
            // the master waits for its slaves' own events
        } else {
            trigger.trigger_in(t);
        }
    }

    /// Fires the component unless any sibling still has events queued.
    fn slave_trigger(&self, t: Timestamp) {
        if self.slaves.lock().iter().any(|slave| slave.events_waiting()) {
            return;
        }
        if let Some(trigger) = self.trigger.upgrade() {
            trigger.trigger_in(t);
        }
    }
}

impl<T: Payload + Clone> TriggerInput for ExpansionInPort<T> {
    fn port_name(&self) -> String {
        self.name.clone()
    }

    fn full_name(&self) -> String {
        Connector::full_name(self)
    }

    fn is_push(&self) -> bool {
        self.push
    }

    fn timestamp(&self) -> Timestamp {
        self.state.lock().timestamp
    }

    fn pull(&self, t: Timestamp) -> Result<()> {
        debug!("{} pull", Connector::full_name(self));

        if self.slaves.lock().is_empty() {
            let single = self.single_supplier.lock().clone();
            if let Some(supplier) = single {
                let event = supplier.get(t)?;
                let mut state = self.state.lock();
                state.single = Some(event);
                state.timestamp = t;
                return Ok(());
            }
            let vector = self.vector_supplier.lock().clone();
            if let Some(supplier) = vector {
                let event = supplier.get(t)?;
                let mut state = self.state.lock();
                state.single = None;
                state.accumulator = event.value().clone();
                state.timestamp = t;
                return Ok(());
            }
            return Err(DataflowError::NotConnected(Connector::full_name(self)));
        }

        // port-duplication space expansion: the slaves fill the
        // accumulator, the master only checks the timestamp
        let state = self.state.lock();
        if state.timestamp != t {
            return Err(DataflowError::NoMeasurement(Connector::full_name(self)));
        }
        Ok(())
    }

    fn store_measurement(&self) {
        let master = self.master.lock().as_ref().and_then(Weak::upgrade);
        match master {
            Some(master) => {
                let state = self.state.lock();
                let mut master_state = master.state.lock();
                if state.timestamp != master_state.accumulator_timestamp {
                    master_state.accumulator_timestamp = state.timestamp;
                    master_state.timestamp = state.timestamp;
                    master_state.accumulator.clear();
                }
                match &state.single {
                    Some(single) => master_state.accumulator.push(single.value().clone()),
                    None => master_state
                        .accumulator
                        .extend(state.accumulator.iter().cloned()),
                }
            }
            None => {
                let is_space_master = !self.slaves.lock().is_empty();
                let mut state = self.state.lock();
                if is_space_master && state.timestamp != state.accumulator_timestamp {
                    state.accumulator_timestamp = state.timestamp;
                    state.accumulator.clear();
                }
                // time expansion keeps aggregating over timestamps
                if let Some(single) = state.single.clone() {
                    state.accumulator.push(single.value().clone());
                }
            }
        }
    }

    fn events_waiting(&self) -> bool {
        self.single_consumer.as_ref().map(|c| c.queued_events() != 0).unwrap_or(false)
            || self.vector_consumer.as_ref().map(|c| c.queued_events() != 0).unwrap_or(false)
    }

    fn new_slave(self: Arc<Self>, name: &str, group: i32) -> Result<Arc<dyn Connector>> {
        let trigger = self
            .trigger
            .upgrade()
            .ok_or_else(|| DataflowError::BadConfiguration("trigger core dropped".into()))?;
        let slave = ExpansionInPort::<T>::create(name, &trigger, Some(group))?;
        *slave.master.lock() = Some(Arc::downgrade(&self));
        self.slaves.lock().push(Arc::clone(&slave));
        Ok(slave as Arc<dyn Connector>)
    }
}

impl<T: Payload + Clone> Connector for ExpansionInPort<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    fn connect(&self, other: &dyn Connector) -> Result<()> {
        if self.push {
            if let Some(registry) = other
                .push_registry()
                .and_then(|any| any.downcast_ref::<PushSupplierCore<Measurement<T>>>())
            {
                let consumer =
                    self.single_consumer.as_ref().ok_or_else(|| type_mismatch(other, self))?;
                registry.add_consumer(consumer.clone());
                return Ok(());
            }
            if let Some(registry) = other
                .push_registry()
                .and_then(|any| any.downcast_ref::<PushSupplierCore<Measurement<Vec<T>>>>())
            {
                let consumer =
                    self.vector_consumer.as_ref().ok_or_else(|| type_mismatch(other, self))?;
                registry.add_consumer(consumer.clone());
                return Ok(());
            }
            return Err(type_mismatch(other, self));
        }

        if let Some(handler) = other
            .pull_handler()
            .and_then(|any| any.downcast_ref::<PullSupplierCore<Measurement<T>>>())
        {
            *self.single_supplier.lock() = Some(handler.clone());
            return Ok(());
        }
        if let Some(handler) = other
            .pull_handler()
            .and_then(|any| any.downcast_ref::<PullSupplierCore<Measurement<Vec<T>>>>())
        {
            *self.vector_supplier.lock() = Some(handler.clone());
            return Ok(());
        }
        Err(type_mismatch(other, self))
    }

    fn disconnect(&self, other: &dyn Connector) -> Result<()> {
        if self.push {
            if let Some(registry) = other
                .push_registry()
                .and_then(|any| any.downcast_ref::<PushSupplierCore<Measurement<T>>>())
            {
                if let Some(consumer) = &self.single_consumer {
                    registry.remove_consumer(consumer.receiver());
                }
            }
            if let Some(registry) = other
                .push_registry()
                .and_then(|any| any.downcast_ref::<PushSupplierCore<Measurement<Vec<T>>>>())
            {
                if let Some(consumer) = &self.vector_consumer {
                    registry.remove_consumer(consumer.receiver());
                }
            }
        } else {
            *self.single_supplier.lock() = None;
            *self.vector_supplier.lock() = None;
        }
        Ok(())
    }

    fn accepts_push(&self, event_type: TypeId) -> bool {
        self.push
            && (event_type == TypeId::of::<Measurement<T>>()
                || event_type == TypeId::of::<Measurement<Vec<T>>>())
    }

    fn accepts_pull(&self, event_type: TypeId) -> bool {
        !self.push
            && (event_type == TypeId::of::<Measurement<T>>()
                || event_type == TypeId::of::<Measurement<Vec<T>>>())
    }
}
