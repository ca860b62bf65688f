// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Triggered components.

A triggered component synchronizes heterogeneous inputs by timestamp.
Its input ports are partitioned into trigger groups; the compute step
fires when every port of the active group has a value for the requested
timestamp: push ports must have received an event with exactly that
timestamp, pull ports are pulled and must succeed.

With a push output, any new push attempts to fire the default group; with
a pull-only output, firing happens when a downstream pull arrives.
Failures abort the current fire without error propagation: the component
simply skips.
*/

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use trackfuse_graph::Subgraph;

use crate::component::ComponentCore;
use crate::error::{DataflowError, Result};
use crate::event::Event;
use crate::measurement::Timestamp;
use crate::port::{type_mismatch, Connector};
use crate::pull::PullSupplierCore;
use crate::push::{PushConsumerCore, PushSupplierCore};

/// Trigger group of ordinary input ports.
pub const DEFAULT_TRIGGER_GROUP: i32 = 0;

/// Trigger group of time-expanded input ports. Kept separate so that a
/// pulled output does not drag the time-expansion inputs along.
pub const TIME_EXPANSION_GROUP: i32 = 1;

/// The compute step of a triggered component.
pub type ComputeFn = Box<dyn Fn(Timestamp) -> Result<()> + Send + Sync>;

/// An input port that participates in trigger synchronization.
pub trait TriggerInput: Send + Sync {
    /// Local port name within the component.
    fn port_name(&self) -> String;

    fn full_name(&self) -> String;

    /// True if the port is push, false if pull.
    fn is_push(&self) -> bool;

    /// Timestamp of the stored measurement.
    fn timestamp(&self) -> Timestamp;

    /// Pulls a measurement for `t` into internal storage (pull ports).
    fn pull(&self, t: Timestamp) -> Result<()>;

    /// Appends the stored measurement to the expansion accumulator.
    fn store_measurement(&self) {}

    /// True if push events are still queued for this port.
    fn events_waiting(&self) -> bool {
        false
    }

    /// Clones this port as an expansion slave.
    fn new_slave(self: Arc<Self>, _name: &str, _group: i32) -> Result<Arc<dyn Connector>> {
        Err(DataflowError::BadConfiguration(format!(
            "{}: only expansion ports can be cloned",
            self.full_name()
        )))
    }
}

#[derive(Default)]
struct TriggerGroup {
    ports: Vec<Arc<dyn TriggerInput>>,
}

/// Synchronization state shared by a triggered component and its ports.
pub struct TriggerCore {
    component: Arc<ComponentCore>,
    push_output: AtomicBool,
    has_new_push: AtomicBool,
    groups: Mutex<BTreeMap<i32, TriggerGroup>>,
    /// Push/pull configuration per port, read from the `mode` attribute.
    push_pull: BTreeMap<String, bool>,
    /// Time/space expansion selection from the `expansion` attribute.
    time_expansion: Option<bool>,
    compute: RwLock<Option<ComputeFn>>,
}

impl TriggerCore {
    /// Builds the core from the component's subgraph description.
    pub fn new(component: Arc<ComponentCore>, subgraph: &Subgraph) -> Arc<Self> {
        let mut push_pull = BTreeMap::new();
        for (_, edge) in subgraph.graph.edges() {
            if edge.data.attributes.has("mode") {
                push_pull
                    .insert(edge.name.clone(), edge.data.attributes.get_text("mode") == "push");
            }
        }
        let time_expansion = subgraph
            .dataflow_attributes
            .has("expansion")
            .then(|| subgraph.dataflow_attributes.get_text("expansion") == "time");

        let mut groups = BTreeMap::new();
        groups.insert(DEFAULT_TRIGGER_GROUP, TriggerGroup::default());

        Arc::new(TriggerCore {
            component,
            push_output: AtomicBool::new(false),
            has_new_push: AtomicBool::new(false),
            groups: Mutex::new(groups),
            push_pull,
            time_expansion,
            compute: RwLock::new(None),
        })
    }

    pub fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    /// Installs the component's compute step.
    pub fn set_compute(&self, compute: ComputeFn) {
        *self.compute.write() = Some(compute);
    }

    /// Push/pull configuration of a port.
    pub fn is_port_push(&self, name: &str) -> Result<bool> {
        self.push_pull.get(name).copied().ok_or_else(|| {
            DataflowError::BadConfiguration(format!(
                "no \"mode\" attribute on port {}:{}",
                self.component.name(),
                name
            ))
        })
    }

    /// Whether this component is configured as a time expansion.
    pub fn is_time_expansion(&self) -> Result<bool> {
        self.time_expansion.ok_or_else(|| {
            DataflowError::BadConfiguration(format!(
                "no \"expansion\" attribute on component {}",
                self.component.name()
            ))
        })
    }

    /// Registers an input port with a trigger group.
    pub fn add_trigger_input(&self, port: Arc<dyn TriggerInput>, group: i32) {
        debug!("adding trigger input {} to trigger group {}", port.full_name(), group);
        self.groups.lock().entry(group).or_default().ports.push(port);
    }

    /// Registers an output port; a push output makes pushes fire group 0.
    pub fn add_trigger_output(&self, push: bool) {
        if push {
            self.push_output.store(true, Ordering::Release);
        }
        debug!("{}: push output: {}", self.component.name(), push);
    }

    /// Did the component receive new push inputs since the last compute?
    pub fn has_new_push(&self) -> bool {
        self.has_new_push.load(Ordering::Acquire)
    }

    fn group_ports(&self, group: i32) -> Vec<Arc<dyn TriggerInput>> {
        self.groups
            .lock()
            .get(&group)
            .map(|g| g.ports.clone())
            .unwrap_or_default()
    }

    /// Checks push timestamps and pulls pull ports of one group.
    /// Returns true when every port holds a value for `t`.
    pub fn trigger_group(&self, group: i32, t: Timestamp) -> bool {
        for port in self.group_ports(group) {
            if port.is_push() {
                if port.timestamp() != t {
                    debug!(
                        "{} not computing: timestamps do not match on push input {}",
                        self.component.name(),
                        port.port_name()
                    );
                    return false;
                }
            } else if let Err(e) = port.pull(t) {
                debug!(
                    "{} not computing: error on pull input {}: {}",
                    self.component.name(),
                    port.port_name(),
                    e
                );
                return false;
            }
        }
        true
    }

    /// Appends the stored measurements of one group to the expansion
    /// accumulators.
    pub fn store_group_measurements(&self, group: i32) {
        for port in self.group_ports(group) {
            port.store_measurement();
        }
    }

    /// Called when a push input received an event.
    pub fn trigger_in(&self, t: Timestamp) {
        self.has_new_push.store(true, Ordering::Release);

        // with a pull output there is nothing to do until someone pulls
        if !self.push_output.load(Ordering::Acquire) {
            return;
        }
        if self.trigger_group(DEFAULT_TRIGGER_GROUP, t) {
            trace!("{} starting computation on push", self.component.name());
            self.run_compute(t).ok();
            self.has_new_push.store(false, Ordering::Release);
        }
    }

    /// Called when a pulled output port wants data.
    ///
    /// Time-expanded inputs (group 1) are deliberately not pulled here;
    /// only push events may trigger them.
    pub fn trigger_out(&self, t: Timestamp) -> Result<()> {
        if !self.trigger_group(DEFAULT_TRIGGER_GROUP, t) {
            return Err(DataflowError::NoMeasurement(self.component.name().to_string()));
        }
        trace!("{} starting computation on pull", self.component.name());
        self.run_compute(t)?;
        self.has_new_push.store(false, Ordering::Release);
        Ok(())
    }

    fn run_compute(&self, t: Timestamp) -> Result<()> {
        let compute = self.compute.read();
        match compute.as_ref() {
            Some(f) => {
                if let Err(e) = f(t) {
                    debug!("{} compute failed: {}", self.component.name(), e);
                    return Err(e);
                }
                Ok(())
            }
            None => Err(DataflowError::BadConfiguration(format!(
                "{}: no compute step installed",
                self.component.name()
            ))),
        }
    }

    /// Clones expansion master ports for every configured input edge whose
    /// name extends an existing port name. Must be called after the base
    /// ports were created.
    pub fn generate_space_expansion_ports(&self, subgraph: &Subgraph) -> Result<()> {
        let originals: Vec<(String, i32, Arc<dyn TriggerInput>)> = {
            let groups = self.groups.lock();
            groups
                .iter()
                .flat_map(|(&group, g)| {
                    g.ports.iter().map(move |p| (p.port_name(), group, Arc::clone(p)))
                })
                .collect()
        };
        let mut processed: BTreeMap<String, i32> =
            originals.iter().map(|(name, group, _)| (name.clone(), *group)).collect();

        for (_, edge) in subgraph.input_edges() {
            if processed.contains_key(&edge.name) {
                continue;
            }
            for (orig_name, orig_group, orig_port) in &originals {
                if !edge.name.starts_with(orig_name.as_str()) {
                    continue;
                }
                let suffix = &edge.name[orig_name.len()..];

                // siblings with the same suffix share one trigger group
                let mut group = self
                    .groups
                    .lock()
                    .keys()
                    .max()
                    .copied()
                    .unwrap_or(DEFAULT_TRIGGER_GROUP)
                    + 1;
                for sibling in self.group_ports(*orig_group) {
                    let hypothetical = format!("{}{}", sibling.port_name(), suffix);
                    if let Some(&sibling_group) = processed.get(&hypothetical) {
                        group = sibling_group;
                        break;
                    }
                }

                Arc::clone(orig_port).new_slave(&edge.name, group)?;
                processed.insert(edge.name.clone(), group);
                break;
            }
        }
        Ok(())
    }
}

struct PortState<E> {
    timestamp: Timestamp,
    value: Option<E>,
}

impl<E> Default for PortState<E> {
    fn default() -> Self {
        PortState { timestamp: 0, value: None }
    }
}

/// A triggered input port: push or pull, carrying one event type.
pub struct TriggerInPort<E: Event> {
    name: String,
    component: Arc<ComponentCore>,
    trigger: Weak<TriggerCore>,
    push: bool,
    state: Mutex<PortState<E>>,
    consumer: Option<PushConsumerCore<E>>,
    supplier: Mutex<Option<PullSupplierCore<E>>>,
}

impl<E: Event> TriggerInPort<E> {
    /// Creates the port, registers it with the component and the given
    /// trigger group.
    pub fn create(
        name: impl Into<String>,
        trigger: &Arc<TriggerCore>,
        group: i32,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let component = Arc::clone(trigger.component());
        let push = trigger.is_port_push(&name)?;

        let port = Arc::new_cyclic(|weak: &Weak<TriggerInPort<E>>| {
            let consumer = push.then(|| {
                let weak = weak.clone();
                PushConsumerCore::new(
                    format!("{}:{}", component.name(), name),
                    Arc::clone(&component),
                    Arc::new(move |event: &E| {
                        if let Some(port) = weak.upgrade() {
                            port.receive_push(event);
                        }
                    }),
                )
            });
            TriggerInPort {
                name,
                component: Arc::clone(&component),
                trigger: Arc::downgrade(trigger),
                push,
                state: Mutex::new(PortState::default()),
                consumer,
                supplier: Mutex::new(None),
            }
        });

        trigger.add_trigger_input(Arc::clone(&port) as Arc<dyn TriggerInput>, group);
        component.add_port(Arc::clone(&port) as Arc<dyn Connector>)?;
        Ok(port)
    }

    fn receive_push(&self, event: &E) {
        let t = event.priority();
        {
            let mut state = self.state.lock();
            state.timestamp = t;
            state.value = Some(event.clone());
        }
        if let Some(trigger) = self.trigger.upgrade() {
            trigger.trigger_in(t);
        }
    }

    /// The stored measurement, set by the last push or pull.
    pub fn get(&self) -> Result<E> {
        self.state
            .lock()
            .value
            .clone()
            .ok_or_else(|| DataflowError::NoMeasurement(Connector::full_name(self)))
    }
}

impl<E: Event> TriggerInput for TriggerInPort<E> {
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
        let supplier = self
            .supplier
            .lock()
            .clone()
            .ok_or_else(|| DataflowError::NotConnected(Connector::full_name(self)))?;
        let event = supplier.get(t)?;
        let mut state = self.state.lock();
        state.timestamp = t;
        state.value = Some(event);
        Ok(())
    }

    fn events_waiting(&self) -> bool {
        self.consumer.as_ref().map(|c| c.queued_events() != 0).unwrap_or(false)
    }
}

impl<E: Event> Connector for TriggerInPort<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    fn connect(&self, other: &dyn Connector) -> Result<()> {
        if self.push {
            let registry = other
                .push_registry()
                .and_then(|any| any.downcast_ref::<PushSupplierCore<E>>())
                .ok_or_else(|| type_mismatch(other, self))?;
            let consumer = self.consumer.as_ref().ok_or_else(|| type_mismatch(other, self))?;
            registry.add_consumer(consumer.clone());
            Ok(())
        } else {
            let handler = other
                .pull_handler()
                .and_then(|any| any.downcast_ref::<PullSupplierCore<E>>())
                .ok_or_else(|| type_mismatch(other, self))?;
            let mut supplier = self.supplier.lock();
            if supplier.is_some() {
                return Err(DataflowError::AlreadyConnected(Connector::full_name(self)));
            }
            *supplier = Some(handler.clone());
            Ok(())
        }
    }

    fn disconnect(&self, other: &dyn Connector) -> Result<()> {
        if self.push {
            if let (Some(registry), Some(consumer)) = (
                other
                    .push_registry()
                    .and_then(|any| any.downcast_ref::<PushSupplierCore<E>>()),
                self.consumer.as_ref(),
            ) {
                registry.remove_consumer(consumer.receiver());
            }
        } else {
            *self.supplier.lock() = None;
        }
        Ok(())
    }

    fn accepts_push(&self, event_type: TypeId) -> bool {
        self.push && event_type == TypeId::of::<E>()
    }

    fn accepts_pull(&self, event_type: TypeId) -> bool {
        !self.push && event_type == TypeId::of::<E>()
    }
}

/// A triggered output port: push or pull, carrying one event type.
///
/// With a push output, `send` queues the result for the connected
/// consumers. With a pull output, the result is stored and handed out by
/// the pull handler after `trigger_out` ran the compute step.
pub struct TriggerOutPort<E: Event> {
    name: String,
    component: Arc<ComponentCore>,
    push: bool,
    supplier: PushSupplierCore<E>,
    pull_core: Option<PullSupplierCore<E>>,
    state: Mutex<PortState<E>>,
}

impl<E: Event> TriggerOutPort<E> {
    pub fn create(name: impl Into<String>, trigger: &Arc<TriggerCore>) -> Result<Arc<Self>> {
        let name = name.into();
        let component = Arc::clone(trigger.component());
        let push = trigger.is_port_push(&name)?;
        trigger.add_trigger_output(push);

        let port = Arc::new_cyclic(|weak: &Weak<TriggerOutPort<E>>| {
            let pull_core = (!push).then(|| {
                let weak = weak.clone();
                let trigger = Arc::downgrade(trigger);
                PullSupplierCore::new(
                    Arc::clone(&component),
                    Arc::new(move |t: Timestamp| {
                        let port = weak
                            .upgrade()
                            .ok_or_else(|| DataflowError::NoMeasurement("(dropped)".into()))?;
                        let core = trigger
                            .upgrade()
                            .ok_or_else(|| DataflowError::NoMeasurement(port.full_name()))?;
                        core.trigger_out(t)?;
                        let state = port.state.lock();
                        if state.timestamp == t {
                            state
                                .value
                                .clone()
                                .ok_or_else(|| DataflowError::NoMeasurement(port.full_name()))
                        } else {
                            Err(DataflowError::NoMeasurement(port.full_name()))
                        }
                    }),
                )
            });
            TriggerOutPort {
                name,
                component: Arc::clone(&component),
                push,
                supplier: PushSupplierCore::new(),
                pull_core,
                state: Mutex::new(PortState::default()),
            }
        });

        component.add_port(Arc::clone(&port) as Arc<dyn Connector>)?;
        Ok(port)
    }

    /// Emits a computed result: queued to consumers on a push output,
    /// stored for the pending pull otherwise.
    pub fn send(&self, event: &E) {
        {
            let mut state = self.state.lock();
            state.timestamp = event.priority();
            state.value = Some(event.clone());
        }
        if self.push {
            self.supplier.send(event);
        }
    }

    pub fn is_push(&self) -> bool {
        self.push
    }
}

impl<E: Event> Connector for TriggerOutPort<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    fn connect(&self, other: &dyn Connector) -> Result<()> {
        let compatible = if self.push {
            other.accepts_push(TypeId::of::<E>())
        } else {
            other.accepts_pull(TypeId::of::<E>())
        };
        if compatible {
            Ok(())
        } else {
            Err(type_mismatch(self, other))
        }
    }

    fn disconnect(&self, _other: &dyn Connector) -> Result<()> {
        Ok(())
    }

    fn push_registry(&self) -> Option<&dyn Any> {
        self.push.then_some(&self.supplier as &dyn Any)
    }

    fn pull_handler(&self) -> Option<&dyn Any> {
        self.pull_core.as_ref().map(|core| core as &dyn Any)
    }
}
