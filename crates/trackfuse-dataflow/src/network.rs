// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Dataflow network assembly.

Processes a dataflow response document: reconciles existing components,
creates missing ones through the factory, wires the connections declared
by input edge references and recomputes event scheduling priorities.

Connections are made pairwise and in both directions; when the second
direction fails, the first is rolled back so the network stays
consistent.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use trackfuse_graph::Subgraph;

use crate::component::{Component, MAX_EVENT_PRIORITY};
use crate::error::{DataflowError, Result};
use crate::factory::ComponentFactory;
use crate::queue;

/// One side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub component: String,
    pub port: String,
}

/// A directed port-to-port connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Connection {
    pub source: Endpoint,
    pub destination: Endpoint,
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source.component, self.source.port, self.destination.component, self.destination.port
        )
    }
}

/// The instantiated dataflow network.
pub struct DataflowNetwork {
    factory: Arc<ComponentFactory>,
    components: BTreeMap<String, Arc<dyn Component>>,
    /// Priorities configured explicitly via the `eventPriority` attribute.
    configured_priorities: BTreeMap<String, i32>,
    all_connections: BTreeSet<Connection>,
    in_connections: BTreeMap<String, BTreeSet<Connection>>,
    out_connections: BTreeMap<String, BTreeSet<Connection>>,
}

impl DataflowNetwork {
    pub fn new(factory: Arc<ComponentFactory>) -> Self {
        DataflowNetwork {
            factory,
            components: BTreeMap::new(),
            configured_priorities: BTreeMap::new(),
            all_connections: BTreeSet::new(),
            in_connections: BTreeMap::new(),
            out_connections: BTreeMap::new(),
        }
    }

    pub fn component(&self, name: &str) -> Result<&Arc<dyn Component>> {
        self.components
            .get(name)
            .ok_or_else(|| DataflowError::UnknownComponent(name.to_string()))
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.keys().cloned().collect()
    }

    /// Processes a dataflow response: reconcile, create, wire, reprioritize.
    pub fn process_response(&mut self, subgraphs: &[Subgraph]) -> Result<()> {
        // 1. reconcile components with what is already running
        for subgraph in subgraphs {
            debug!("considering component {}", subgraph.id);
            if !subgraph.id.is_empty() && self.components.contains_key(&subgraph.id) {
                // connections are stateless; drop them and re-establish below
                self.disconnect_component(&subgraph.id)?;

                if subgraph.is_null() {
                    info!("{} replaced with empty subgraph, deleting", subgraph.id);
                    self.drop_component(&subgraph.id)?;
                } else {
                    info!("{} replaced with non-empty subgraph, reconfiguring", subgraph.id);
                    if !subgraph.dataflow_configuration.is_empty() {
                        warn!("cannot apply configuration changes to a running component");
                    }
                }
            } else if !subgraph.dataflow_configuration.is_empty() || !subgraph.dataflow_class.is_empty()
            {
                let component = self.create_component(subgraph)?;
                debug!("created component {} [{}]", subgraph.id, component.name());
            }
        }

        // 2. wire connections from input edge references
        info!("making connections");
        for subgraph in subgraphs {
            if subgraph.dataflow_class.is_empty() && subgraph.dataflow_configuration.is_empty() {
                continue;
            }
            for (_, edge) in subgraph.input_edges() {
                // edges on other clients are handled by the network bridge
                if edge.data.attributes.has("remotePatternID") {
                    continue;
                }
                if edge.data.edge_reference.is_empty() {
                    warn!("{} has dangling edge {}", subgraph.name, edge.name);
                    continue;
                }

                let other_id = edge.data.edge_reference.subgraph_id();
                let other_is_dataflow = self.components.contains_key(other_id)
                    || subgraphs.iter().any(|s| {
                        s.id == other_id
                            && (!s.dataflow_configuration.is_empty() || !s.dataflow_class.is_empty())
                    });
                if !other_is_dataflow {
                    continue;
                }

                self.connect_components(
                    other_id,
                    edge.data.edge_reference.edge_name(),
                    &subgraph.id,
                    &edge.name,
                )?;
            }
        }

        // 3. recompute event priorities
        self.assign_event_priorities();
        Ok(())
    }

    /// Creates a component for a subgraph through the factory.
    pub fn create_component(&mut self, subgraph: &Subgraph) -> Result<Arc<dyn Component>> {
        let class = &subgraph.dataflow_class;
        if class.is_empty() {
            return Err(DataflowError::BadConfiguration(format!(
                "subgraph {} specifies no component class",
                subgraph.id
            )));
        }
        let name = subgraph.id.clone();
        info!("creating {} [{}]", name, class);

        if self.components.contains_key(&name) {
            warn!("duplicate component name: {}", name);
            return Err(DataflowError::DuplicateComponent(name));
        }

        let component = self.factory.create_component(class, &name, subgraph)?;

        // the module mechanism may return an existing shared instance
        if component.name() != name && self.components.contains_key(component.name()) {
            warn!(
                "creating component {} returned existing component {}; check the \
                 configuration for duplicate resource ids",
                name,
                component.name()
            );
        }

        if let Some(priority) = subgraph.dataflow_attributes.get_parsed::<i32>("eventPriority") {
            self.configured_priorities.insert(name.clone(), priority);
        }

        self.components.insert(name, Arc::clone(&component));
        Ok(component)
    }

    /// Disconnects and removes a component, dropping its queued events.
    pub fn drop_component(&mut self, name: &str) -> Result<()> {
        if !self.components.contains_key(name) {
            return Err(DataflowError::UnknownComponent(name.to_string()));
        }
        debug!("dropping component {}", name);
        self.disconnect_component(name)?;
        queue::global().remove_component(name);
        self.factory.release_shared(name);
        self.configured_priorities.remove(name);
        self.components.remove(name);
        Ok(())
    }

    /// Connects a source port to a destination port (both directions).
    pub fn connect_components(
        &mut self,
        source_component: &str,
        source_port: &str,
        destination_component: &str,
        destination_port: &str,
    ) -> Result<()> {
        let connection = Connection {
            source: Endpoint {
                component: source_component.to_string(),
                port: source_port.to_string(),
            },
            destination: Endpoint {
                component: destination_component.to_string(),
                port: destination_port.to_string(),
            },
        };
        if self.all_connections.contains(&connection) {
            return Err(DataflowError::AlreadyConnected(connection.to_string()));
        }

        let source = self.component(source_component)?.core().port(source_port)?;
        let destination = self
            .component(destination_component)?
            .core()
            .port(destination_port)?;

        // connect in both directions; we do not know which side carries
        // the protocol state, so roll back the first on failure
        source.connect(destination.as_ref())?;
        if let Err(e) = destination.connect(source.as_ref()) {
            source.disconnect(destination.as_ref())?;
            return Err(e);
        }

        debug!("connected {}", connection);
        self.in_connections
            .entry(destination_component.to_string())
            .or_default()
            .insert(connection.clone());
        self.out_connections
            .entry(source_component.to_string())
            .or_default()
            .insert(connection.clone());
        self.all_connections.insert(connection);
        Ok(())
    }

    /// Disconnects a single connection.
    pub fn disconnect_components(&mut self, connection: &Connection) -> Result<()> {
        if !self.all_connections.contains(connection) {
            return Err(DataflowError::NotConnected(connection.to_string()));
        }

        let source = self
            .component(&connection.source.component)?
            .core()
            .port(&connection.source.port)?;
        let destination = self
            .component(&connection.destination.component)?
            .core()
            .port(&connection.destination.port)?;

        destination.disconnect(source.as_ref())?;
        source.disconnect(destination.as_ref())?;
        debug!("disconnected {}", connection);

        if let Some(set) = self.out_connections.get_mut(&connection.source.component) {
            set.remove(connection);
        }
        if let Some(set) = self.in_connections.get_mut(&connection.destination.component) {
            set.remove(connection);
        }
        self.all_connections.remove(connection);
        Ok(())
    }

    /// Isolates a component by removing all its connections.
    pub fn disconnect_component(&mut self, name: &str) -> Result<()> {
        debug!("isolating {}", name);
        let mut connections: Vec<Connection> = Vec::new();
        if let Some(set) = self.in_connections.get(name) {
            connections.extend(set.iter().cloned());
        }
        if let Some(set) = self.out_connections.get(name) {
            connections.extend(set.iter().cloned());
        }
        for connection in connections {
            // sets overlap for self-connections; skip those already gone
            if self.all_connections.contains(&connection) {
                self.disconnect_components(&connection)?;
            }
        }
        self.in_connections.remove(name);
        self.out_connections.remove(name);
        Ok(())
    }

    /// Starts every component.
    pub fn start_network(&self) {
        info!("signaling components to start");
        for component in self.components.values() {
            component.start();
        }
        info!("dataflow started");
    }

    /// Stops every component.
    pub fn stop_network(&self) {
        info!("signaling components to stop");
        for component in self.components.values() {
            component.stop();
        }
        info!("dataflow terminated");
    }

    /// Assigns event scheduling priorities.
    ///
    /// A depth-first search upstream from every sink gives each component
    /// the minimum over all traversals of `MAX_EVENT_PRIORITY` minus its
    /// longest path from a source, i.e. priorities fall in
    /// `[MAX_EVENT_PRIORITY - longest_path, MAX_EVENT_PRIORITY]` with the
    /// sinks highest. Equal-priority ties dispatch in arrival order.
    /// Cycles are broken per traversal. An explicit `eventPriority`
    /// attribute overrides the computed value.
    pub fn assign_event_priorities(&self) {
        info!("assigning event priorities");

        for component in self.components.values() {
            component.core().set_event_priority(MAX_EVENT_PRIORITY);
        }

        enum Frame {
            Visit(i32, String),
            Leave(String),
        }

        for (name, component) in &self.components {
            let is_sink = self
                .out_connections
                .get(name)
                .map(|out| out.is_empty())
                .unwrap_or(true);
            if !is_sink {
                continue;
            }
            trace!("{} is a sink", component.name());

            let mut search = vec![Frame::Visit(MAX_EVENT_PRIORITY, name.clone())];
            let mut visiting: BTreeSet<String> = BTreeSet::new();

            while let Some(frame) = search.pop() {
                match frame {
                    Frame::Leave(done) => {
                        visiting.remove(&done);
                    }
                    Frame::Visit(priority, current) => {
                        let Some(component) = self.components.get(&current) else { continue };
                        if component.core().event_priority() > priority {
                            component.core().set_event_priority(priority);
                        }
                        visiting.insert(current.clone());
                        search.push(Frame::Leave(current.clone()));

                        if let Some(in_connections) = self.in_connections.get(&current) {
                            for connection in in_connections {
                                let ancestor = &connection.source.component;
                                if !visiting.contains(ancestor) {
                                    trace!("queueing {}", ancestor);
                                    search.push(Frame::Visit(priority - 1, ancestor.clone()));
                                }
                            }
                        }
                    }
                }
            }
        }

        // explicit attribute overrides
        for (name, &priority) in &self.configured_priorities {
            if let Some(component) = self.components.get(name) {
                component.core().set_event_priority(priority);
            }
        }

        for (name, component) in &self.components {
            debug!("{} has priority {}", name, component.core().event_priority());
        }
    }
}

impl Drop for DataflowNetwork {
    fn drop(&mut self) {
        let names = self.component_names();
        for name in names {
            let _ = self.drop_component(&name);
        }
        debug!("destroyed dataflow network");
    }
}
