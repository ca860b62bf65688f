// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Typed push/pull dataflow runtime.

Instantiated components expose named, type-parameterized push/pull ports;
triggered components synchronize heterogeneous inputs by timestamp, with
time and space expansion. Push delivery runs through a single-threaded
prioritized event queue with per-receiver caps; pull is synchronous on
the calling thread under the supplier component's reentrant mutex.

The network layer turns a dataflow response document into running,
connected components and assigns event scheduling priorities so that all
sinks of one causal chain receive their events together.
*/

pub mod component;
pub mod error;
pub mod event;
pub mod expansion;
pub mod factory;
pub mod loader;
pub mod measurement;
pub mod network;
pub mod port;
pub mod pull;
pub mod push;
pub mod queue;
pub mod trigger;

pub use component::{Component, ComponentCore, MAX_EVENT_PRIORITY};
pub use error::{DataflowError, Result};
pub use event::{Event, Payload, DEFAULT_MAX_QUEUE_LENGTH, UNLIMITED_QUEUE_LENGTH};
pub use expansion::ExpansionInPort;
pub use factory::ComponentFactory;
pub use loader::{ModuleLoader, StaticLoader, REGISTER_COMPONENT_SYMBOL};
pub use measurement::{now, Button, Measurement, Timestamp};
pub use network::{Connection, DataflowNetwork, Endpoint};
pub use port::Connector;
pub use pull::{PullConsumer, PullSupplier};
pub use push::{PushConsumer, PushSupplier};
pub use queue::{EventQueue, EventSink, ImmediateDispatcher, QueueItem, ReceiverInfo};
pub use trigger::{TriggerCore, TriggerInPort, TriggerInput, TriggerOutPort};
