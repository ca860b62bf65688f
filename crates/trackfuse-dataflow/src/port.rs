// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Port interfaces.

Ports are classified by direction (consumer/supplier), mode (push/pull)
and event type. Connections are made pairwise and in both directions by
the network; type compatibility is checked at connect time, never at
dispatch time.

Capability discovery works through `Any`: a supplier exposes its typed
registry (push) or handler (pull), and the consumer side downcasts to the
matching event type. The consumer performs the registration; the supplier
side of the same connection only verifies compatibility.
*/

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::component::ComponentCore;
use crate::error::{DataflowError, Result};

/// The common interface of all ports.
pub trait Connector: Send + Sync {
    /// Port name, unique within its component.
    fn name(&self) -> &str;

    /// The component this port belongs to.
    fn component(&self) -> &Arc<ComponentCore>;

    /// `component:port` for logs and errors.
    fn full_name(&self) -> String {
        format!("{}:{}", self.component().name(), self.name())
    }

    /// Connects this port to another. Called in both directions by the
    /// network; if the second call fails the first is rolled back.
    fn connect(&self, other: &dyn Connector) -> Result<()>;

    /// Disconnects this port from another.
    fn disconnect(&self, other: &dyn Connector) -> Result<()>;

    /// The typed push registry (`PushSupplierCore<E>`) if this port
    /// supplies push events.
    fn push_registry(&self) -> Option<&dyn Any> {
        None
    }

    /// The typed pull handler (`PullSupplierCore<E>`) if this port
    /// supplies pull requests.
    fn pull_handler(&self) -> Option<&dyn Any> {
        None
    }

    /// True if this port consumes push events of the given type.
    fn accepts_push(&self, _event_type: TypeId) -> bool {
        false
    }

    /// True if this port consumes pull results of the given type.
    fn accepts_pull(&self, _event_type: TypeId) -> bool {
        false
    }
}

/// Builds the standard incompatible-ports error.
pub(crate) fn type_mismatch(source: &dyn Connector, destination: &dyn Connector) -> DataflowError {
    DataflowError::TypeMismatch {
        source_port: source.full_name(),
        destination: destination.full_name(),
    }
}
