// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
# trackfuse - dataflow runtime for ubiquitous tracking

trackfuse turns a declarative description of sensor fusion and spatial
computations into a running network of typed components connected by
push/pull ports.

The core is organized in three coupled subsystems:

1. **Spatial relationship graphs.** Known geometric relations form a
   directed multigraph whose edges carry attributes (latency, noise,
   update rate) and provenance. *Patterns* are typed subgraphs matched
   against the SRG; applying a pattern grows the graph with derived
   edges. *Queries* are answered with dataflow descriptions.
2. **The typed dataflow runtime.** Components expose named, typed
   push/pull ports; triggered components synchronize heterogeneous
   inputs by timestamp, with time and space expansion.
3. **The prioritized event queue.** A single-threaded cooperative
   dispatcher delivers push events in priority order with per-receiver
   queue caps and per-component locking.

## Crates

- [`graph`] - attribute algebra, SRG store, pattern matcher, SRG manager
  and query server
- [`dataflow`] - ports, triggered components, event queue, network
  assembly, component factory
- [`utql`] - UTQL document model and XML reader/writer
- [`net`] - length-prefixed TCP transport for the network bridge

## Quick start

```rust
use trackfuse::prelude::*;

let mut manager = SrgManager::new();

// register a tracker: one output edge with attributes and provenance
let mut base = Subgraph::new("art1", "Art6D");
let mut tracker = SubgraphNode::new(SectionTag::Output);
tracker.qualified_name = "ArtTracker".into();
base.add_node("Art", tracker)?;
let mut body = SubgraphNode::new(SectionTag::Output);
body.qualified_name = "Body1".into();
base.add_node("Body", body)?;
let mut pose = SubgraphEdge::new(SectionTag::Output);
pose.attributes.set("type", "6D".into());
base.add_edge("ArtToBody", "Art", "Body", pose)?;
manager.register_srg(base, "client")?;

assert!(manager.srg().has_edge("art1:ArtToBody"));
# Ok::<(), trackfuse::graph::GraphError>(())
```
*/

pub use trackfuse_dataflow as dataflow;
pub use trackfuse_graph as graph;
pub use trackfuse_net as net;
pub use trackfuse_utql as utql;

/// Commonly used types and traits.
pub mod prelude {
    pub use crate::dataflow::{
        Component, ComponentCore, ComponentFactory, Connector, DataflowNetwork, EventQueue,
        Measurement, PullConsumer, PullSupplier, PushConsumer, PushSupplier, Timestamp,
        TriggerCore, TriggerInPort, TriggerOutPort,
    };
    pub use crate::graph::subgraph::{
        EdgeReference, SectionTag, Subgraph, SubgraphEdge, SubgraphNode,
    };
    pub use crate::graph::{
        AttributeExpression, AttributeValue, KeyValueAttributes, Predicate, QueryServer,
        SrgManager,
    };
    pub use crate::net::FrameConnection;
    pub use crate::utql::{read_document, write_document, UtqlDocument};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_facade_imports() {
        use crate::prelude::*;
        let _manager = SrgManager::new();
        let _value = AttributeValue::number(1.0);
    }
}
