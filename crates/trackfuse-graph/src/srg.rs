// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
The world spatial relationship graph.

Nodes are keyed by their globally unique id. Every node remembers which
subgraphs spawned it and which pattern nodes were merged into it, so that
attribute updates can be written back. Every edge remembers the subgraph
that produced it, its local name, its information sources and the
subgraphs that consume it.
*/

use std::collections::BTreeSet;

use crate::attributes::KeyValueAttributes;
use crate::error::Result;
use crate::graph::{EdgeIndex, Graph, GraphEdge, GraphNode, NodeIndex};
use crate::subgraph::SubgraphNode;

/// Payload of an SRG node.
#[derive(Debug, Clone, Default)]
pub struct SrgNode {
    pub attributes: KeyValueAttributes,
    /// Ids of the subgraphs that currently spawn this node. The node
    /// survives while this set is non-empty.
    pub subgraph_ids: BTreeSet<String>,
    /// `(subgraph id, node name)` of every pattern node merged into this
    /// one; used to propagate attribute updates back into instances.
    pub node_refs: BTreeSet<(String, String)>,
}

/// Payload of an SRG edge.
#[derive(Debug, Clone, Default)]
pub struct SrgEdge {
    pub attributes: KeyValueAttributes,
    /// Id of the subgraph that produced this edge.
    pub subgraph_id: String,
    /// Name of the producing pattern, if any.
    pub pattern_name: String,
    /// Local name of the edge within its producing subgraph.
    pub local_name: String,
    /// Opaque provenance strings of the physical data origins.
    pub information_sources: BTreeSet<String>,
    /// Ids of the subgraphs that consume this edge as an input.
    pub dependent_subgraphs: BTreeSet<String>,
}

impl SrgEdge {
    pub fn new(
        attributes: KeyValueAttributes,
        subgraph_id: impl Into<String>,
        local_name: impl Into<String>,
    ) -> Self {
        SrgEdge {
            attributes,
            subgraph_id: subgraph_id.into(),
            local_name: local_name.into(),
            ..Default::default()
        }
    }
}

/// The world SRG: a directed multigraph of geometric relations.
#[derive(Debug, Clone)]
pub struct Srg {
    graph: Graph<SrgNode, SrgEdge>,
    tmp_id_counter: u64,
}

impl Default for Srg {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the unique SRG edge name for a subgraph-local edge.
pub fn srg_edge_name(subgraph_id: &str, local_name: &str) -> String {
    format!("{}:{}", subgraph_id, local_name)
}

impl Srg {
    pub fn new() -> Self {
        Srg { graph: Graph::new(), tmp_id_counter: 1000 }
    }

    pub fn graph(&self) -> &Graph<SrgNode, SrgEdge> {
        &self.graph
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.graph.has_node(id)
    }

    pub fn has_edge(&self, name: &str) -> bool {
        self.graph.has_edge(name)
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.graph.node_index(id)
    }

    pub fn node(&self, index: NodeIndex) -> &GraphNode<SrgNode> {
        self.graph.node(index)
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut GraphNode<SrgNode> {
        self.graph.node_mut(index)
    }

    pub fn edge_index(&self, name: &str) -> Option<EdgeIndex> {
        self.graph.edge_index(name)
    }

    pub fn edge(&self, index: EdgeIndex) -> &GraphEdge<SrgEdge> {
        self.graph.edge(index)
    }

    pub fn edge_mut(&mut self, index: EdgeIndex) -> &mut GraphEdge<SrgEdge> {
        self.graph.edge_mut(index)
    }

    pub fn get_edge(&self, name: &str) -> Result<&GraphEdge<SrgEdge>> {
        self.graph.get_edge(name)
    }

    /// Number of edges.
    pub fn size(&self) -> usize {
        self.graph.size()
    }

    /// Number of nodes.
    pub fn order(&self) -> usize {
        self.graph.order()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode<SrgNode>)> {
        self.graph.nodes()
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeIndex, &GraphEdge<SrgEdge>)> {
        self.graph.edges()
    }

    /// Inserts an SRG node for a subgraph node, generating a `tmp<n>` id
    /// when the node carries no qualified name.
    pub fn add_node(
        &mut self,
        node: &SubgraphNode,
        subgraph_id: &str,
        node_name: &str,
    ) -> Result<NodeIndex> {
        let id = if node.qualified_name.is_empty() {
            self.tmp_id_counter += 1;
            format!("tmp{}", self.tmp_id_counter - 1)
        } else {
            node.qualified_name.clone()
        };

        let mut data = SrgNode { attributes: node.attributes.clone(), ..Default::default() };
        if !subgraph_id.is_empty() {
            data.subgraph_ids.insert(subgraph_id.to_string());
        }
        data.node_refs.insert((subgraph_id.to_string(), node_name.to_string()));
        self.graph.add_node(id, data)
    }

    /// Merges a subgraph node into an existing SRG node.
    ///
    /// Attributes merge last-write-wins. Returns the pattern-node
    /// references (including the new one) whose instance attributes must
    /// be refreshed from this node so that later matchings see a coherent
    /// world view.
    pub fn merge_node_attributes(
        &mut self,
        index: NodeIndex,
        node: &SubgraphNode,
        subgraph_id: &str,
        node_name: &str,
    ) -> Vec<(String, String)> {
        let slot = self.graph.node_mut(index);
        slot.data.subgraph_ids.insert(subgraph_id.to_string());
        slot.data.attributes.merge(&node.attributes);
        let refs: Vec<(String, String)> = slot.data.node_refs.iter().cloned().collect();
        slot.data.node_refs.insert((subgraph_id.to_string(), node_name.to_string()));
        refs
    }

    /// Drops a subgraph's claim on a node. Returns `true` when the spawn
    /// set became empty and the node should be removed.
    pub fn release_node(&mut self, index: NodeIndex, subgraph_id: &str, node_name: &str) -> bool {
        let slot = self.graph.node_mut(index);
        slot.data.subgraph_ids.remove(subgraph_id);
        slot.data.node_refs.remove(&(subgraph_id.to_string(), node_name.to_string()));
        slot.data.subgraph_ids.is_empty()
    }

    pub fn add_edge(
        &mut self,
        name: impl Into<String>,
        source: NodeIndex,
        target: NodeIndex,
        data: SrgEdge,
    ) -> Result<EdgeIndex> {
        self.graph.add_edge(name, source, target, data)
    }

    pub fn remove_edge_by_name(&mut self, name: &str) -> Result<()> {
        self.graph.remove_edge_by_name(name)
    }

    pub fn remove_node_by_id(&mut self, id: &str) -> Result<()> {
        self.graph.remove_node_by_name(id)
    }
}
