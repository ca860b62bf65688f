// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Generic directed multigraph.

Nodes and edges live in arenas and are addressed by index; incidence lists
on nodes hold edge indices. Removal tombstones the slot and recycles it on
the next insertion, so the arenas do not grow without bound and surviving
indices are never renumbered. Indices obtained before a removal must not be
used afterwards.

Node and edge names are unique within one graph.
*/

use std::collections::BTreeMap;

use tracing::error;

use crate::error::{GraphError, Result};

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub(crate) u32);

/// Index of an edge in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeIndex(pub(crate) u32);

/// A node slot: name, payload and incidence lists of edge indices.
#[derive(Debug, Clone)]
pub struct GraphNode<N> {
    pub name: String,
    pub data: N,
    pub in_edges: Vec<EdgeIndex>,
    pub out_edges: Vec<EdgeIndex>,
    alive: bool,
}

/// An edge slot: name, payload and its two endpoint indices.
#[derive(Debug, Clone)]
pub struct GraphEdge<E> {
    pub name: String,
    pub data: E,
    pub source: NodeIndex,
    pub target: NodeIndex,
    alive: bool,
}

/// Directed multigraph with named nodes and edges.
#[derive(Debug, Clone)]
pub struct Graph<N, E> {
    nodes: Vec<GraphNode<N>>,
    edges: Vec<GraphEdge<E>>,
    node_names: BTreeMap<String, NodeIndex>,
    edge_names: BTreeMap<String, EdgeIndex>,
    free_nodes: Vec<NodeIndex>,
    free_edges: Vec<EdgeIndex>,
}

impl<N, E> Default for Graph<N, E> {
    fn default() -> Self {
        Graph {
            nodes: Vec::new(),
            edges: Vec::new(),
            node_names: BTreeMap::new(),
            edge_names: BTreeMap::new(),
            free_nodes: Vec::new(),
            free_edges: Vec::new(),
        }
    }
}

impl<N, E> Graph<N, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an isolated node. The name must be unique.
    pub fn add_node(&mut self, name: impl Into<String>, data: N) -> Result<NodeIndex> {
        let name = name.into();
        if self.node_names.contains_key(&name) {
            error!("node is already in graph: {}", name);
            return Err(GraphError::DuplicateNode(name));
        }

        let slot = GraphNode {
            name: name.clone(),
            data,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            alive: true,
        };
        let index = match self.free_nodes.pop() {
            Some(index) => {
                self.nodes[index.0 as usize] = slot;
                index
            }
            None => {
                let index = NodeIndex(self.nodes.len() as u32);
                self.nodes.push(slot);
                index
            }
        };
        self.node_names.insert(name, index);
        Ok(index)
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.node_names.contains_key(name)
    }

    pub fn node_index(&self, name: &str) -> Option<NodeIndex> {
        self.node_names.get(name).copied()
    }

    /// Returns the node slot for a live index.
    pub fn node(&self, index: NodeIndex) -> &GraphNode<N> {
        let node = &self.nodes[index.0 as usize];
        debug_assert!(node.alive);
        node
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut GraphNode<N> {
        let node = &mut self.nodes[index.0 as usize];
        debug_assert!(node.alive);
        node
    }

    pub fn get_node(&self, name: &str) -> Result<&GraphNode<N>> {
        self.node_index(name)
            .map(|ix| self.node(ix))
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    pub fn get_node_mut(&mut self, name: &str) -> Result<&mut GraphNode<N>> {
        match self.node_index(name) {
            Some(ix) => Ok(self.node_mut(ix)),
            None => Err(GraphError::UnknownNode(name.to_string())),
        }
    }

    /// Adds an edge between two live nodes. The name must be unique.
    pub fn add_edge(
        &mut self,
        name: impl Into<String>,
        source: NodeIndex,
        target: NodeIndex,
        data: E,
    ) -> Result<EdgeIndex> {
        let name = name.into();
        if self.edge_names.contains_key(&name) {
            error!("edge is already in graph: {}", name);
            return Err(GraphError::DuplicateEdge(name));
        }

        let slot = GraphEdge { name: name.clone(), data, source, target, alive: true };
        let index = match self.free_edges.pop() {
            Some(index) => {
                self.edges[index.0 as usize] = slot;
                index
            }
            None => {
                let index = EdgeIndex(self.edges.len() as u32);
                self.edges.push(slot);
                index
            }
        };
        self.edge_names.insert(name, index);
        self.nodes[source.0 as usize].out_edges.push(index);
        self.nodes[target.0 as usize].in_edges.push(index);
        Ok(index)
    }

    /// Adds an edge, resolving the endpoints by name.
    pub fn add_edge_between(
        &mut self,
        name: impl Into<String>,
        source: &str,
        target: &str,
        data: E,
    ) -> Result<EdgeIndex> {
        let source = self
            .node_index(source)
            .ok_or_else(|| GraphError::UnknownNode(source.to_string()))?;
        let target = self
            .node_index(target)
            .ok_or_else(|| GraphError::UnknownNode(target.to_string()))?;
        self.add_edge(name, source, target, data)
    }

    pub fn has_edge(&self, name: &str) -> bool {
        self.edge_names.contains_key(name)
    }

    pub fn edge_index(&self, name: &str) -> Option<EdgeIndex> {
        self.edge_names.get(name).copied()
    }

    pub fn edge(&self, index: EdgeIndex) -> &GraphEdge<E> {
        let edge = &self.edges[index.0 as usize];
        debug_assert!(edge.alive);
        edge
    }

    pub fn edge_mut(&mut self, index: EdgeIndex) -> &mut GraphEdge<E> {
        let edge = &mut self.edges[index.0 as usize];
        debug_assert!(edge.alive);
        edge
    }

    pub fn get_edge(&self, name: &str) -> Result<&GraphEdge<E>> {
        self.edge_index(name)
            .map(|ix| self.edge(ix))
            .ok_or_else(|| GraphError::UnknownEdge(name.to_string()))
    }

    pub fn get_edge_mut(&mut self, name: &str) -> Result<&mut GraphEdge<E>> {
        match self.edge_index(name) {
            Some(ix) => Ok(self.edge_mut(ix)),
            None => Err(GraphError::UnknownEdge(name.to_string())),
        }
    }

    /// Removes an edge and unlinks it from both endpoint incidence lists.
    pub fn remove_edge(&mut self, index: EdgeIndex) -> Result<()> {
        let slot = &mut self.edges[index.0 as usize];
        if !slot.alive {
            return Err(GraphError::UnknownEdge(format!("#{}", index.0)));
        }
        slot.alive = false;
        let (name, source, target) = (slot.name.clone(), slot.source, slot.target);

        self.nodes[source.0 as usize].out_edges.retain(|&e| e != index);
        self.nodes[target.0 as usize].in_edges.retain(|&e| e != index);
        self.edge_names.remove(&name);
        self.free_edges.push(index);
        Ok(())
    }

    pub fn remove_edge_by_name(&mut self, name: &str) -> Result<()> {
        let index = self
            .edge_index(name)
            .ok_or_else(|| GraphError::UnknownEdge(name.to_string()))?;
        self.remove_edge(index)
    }

    /// Removes a node together with every incident edge.
    pub fn remove_node(&mut self, index: NodeIndex) -> Result<()> {
        if !self.nodes[index.0 as usize].alive {
            return Err(GraphError::UnknownNode(format!("#{}", index.0)));
        }

        let incident: Vec<EdgeIndex> = {
            let node = &self.nodes[index.0 as usize];
            node.out_edges.iter().chain(node.in_edges.iter()).copied().collect()
        };
        for edge in incident {
            // self-loops appear in both lists but may only be removed once
            if self.edges[edge.0 as usize].alive {
                self.remove_edge(edge)?;
            }
        }

        let slot = &mut self.nodes[index.0 as usize];
        slot.alive = false;
        let name = slot.name.clone();
        self.node_names.remove(&name);
        self.free_nodes.push(index);
        Ok(())
    }

    pub fn remove_node_by_name(&mut self, name: &str) -> Result<()> {
        let index = self
            .node_index(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        self.remove_node(index)
    }

    /// Number of edges.
    pub fn size(&self) -> usize {
        self.edge_names.len()
    }

    /// Number of nodes.
    pub fn order(&self) -> usize {
        self.node_names.len()
    }

    /// True if the graph contains no edges.
    pub fn is_empty(&self) -> bool {
        self.edge_names.is_empty()
    }

    /// True if the graph contains no nodes.
    pub fn is_null(&self) -> bool {
        self.node_names.is_empty()
    }

    /// Iterates live nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode<N>)> {
        self.node_names.values().map(move |&ix| (ix, self.node(ix)))
    }

    /// Iterates live edges in name order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeIndex, &GraphEdge<E>)> {
        self.edge_names.values().map(move |&ix| (ix, self.edge(ix)))
    }

    /// Names of live edges, in order.
    pub fn edge_names(&self) -> impl Iterator<Item = &str> {
        self.edge_names.keys().map(String::as_str)
    }

    /// Names of live nodes, in order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.node_names.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Graph<(), ()> {
        let mut g = Graph::new();
        let a = g.add_node("A", ()).unwrap();
        let b = g.add_node("B", ()).unwrap();
        let c = g.add_node("C", ()).unwrap();
        g.add_edge("ab", a, b, ()).unwrap();
        g.add_edge("bc", b, c, ()).unwrap();
        g.add_edge("ac", a, c, ()).unwrap();
        g
    }

    #[test]
    fn test_size_and_order() {
        let g = diamond();
        assert_eq!(g.order(), 3);
        assert_eq!(g.size(), 3);
        assert!(!g.is_empty());
        assert!(!g.is_null());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut g = diamond();
        assert!(matches!(g.add_node("A", ()), Err(GraphError::DuplicateNode(_))));
        let a = g.node_index("A").unwrap();
        let b = g.node_index("B").unwrap();
        assert!(matches!(g.add_edge("ab", a, b, ()), Err(GraphError::DuplicateEdge(_))));
    }

    #[test]
    fn test_remove_node_removes_incident_edges() {
        let mut g = diamond();
        let b = g.node_index("B").unwrap();
        g.remove_node(b).unwrap();
        assert_eq!(g.order(), 2);
        assert_eq!(g.size(), 1);
        assert!(g.has_edge("ac"));
        assert!(!g.has_edge("ab"));
        assert!(!g.has_edge("bc"));
        // incidence lists of the surviving nodes only reference live edges
        for (_, node) in g.nodes() {
            for &e in node.in_edges.iter().chain(node.out_edges.iter()) {
                assert!(g.edge_names().any(|n| n == g.edge(e).name));
            }
        }
    }

    #[test]
    fn test_multigraph_parallel_edges() {
        let mut g = diamond();
        let a = g.node_index("A").unwrap();
        let b = g.node_index("B").unwrap();
        g.add_edge("ab2", a, b, ()).unwrap();
        assert_eq!(g.size(), 4);
        assert_eq!(g.node(a).out_edges.len(), 3);
    }

    #[test]
    fn test_slot_reuse_keeps_names_consistent() {
        let mut g = diamond();
        g.remove_edge_by_name("ab").unwrap();
        let a = g.node_index("A").unwrap();
        let b = g.node_index("B").unwrap();
        let e = g.add_edge("ab-new", a, b, ()).unwrap();
        assert_eq!(g.edge(e).name, "ab-new");
        assert_eq!(g.size(), 3);
    }

    #[test]
    fn test_self_loop_removal() {
        let mut g: Graph<(), ()> = Graph::new();
        let a = g.add_node("A", ()).unwrap();
        g.add_edge("loop", a, a, ()).unwrap();
        g.remove_node(a).unwrap();
        assert_eq!(g.size(), 0);
        assert_eq!(g.order(), 0);
    }
}
