// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
UTQL subgraph data structure.

A subgraph is a typed directed graph split into an input and an output
section. Input nodes and edges carry predicates to be matched against the
world SRG; output nodes and edges carry attribute expressions that are
evaluated when the subgraph is instantiated. The dataflow configuration
blob is opaque to the core and preserved byte-for-byte.
*/

use serde::Serialize;

use crate::attribute_value::AttributeValue;
use crate::attributes::KeyValueAttributes;
use crate::error::{GraphError, Result};
use crate::expression::AttributeExpression;
use crate::graph::{EdgeIndex, Graph, NodeIndex};
use crate::predicate::Predicate;

/// Whether a node or edge belongs to the input or the output section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SectionTag {
    Input,
    Output,
}

/// Reference `(subgraph id, local edge name)` to the producer of an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EdgeReference {
    id: String,
    name: String,
}

impl EdgeReference {
    pub fn new(subgraph_id: impl Into<String>, edge_name: impl Into<String>) -> Result<Self> {
        let (id, name) = (subgraph_id.into(), edge_name.into());
        if id.is_empty() || name.is_empty() {
            return Err(GraphError::BadEdgeReference(format!("{}:{}", id, name)));
        }
        Ok(EdgeReference { id, name })
    }

    pub fn subgraph_id(&self) -> &str {
        &self.id
    }

    pub fn edge_name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty() || self.name.is_empty()
    }

    /// The name of the referenced edge in the world SRG.
    pub fn qualified_edge_name(&self) -> String {
        format!("{}:{}", self.id, self.name)
    }
}

/// Payload of a subgraph node.
#[derive(Debug, Clone)]
pub struct SubgraphNode {
    pub tag: SectionTag,
    pub attributes: KeyValueAttributes,
    pub predicates: Vec<Predicate>,
    pub expressions: Vec<(String, AttributeExpression)>,
    /// Global node id; set on output nodes of registrations and filled in
    /// when a pattern is instantiated.
    pub qualified_name: String,
}

impl SubgraphNode {
    pub fn new(tag: SectionTag) -> Self {
        SubgraphNode {
            tag,
            attributes: KeyValueAttributes::new(),
            predicates: Vec::new(),
            expressions: Vec::new(),
            qualified_name: String::new(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.tag == SectionTag::Input
    }

    pub fn is_output(&self) -> bool {
        self.tag == SectionTag::Output
    }
}

/// Payload of a subgraph edge.
#[derive(Debug, Clone)]
pub struct SubgraphEdge {
    pub tag: SectionTag,
    pub attributes: KeyValueAttributes,
    pub predicates: Vec<Predicate>,
    pub expressions: Vec<(String, AttributeExpression)>,
    /// Producer reference; set on input edges of instantiated patterns.
    pub edge_reference: EdgeReference,
    /// Provenance carried on the edges of instantiated subgraphs.
    pub information_sources: std::collections::BTreeSet<String>,
}

impl SubgraphEdge {
    pub fn new(tag: SectionTag) -> Self {
        SubgraphEdge {
            tag,
            attributes: KeyValueAttributes::new(),
            predicates: Vec::new(),
            expressions: Vec::new(),
            edge_reference: EdgeReference::default(),
            information_sources: std::collections::BTreeSet::new(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.tag == SectionTag::Input
    }

    pub fn is_output(&self) -> bool {
        self.tag == SectionTag::Output
    }
}

/// A UTQL subgraph: pattern, query or base registration.
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    pub id: String,
    pub name: String,
    pub graph: Graph<SubgraphNode, SubgraphEdge>,

    /// Accept only the best matching instead of all of them.
    pub only_best_edge_match: bool,
    /// Expression minimized when selecting the best matching.
    pub best_match_expression: Option<AttributeExpression>,

    /// Opaque component configuration, preserved byte-for-byte.
    pub dataflow_configuration: AttributeValue,
    pub dataflow_attributes: KeyValueAttributes,
    /// Component class selected by the configuration blob.
    pub dataflow_class: String,
}

impl Subgraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Subgraph { id: id.into(), name: name.into(), ..Default::default() }
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: SubgraphNode) -> Result<NodeIndex> {
        self.graph.add_node(name, node)
    }

    pub fn add_edge(
        &mut self,
        name: impl Into<String>,
        source: &str,
        target: &str,
        edge: SubgraphEdge,
    ) -> Result<EdgeIndex> {
        self.graph.add_edge_between(name, source, target, edge)
    }

    /// Iterates input edges in name order.
    pub fn input_edges(&self) -> impl Iterator<Item = (EdgeIndex, &crate::graph::GraphEdge<SubgraphEdge>)> {
        self.graph.edges().filter(|(_, e)| e.data.is_input())
    }

    /// Iterates output edges in name order.
    pub fn output_edges(&self) -> impl Iterator<Item = (EdgeIndex, &crate::graph::GraphEdge<SubgraphEdge>)> {
        self.graph.edges().filter(|(_, e)| e.data.is_output())
    }

    pub fn output_edge_count(&self) -> usize {
        self.output_edges().count()
    }

    /// True if any node or edge is in the input section.
    pub fn has_input(&self) -> bool {
        self.graph.nodes().any(|(_, n)| n.data.is_input())
            || self.graph.edges().any(|(_, e)| e.data.is_input())
    }

    /// True if any node or edge is in the output section.
    pub fn has_output(&self) -> bool {
        self.graph.nodes().any(|(_, n)| n.data.is_output())
            || self.graph.edges().any(|(_, e)| e.data.is_output())
    }

    /// True if the subgraph has no nodes at all (a deletion marker).
    pub fn is_null(&self) -> bool {
        self.graph.is_null()
    }
}

/// The role a subgraph plays when announced to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubgraphRole {
    /// Outputs only: a base SRG registration.
    Registration,
    /// Inputs and outputs: a pattern.
    Pattern,
    /// Inputs only: a query.
    Query,
    /// Neither: a deletion marker.
    Deletion,
}

impl Subgraph {
    /// Classifies the subgraph by its sections.
    pub fn role(&self) -> SubgraphRole {
        match (self.has_input(), self.has_output()) {
            (false, true) => SubgraphRole::Registration,
            (true, true) => SubgraphRole::Pattern,
            (true, false) => SubgraphRole::Query,
            (false, false) => SubgraphRole::Deletion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_classification() {
        let mut registration = Subgraph::new("base1", "tracker");
        registration.add_node("A", SubgraphNode::new(SectionTag::Output)).unwrap();
        registration.add_node("B", SubgraphNode::new(SectionTag::Output)).unwrap();
        registration.add_edge("AB", "A", "B", SubgraphEdge::new(SectionTag::Output)).unwrap();
        assert_eq!(registration.role(), SubgraphRole::Registration);

        let mut query = Subgraph::new("q1", "where");
        query.add_node("A", SubgraphNode::new(SectionTag::Input)).unwrap();
        assert_eq!(query.role(), SubgraphRole::Query);

        let mut pattern = Subgraph::new("p1", "concat");
        pattern.add_node("A", SubgraphNode::new(SectionTag::Input)).unwrap();
        pattern.add_node("B", SubgraphNode::new(SectionTag::Output)).unwrap();
        assert_eq!(pattern.role(), SubgraphRole::Pattern);

        assert_eq!(Subgraph::new("d", "x").role(), SubgraphRole::Deletion);
    }

    #[test]
    fn test_edge_reference() {
        let r = EdgeReference::new("pose1", "AB").unwrap();
        assert_eq!(r.qualified_edge_name(), "pose1:AB");
        assert!(EdgeReference::new("", "AB").is_err());
        assert!(EdgeReference::default().is_empty());
    }

    #[test]
    fn test_edges_require_existing_nodes() {
        let mut s = Subgraph::new("s", "s");
        s.add_node("A", SubgraphNode::new(SectionTag::Output)).unwrap();
        assert!(s.add_edge("AB", "A", "B", SubgraphEdge::new(SectionTag::Output)).is_err());
    }
}
