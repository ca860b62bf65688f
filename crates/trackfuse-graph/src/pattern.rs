// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Pattern records and search plans.

A pattern record wraps a parsed subgraph together with a precomputed
search plan: the order in which the matcher binds input edges and nodes.
The plan starts from the most selective anchor available (an input node
pinned by an `id == ...` predicate, else any input node with predicates,
else the first input edge) and then walks connected input edges so that at
most the first step has to scan the whole SRG.
*/

use std::sync::Arc;

use crate::graph::{EdgeIndex, NodeIndex};
use crate::subgraph::Subgraph;

/// One step of a search plan.
#[derive(Debug, Clone)]
pub enum PlanStep {
    /// Bind this input edge to a compatible SRG edge.
    Edge(EdgeIndex),
    /// Check or bind this input node, optionally pinned to a known id.
    Node {
        node: NodeIndex,
        required_id: Option<String>,
    },
}

/// A registered pattern or query with its search plan.
#[derive(Debug, Clone)]
pub struct PatternRecord {
    pub name: String,
    pub client_id: String,
    pub graph: Arc<Subgraph>,
    pub plan: Vec<PlanStep>,
}

impl PatternRecord {
    pub fn new(graph: Arc<Subgraph>, client_id: impl Into<String>) -> Self {
        let plan = build_search_plan(&graph);
        PatternRecord {
            name: graph.name.clone(),
            client_id: client_id.into(),
            graph,
            plan,
        }
    }
}

fn build_search_plan(subgraph: &Subgraph) -> Vec<PlanStep> {
    let graph = &subgraph.graph;
    if graph.is_null() {
        return Vec::new();
    }

    let mut plan = Vec::new();
    let mut node_stack: Vec<NodeIndex> = Vec::new();
    let mut matched_edges: Vec<EdgeIndex> = Vec::new();
    let mut matched_nodes: Vec<NodeIndex> = Vec::new();

    // prefer an input node pinned by an id equality predicate
    let mut first_predicate_node = None;
    for (ix, node) in graph.nodes() {
        if !node.data.is_input() || node.data.predicates.is_empty() {
            continue;
        }
        if first_predicate_node.is_none() {
            first_predicate_node = Some(ix);
        }
        let pinned_id = node.data.predicates.first().and_then(|p| {
            p.conjunctive_equalities()
                .into_iter()
                .find(|(attr, _)| attr == "id")
                .map(|(_, id)| id)
        });
        if let Some(id) = pinned_id {
            plan.push(PlanStep::Node { node: ix, required_id: Some(id) });
            matched_nodes.push(ix);
            node_stack.push(ix);
            break;
        }
    }

    if node_stack.is_empty() {
        if let Some(ix) = first_predicate_node {
            // no id-pinned node: anchor at any node with predicates
            plan.push(PlanStep::Node { node: ix, required_id: None });
            matched_nodes.push(ix);
            node_stack.push(ix);
        } else if let Some((ix, edge)) = graph.edges().find(|(_, e)| e.data.is_input()) {
            // no predicates anywhere: anchor at the first input edge
            plan.push(PlanStep::Edge(ix));
            matched_edges.push(ix);
            node_stack.push(edge.source);
            matched_nodes.push(edge.source);
            node_stack.push(edge.target);
            matched_nodes.push(edge.target);
        }
    }

    // walk connected input edges; restart on the next unmatched input node
    // when the input section has several components
    loop {
        while let Some(node_ix) = node_stack.pop() {
            let incident: Vec<EdgeIndex> = {
                let node = graph.node(node_ix);
                node.out_edges.iter().chain(node.in_edges.iter()).copied().collect()
            };
            for edge_ix in incident {
                let edge = graph.edge(edge_ix);
                if !edge.data.is_input() || matched_edges.contains(&edge_ix) {
                    continue;
                }
                plan.push(PlanStep::Edge(edge_ix));
                matched_edges.push(edge_ix);

                let other = if edge.source == node_ix { edge.target } else { edge.source };
                if !matched_nodes.contains(&other) {
                    // nodes only appear in the plan when they carry
                    // predicates that must be checked
                    if !graph.node(other).data.predicates.is_empty() {
                        plan.push(PlanStep::Node { node: other, required_id: None });
                    }
                    matched_nodes.push(other);
                    node_stack.push(other);
                }
            }
        }

        let next = graph
            .nodes()
            .find(|(ix, node)| node.data.is_input() && !matched_nodes.contains(ix))
            .map(|(ix, _)| ix);
        match next {
            Some(ix) => {
                plan.push(PlanStep::Node { node: ix, required_id: None });
                matched_nodes.push(ix);
                node_stack.push(ix);
            }
            None => break,
        }
    }

    plan
}
