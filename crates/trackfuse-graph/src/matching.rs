// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Bidirectional correspondence between a pattern and the SRG.

A matching is injective on both edges and nodes. Node correspondences are
reference-counted by the number of matched edges that force them, so that
backtracking can release a node exactly when its last edge goes away.
*/

use std::collections::{BTreeMap, BTreeSet};

use crate::attributes::KeyValueAttributes;
use crate::context::InputBinding;
use crate::graph::{EdgeIndex, NodeIndex};

/// One side of a node correspondence plus its association count.
#[derive(Debug, Clone, Copy)]
struct NodeBinding {
    correspondence: NodeIndex,
    association_count: u32,
}

/// A partial or complete embedding of a pattern into the SRG.
#[derive(Debug, Clone, Default)]
pub struct EdgeMatching {
    edge_forward: BTreeMap<EdgeIndex, EdgeIndex>,
    edge_backward: BTreeMap<EdgeIndex, EdgeIndex>,
    node_forward: BTreeMap<NodeIndex, NodeBinding>,
    node_backward: BTreeMap<NodeIndex, NodeBinding>,

    /// Output edge attributes after expression expansion, by local name.
    pub expanded_edge_attributes: BTreeMap<String, KeyValueAttributes>,
    /// Output node attributes after expression expansion, by local name.
    pub expanded_node_attributes: BTreeMap<String, KeyValueAttributes>,
    /// Attributes and provenance of every matched input, by local name.
    /// Feeds global predicate and expression evaluation.
    pub all_input_attributes: BTreeMap<String, InputBinding>,
    /// Union of the information sources of all matched input edges.
    pub information_sources: BTreeSet<String>,
    /// Current index into the pattern's search plan.
    pub plan_step: usize,
}

impl EdgeMatching {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the correspondence of pattern edge `e` (with endpoints
    /// `e_source -> e_target`) to SRG edge `f` (`f_source -> f_target`).
    pub fn add_matched_edge(
        &mut self,
        e: EdgeIndex,
        e_source: NodeIndex,
        e_target: NodeIndex,
        f: EdgeIndex,
        f_source: NodeIndex,
        f_target: NodeIndex,
    ) {
        debug_assert!(!self.is_pattern_edge_matched(e));
        debug_assert!(!self.is_srg_edge_matched(f));
        debug_assert!(self.is_node_pair_compatible(e_source, f_source));
        debug_assert!(self.is_node_pair_compatible(e_target, f_target));

        self.edge_forward.insert(e, f);
        self.edge_backward.insert(f, e);
        Self::bind(&mut self.node_forward, e_source, f_source);
        Self::bind(&mut self.node_forward, e_target, f_target);
        Self::bind(&mut self.node_backward, f_source, e_source);
        Self::bind(&mut self.node_backward, f_target, e_target);
    }

    /// Records a direct node correspondence (search-plan node step).
    pub fn add_matched_node(&mut self, u: NodeIndex, v: NodeIndex) {
        debug_assert!(self.is_node_pair_compatible(u, v));
        Self::bind(&mut self.node_forward, u, v);
        Self::bind(&mut self.node_backward, v, u);
    }

    fn bind(map: &mut BTreeMap<NodeIndex, NodeBinding>, key: NodeIndex, value: NodeIndex) {
        map.entry(key)
            .and_modify(|b| b.association_count += 1)
            .or_insert(NodeBinding { correspondence: value, association_count: 1 });
    }

    pub fn is_pattern_edge_matched(&self, e: EdgeIndex) -> bool {
        self.edge_forward.contains_key(&e)
    }

    pub fn is_srg_edge_matched(&self, f: EdgeIndex) -> bool {
        self.edge_backward.contains_key(&f)
    }

    pub fn is_pattern_node_matched(&self, u: NodeIndex) -> bool {
        self.node_forward.contains_key(&u)
    }

    pub fn is_srg_node_matched(&self, v: NodeIndex) -> bool {
        self.node_backward.contains_key(&v)
    }

    /// The SRG edge matched to a pattern edge.
    pub fn srg_edge(&self, e: EdgeIndex) -> Option<EdgeIndex> {
        self.edge_forward.get(&e).copied()
    }

    /// The pattern edge matched to an SRG edge.
    pub fn pattern_edge(&self, f: EdgeIndex) -> Option<EdgeIndex> {
        self.edge_backward.get(&f).copied()
    }

    /// The SRG node matched to a pattern node.
    pub fn srg_node(&self, u: NodeIndex) -> Option<NodeIndex> {
        self.node_forward.get(&u).map(|b| b.correspondence)
    }

    /// The pattern node matched to an SRG node.
    pub fn pattern_node(&self, v: NodeIndex) -> Option<NodeIndex> {
        self.node_backward.get(&v).map(|b| b.correspondence)
    }

    /// True if matching pattern node `u` to SRG node `v` would keep both
    /// maps injective.
    pub fn is_node_pair_compatible(&self, u: NodeIndex, v: NodeIndex) -> bool {
        if let Some(binding) = self.node_forward.get(&u) {
            return binding.correspondence == v;
        }
        // u unmatched: v must not already be claimed by another node
        !self.node_backward.contains_key(&v)
    }

    /// Number of matched edges.
    pub fn matched_edge_count(&self) -> usize {
        self.edge_forward.len()
    }

    /// Iterates `(pattern edge, SRG edge)` pairs.
    pub fn matched_edges(&self) -> impl Iterator<Item = (EdgeIndex, EdgeIndex)> + '_ {
        self.edge_forward.iter().map(|(&e, &f)| (e, f))
    }

    /// Iterates `(pattern node, SRG node)` pairs.
    pub fn matched_nodes(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.node_forward.iter().map(|(&u, b)| (u, b.correspondence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: u32) -> NodeIndex {
        NodeIndex(i)
    }

    fn e(i: u32) -> EdgeIndex {
        EdgeIndex(i)
    }

    #[test]
    fn test_edge_match_binds_nodes() {
        let mut m = EdgeMatching::new();
        m.add_matched_edge(e(0), n(0), n(1), e(10), n(10), n(11));
        assert_eq!(m.srg_edge(e(0)), Some(e(10)));
        assert_eq!(m.pattern_edge(e(10)), Some(e(0)));
        assert_eq!(m.srg_node(n(0)), Some(n(10)));
        assert_eq!(m.pattern_node(n(11)), Some(n(1)));
    }

    #[test]
    fn test_injectivity_checks() {
        let mut m = EdgeMatching::new();
        m.add_matched_node(n(0), n(10));
        // same pair is compatible, rebinding either side is not
        assert!(m.is_node_pair_compatible(n(0), n(10)));
        assert!(!m.is_node_pair_compatible(n(0), n(11)));
        assert!(!m.is_node_pair_compatible(n(1), n(10)));
        assert!(m.is_node_pair_compatible(n(1), n(11)));
    }

    #[test]
    fn test_association_counts_accumulate() {
        let mut m = EdgeMatching::new();
        // two edges sharing node 1 -> node 11
        m.add_matched_edge(e(0), n(0), n(1), e(10), n(10), n(11));
        m.add_matched_edge(e(1), n(1), n(2), e(11), n(11), n(12));
        assert_eq!(m.node_forward.get(&n(1)).unwrap().association_count, 2);
        assert_eq!(m.matched_edge_count(), 2);
    }
}
