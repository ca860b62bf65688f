// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Pattern matcher.

Enumerates every injective embedding of a pattern's input section into the
SRG that satisfies all node and edge predicates. The search is an
iterative depth-first traversal over an explicit stack of partial
matchings, driven by the pattern's search plan. Predicate evaluation
failures on a candidate are treated as "does not match".
*/

use tracing::trace;

use crate::context::EvaluationContext;
use crate::graph::{EdgeIndex, NodeIndex};
use crate::matching::EdgeMatching;
use crate::pattern::{PatternRecord, PlanStep};
use crate::srg::Srg;
use crate::subgraph::Subgraph;

/// Finds all complete matchings of `pattern` in `srg`.
pub fn check_pattern(pattern: &PatternRecord, srg: &Srg) -> Vec<EdgeMatching> {
    let mut matches = Vec::new();
    let mut stack = vec![EdgeMatching::new()];

    while let Some(mut state) = stack.pop() {
        let step = state.plan_step;
        state.plan_step += 1;

        if step == pattern.plan.len() {
            trace!(pattern = %pattern.name, "complete matching found");
            matches.push(state);
            continue;
        }

        match &pattern.plan[step] {
            PlanStep::Edge(edge_ix) => {
                expand_edge_step(pattern, srg, &state, *edge_ix, &mut stack);
            }
            PlanStep::Node { node, required_id } => {
                expand_node_step(pattern, srg, state, *node, required_id.as_deref(), &mut stack);
            }
        }
    }

    matches
}

fn expand_edge_step(
    pattern: &PatternRecord,
    srg: &Srg,
    state: &EdgeMatching,
    edge_ix: EdgeIndex,
    stack: &mut Vec<EdgeMatching>,
) {
    let pattern_edge = pattern.graph.graph.edge(edge_ix);
    let (p_source, p_target) = (pattern_edge.source, pattern_edge.target);
    let source_bound = state.srg_node(p_source);
    let target_bound = state.srg_node(p_target);

    let mut try_candidate = |candidate: EdgeIndex| {
        if state.is_srg_edge_matched(candidate) {
            return;
        }
        let srg_edge = srg.edge(candidate);
        if !state.is_node_pair_compatible(p_source, srg_edge.source)
            || !state.is_node_pair_compatible(p_target, srg_edge.target)
        {
            return;
        }
        if !edge_compatible(&pattern.graph, edge_ix, srg, candidate) {
            return;
        }
        let mut next = state.clone();
        next.add_matched_edge(
            edge_ix,
            p_source,
            p_target,
            candidate,
            srg_edge.source,
            srg_edge.target,
        );
        stack.push(next);
    };

    match (source_bound, target_bound) {
        (Some(srg_source), _) => {
            // walk the out-edges of the bound source node
            for &candidate in &srg.node(srg_source).out_edges {
                try_candidate(candidate);
            }
        }
        (None, Some(srg_target)) => {
            for &candidate in &srg.node(srg_target).in_edges {
                try_candidate(candidate);
            }
        }
        (None, None) => {
            // nothing bound yet: scan all SRG edges whose endpoints are
            // still free
            for (candidate, srg_edge) in srg.edges() {
                if state.is_srg_node_matched(srg_edge.source)
                    || state.is_srg_node_matched(srg_edge.target)
                {
                    continue;
                }
                try_candidate(candidate);
            }
        }
    }
}

fn expand_node_step(
    pattern: &PatternRecord,
    srg: &Srg,
    state: EdgeMatching,
    node_ix: NodeIndex,
    required_id: Option<&str>,
    stack: &mut Vec<EdgeMatching>,
) {
    if let Some(bound) = state.srg_node(node_ix) {
        // already bound through an edge: re-check the predicates only
        if node_compatible(&pattern.graph, node_ix, srg, bound) {
            stack.push(state);
        }
        return;
    }

    match required_id {
        Some(id) => {
            if let Some(candidate) = srg.node_index(id) {
                if state.is_srg_node_matched(candidate) {
                    return;
                }
                let mut next = state;
                next.add_matched_node(node_ix, candidate);
                stack.push(next);
            }
        }
        None => {
            for (candidate, _) in srg.nodes() {
                if state.is_srg_node_matched(candidate) {
                    continue;
                }
                if !node_compatible(&pattern.graph, node_ix, srg, candidate) {
                    continue;
                }
                let mut next = state.clone();
                next.add_matched_node(node_ix, candidate);
                stack.push(next);
            }
        }
    }
}

/// Evaluates every predicate of a pattern node on an SRG node candidate.
fn node_compatible(pattern: &Subgraph, node_ix: NodeIndex, srg: &Srg, candidate: NodeIndex) -> bool {
    let predicates = &pattern.graph.node(node_ix).data.predicates;
    let data = &srg.node(candidate).data;
    let ctx = EvaluationContext::local_attributes(&data.attributes);
    predicates.iter().all(|p| p.evaluate(&ctx).unwrap_or(false))
}

/// Evaluates every predicate of a pattern edge on an SRG edge candidate.
fn edge_compatible(pattern: &Subgraph, edge_ix: EdgeIndex, srg: &Srg, candidate: EdgeIndex) -> bool {
    let predicates = &pattern.graph.edge(edge_ix).data.predicates;
    let data = &srg.edge(candidate).data;
    let ctx = EvaluationContext::local(&data.attributes, &data.information_sources);
    predicates.iter().all(|p| p.evaluate(&ctx).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::KeyValueAttributes;
    use crate::parser::parse_predicate;
    use crate::srg::SrgEdge;
    use crate::subgraph::{SectionTag, SubgraphEdge, SubgraphNode};
    use std::sync::Arc;

    fn srg_with_chain() -> Srg {
        // A -> B -> C plus a parallel A -> B of a different type
        let mut srg = Srg::new();
        let mut node = SubgraphNode::new(SectionTag::Output);
        for id in ["A", "B", "C"] {
            node.qualified_name = id.to_string();
            srg.add_node(&node, "base", id).unwrap();
        }
        let a = srg.node_index("A").unwrap();
        let b = srg.node_index("B").unwrap();
        let c = srg.node_index("C").unwrap();

        let mut attrs_6d = KeyValueAttributes::new();
        attrs_6d.set("type", "6D".into());
        let mut attrs_3d = KeyValueAttributes::new();
        attrs_3d.set("type", "3D".into());

        srg.add_edge("base:AB", a, b, SrgEdge::new(attrs_6d.clone(), "base", "AB")).unwrap();
        srg.add_edge("base:AB2", a, b, SrgEdge::new(attrs_3d, "base", "AB2")).unwrap();
        srg.add_edge("base:BC", b, c, SrgEdge::new(attrs_6d, "base", "BC")).unwrap();
        srg
    }

    fn edge_pattern(predicate: Option<&str>) -> PatternRecord {
        let mut s = Subgraph::new("p", "p");
        s.add_node("X", SubgraphNode::new(SectionTag::Input)).unwrap();
        s.add_node("Y", SubgraphNode::new(SectionTag::Input)).unwrap();
        let mut e = SubgraphEdge::new(SectionTag::Input);
        if let Some(p) = predicate {
            e.predicates.push(parse_predicate(p).unwrap());
        }
        s.add_edge("XY", "X", "Y", e).unwrap();
        PatternRecord::new(Arc::new(s), "client")
    }

    #[test]
    fn test_single_edge_matches_all_edges() {
        let srg = srg_with_chain();
        let matches = check_pattern(&edge_pattern(None), &srg);
        assert_eq!(matches.len(), 3);
    }

    #[test]
    fn test_edge_predicate_filters() {
        let srg = srg_with_chain();
        let matches = check_pattern(&edge_pattern(Some("type == '6D'")), &srg);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_two_edge_chain_is_injective() {
        // X -> Y -> Z must bind two distinct edges sharing the middle node
        let mut s = Subgraph::new("p", "p");
        for n in ["X", "Y", "Z"] {
            s.add_node(n, SubgraphNode::new(SectionTag::Input)).unwrap();
        }
        s.add_edge("XY", "X", "Y", SubgraphEdge::new(SectionTag::Input)).unwrap();
        s.add_edge("YZ", "Y", "Z", SubgraphEdge::new(SectionTag::Input)).unwrap();
        let pattern = PatternRecord::new(Arc::new(s), "client");

        let srg = srg_with_chain();
        let matches = check_pattern(&pattern, &srg);
        // only A->B->C (via either AB edge) works; A->B cannot be reused
        assert_eq!(matches.len(), 2);
        for m in &matches {
            let bound: Vec<_> = m.matched_edges().map(|(_, f)| f).collect();
            assert_eq!(bound.len(), 2);
            assert_ne!(bound[0], bound[1]);
        }
    }

    #[test]
    fn test_node_id_pin() {
        let mut s = Subgraph::new("p", "p");
        let mut x = SubgraphNode::new(SectionTag::Input);
        x.predicates.push(parse_predicate("id == 'B'").unwrap());
        s.add_node("X", x).unwrap();
        s.add_node("Y", SubgraphNode::new(SectionTag::Input)).unwrap();
        s.add_edge("XY", "X", "Y", SubgraphEdge::new(SectionTag::Input)).unwrap();
        let pattern = PatternRecord::new(Arc::new(s), "client");

        let srg = srg_with_chain();
        let matches = check_pattern(&pattern, &srg);
        // anchored at B, only B -> C remains
        assert_eq!(matches.len(), 1);
        let (_, f) = matches[0].matched_edges().next().unwrap();
        assert_eq!(srg.edge(f).name, "base:BC");
    }

    #[test]
    fn test_no_match_on_missing_structure() {
        // a 2-cycle pattern has no embedding in the chain
        let mut s = Subgraph::new("p", "p");
        s.add_node("X", SubgraphNode::new(SectionTag::Input)).unwrap();
        s.add_node("Y", SubgraphNode::new(SectionTag::Input)).unwrap();
        s.add_edge("XY", "X", "Y", SubgraphEdge::new(SectionTag::Input)).unwrap();
        s.add_edge("YX", "Y", "X", SubgraphEdge::new(SectionTag::Input)).unwrap();
        let pattern = PatternRecord::new(Arc::new(s), "client");
        let srg = srg_with_chain();
        assert!(check_pattern(&pattern, &srg).is_empty());
    }
}
