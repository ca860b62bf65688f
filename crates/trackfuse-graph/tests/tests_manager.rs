//! End-to-end tests for SRG registration, pattern expansion, query
//! answering and transitive deletion.

use trackfuse_graph::parser::{parse_expression, parse_predicate};
use trackfuse_graph::subgraph::{SectionTag, Subgraph, SubgraphEdge, SubgraphNode};
use trackfuse_graph::{SourceRule, SrgManager};

fn output_node(id: &str) -> SubgraphNode {
    let mut n = SubgraphNode::new(SectionTag::Output);
    n.qualified_name = id.to_string();
    n.attributes.set("id", id.into());
    n
}

fn input_node() -> SubgraphNode {
    SubgraphNode::new(SectionTag::Input)
}

fn output_edge(attrs: &[(&str, &str)], expressions: &[(&str, &str)]) -> SubgraphEdge {
    let mut e = SubgraphEdge::new(SectionTag::Output);
    for (k, v) in attrs {
        e.attributes.set(*k, (*v).into());
    }
    for (k, expr) in expressions {
        e.expressions.push((k.to_string(), parse_expression(expr).unwrap()));
    }
    e
}

fn input_edge(predicate: Option<&str>) -> SubgraphEdge {
    let mut e = SubgraphEdge::new(SectionTag::Input);
    if let Some(p) = predicate {
        e.predicates.push(parse_predicate(p).unwrap());
    }
    e
}

/// One base registration with a single output edge between two nodes.
fn base_registration(id: &str, from: &str, to: &str, attrs: &[(&str, &str)]) -> Subgraph {
    let mut s = Subgraph::new(id, format!("{}-tracker", id));
    s.add_node(from, output_node(from)).unwrap();
    s.add_node(to, output_node(to)).unwrap();
    s.add_edge("AB", from, to, output_edge(attrs, &[])).unwrap();
    s
}

/// Pose concatenation: inputs X->Y, Y->Z, output X->Z.
fn concatenation_pattern(
    name: &str,
    out_attrs: &[(&str, &str)],
    out_exprs: &[(&str, &str)],
) -> Subgraph {
    let mut s = Subgraph::new(name, name);
    s.add_node("X", input_node()).unwrap();
    s.add_node("Y", input_node()).unwrap();
    s.add_node("Z", input_node()).unwrap();
    s.add_edge("XY", "X", "Y", input_edge(None)).unwrap();
    s.add_edge("YZ", "Y", "Z", input_edge(None)).unwrap();
    s.add_edge("XZ", "X", "Z", output_edge(out_attrs, out_exprs)).unwrap();
    s
}

#[test]
fn test_singleton_base_srg_and_query() {
    // S1: one base edge, then a query for it
    let mut manager = SrgManager::new();
    manager
        .register_srg(
            base_registration(
                "base1",
                "A",
                "B",
                &[("type", "6D"), ("latency", "10"), ("updateTime", "33")],
            ),
            "client1",
        )
        .unwrap();

    assert_eq!(manager.srg().order(), 2);
    assert_eq!(manager.srg().size(), 1);
    assert!(manager.srg().has_edge("base1:AB"));

    let edge = manager.srg().get_edge("base1:AB").unwrap();
    let sources: Vec<&str> = edge.data.information_sources.iter().map(|s| s.as_str()).collect();
    assert_eq!(sources, vec!["base1:AB"]);

    let mut query = Subgraph::new("q1", "whereIsB");
    query.add_node("A", input_node()).unwrap();
    query.add_node("B", input_node()).unwrap();
    query.add_edge("AB", "A", "B", input_edge(Some("type == '6D'"))).unwrap();
    manager.register_query(query, "client1");

    let responses = manager.process_queries();
    let client_responses = &responses["client1"];
    assert_eq!(client_responses.len(), 1);
    assert_eq!(client_responses[0].query_name, "whereIsB");
    // the solution consists of the query instance plus its producer
    assert_eq!(client_responses[0].graphs.len(), 2);

    let graphs = &client_responses[0].graphs[0];
    let references: Vec<String> = graphs
        .input_edges()
        .map(|(_, e)| e.data.edge_reference.qualified_edge_name())
        .collect();
    assert_eq!(references, vec!["base1:AB".to_string()]);
}

#[test]
fn test_pattern_expansion_reaches_fixed_point() {
    // S2: concatenation over two disjoint base edges
    let mut manager = SrgManager::new();
    manager
        .register_srg(base_registration("b1", "A", "B", &[("type", "6D")]), "c")
        .unwrap();
    manager
        .register_srg(base_registration("b2", "B", "C", &[("type", "6D")]), "c")
        .unwrap();
    manager
        .register_pattern(concatenation_pattern("concat", &[("type", "6D")], &[]), "c")
        .unwrap();

    let applied = manager.apply_all_patterns();
    assert_eq!(applied, 1, "exactly one concatenation instance");
    assert_eq!(manager.srg().size(), 3);

    // provenance closure: the derived edge carries the union of its inputs
    let derived = manager
        .srg()
        .edges()
        .find(|(_, e)| e.data.pattern_name == "concat")
        .map(|(_, e)| e.data.information_sources.clone())
        .expect("derived edge present");
    let expected: Vec<&str> = vec!["b1:AB", "b2:AB"];
    assert_eq!(derived.iter().map(|s| s.as_str()).collect::<Vec<_>>(), expected);

    // fixed point: nothing further to apply
    assert_eq!(manager.apply_all_patterns(), 0);
    assert_eq!(manager.srg().size(), 3);
}

#[test]
fn test_stage1_rejects_shared_sources() {
    // S3: inversion then identity must not produce a self edge
    let mut manager = SrgManager::new();
    manager
        .register_srg(base_registration("b1", "A", "B", &[("type", "6D")]), "c")
        .unwrap();

    // inversion: input X->Y, output Y->X
    let mut inversion = Subgraph::new("invert", "invert");
    inversion.add_node("X", input_node()).unwrap();
    inversion.add_node("Y", input_node()).unwrap();
    inversion.add_edge("XY", "X", "Y", input_edge(None)).unwrap();
    inversion.add_edge("YX", "Y", "X", output_edge(&[("type", "6D")], &[])).unwrap();
    manager.register_pattern(inversion, "c").unwrap();

    // identity: inputs X->Y and Y->X, output X->X
    let mut identity = Subgraph::new("identity", "identity");
    identity.add_node("X", input_node()).unwrap();
    identity.add_node("Y", input_node()).unwrap();
    identity.add_edge("XY", "X", "Y", input_edge(None)).unwrap();
    identity.add_edge("YX", "Y", "X", input_edge(None)).unwrap();
    identity.add_edge("XX", "X", "X", output_edge(&[("type", "6D")], &[])).unwrap();
    manager.register_pattern(identity, "c").unwrap();

    manager.apply_all_patterns();

    // the inverse edge B->A exists, but no self edge was derived
    assert!(manager
        .srg()
        .edges()
        .any(|(_, e)| e.data.pattern_name == "invert"));
    for (_, edge) in manager.srg().edges() {
        assert_ne!(edge.source, edge.target, "no self-cancelling composition");
    }
}

#[test]
fn test_stage1_rule_none_allows_recombination() {
    let mut manager = SrgManager::new();
    manager.set_source_rule(SourceRule::None);
    manager
        .register_srg(base_registration("b1", "A", "B", &[("type", "6D")]), "c")
        .unwrap();

    let mut inversion = Subgraph::new("invert", "invert");
    inversion.add_node("X", input_node()).unwrap();
    inversion.add_node("Y", input_node()).unwrap();
    inversion.add_edge("XY", "X", "Y", input_edge(None)).unwrap();
    inversion.add_edge("YX", "Y", "X", output_edge(&[("type", "6D")], &[])).unwrap();
    manager.register_pattern(inversion, "c").unwrap();

    let mut identity = Subgraph::new("identity", "identity");
    identity.add_node("X", input_node()).unwrap();
    identity.add_node("Y", input_node()).unwrap();
    identity.add_edge("XY", "X", "Y", input_edge(None)).unwrap();
    identity.add_edge("YX", "Y", "X", input_edge(None)).unwrap();
    identity.add_edge("XX", "X", "X", output_edge(&[("type", "6D")], &[])).unwrap();
    manager.register_pattern(identity, "c").unwrap();

    manager.apply_all_patterns();

    // with the requirement lifted the identity still produces nothing:
    // its only output is a self edge, which never adds information
    assert!(manager.srg().edges().all(|(_, e)| e.data.pattern_name != "identity"));
}

#[test]
fn test_supersession_removes_single_output_producer() {
    // S4: a better derived edge supersedes the original registration
    let mut manager = SrgManager::new();
    manager
        .register_srg(
            base_registration(
                "slow",
                "A",
                "B",
                &[("type", "6D"), ("latency", "20"), ("updateTime", "33")],
            ),
            "c",
        )
        .unwrap();
    manager
        .register_srg(
            base_registration("fast1", "A", "C", &[("type", "6D"), ("latency", "2")]),
            "c",
        )
        .unwrap();
    // reuse the AB edge name convention: fast2 goes C -> B
    manager
        .register_srg(
            base_registration("fast2", "C", "B", &[("type", "6D"), ("latency", "2")]),
            "c",
        )
        .unwrap();

    // the derived A->B is better on both known attributes
    let pattern = {
        let mut s = Subgraph::new("fastpath", "fastpath");
        s.add_node("X", input_node()).unwrap();
        s.add_node("Y", input_node()).unwrap();
        s.add_node("Z", input_node()).unwrap();
        s.add_edge("XY", "X", "Y", input_edge(Some("latency < 10"))).unwrap();
        s.add_edge("YZ", "Y", "Z", input_edge(Some("latency < 10"))).unwrap();
        s.add_edge(
            "XZ",
            "X",
            "Z",
            output_edge(&[("type", "6D")], &[("latency", "5"), ("updateTime", "20")]),
        )
        .unwrap();
        s
    };
    manager.register_pattern(pattern, "c").unwrap();

    manager.apply_all_patterns();

    // the slow registration is gone, its edge removed from the SRG
    assert!(!manager.srg().has_edge("slow:AB"));
    assert!(!manager.repository().contains_key("slow"));

    // the derived fast path edge exists with the expanded attributes
    let derived = manager
        .srg()
        .edges()
        .find(|(_, e)| e.data.pattern_name == "fastpath")
        .map(|(_, e)| e.data.attributes.clone())
        .expect("derived edge present");
    assert_eq!(derived.get("latency").unwrap().as_number().unwrap(), 5.0);
    assert_eq!(derived.get("updateTime").unwrap().as_number().unwrap(), 20.0);

    // nodes A and B survive: they are still spawned by other subgraphs
    assert!(manager.srg().has_node("A"));
    assert!(manager.srg().has_node("B"));
}

#[test]
fn test_transitive_delete() {
    let mut manager = SrgManager::new();
    manager
        .register_srg(base_registration("b1", "A", "B", &[("type", "6D")]), "c")
        .unwrap();
    manager
        .register_srg(base_registration("b2", "B", "C", &[("type", "6D")]), "c")
        .unwrap();
    manager
        .register_pattern(concatenation_pattern("concat", &[("type", "6D")], &[]), "c")
        .unwrap();
    manager.apply_all_patterns();
    assert_eq!(manager.srg().size(), 3);

    manager.delete_srg("b1").unwrap();

    // the derived edge depended on b1 and follows it out
    assert_eq!(manager.srg().size(), 1);
    assert!(manager.srg().has_edge("b2:AB"));
    // node A lost its last spawning subgraph
    assert!(!manager.srg().has_node("A"));
    assert!(manager.srg().has_node("B"));
    assert!(manager.srg().has_node("C"));
    // no instance of the pattern survives in the repository
    assert!(manager.repository().keys().all(|id| !id.starts_with("concat")));
}

#[test]
fn test_delete_pattern_removes_derived_edges() {
    let mut manager = SrgManager::new();
    manager
        .register_srg(base_registration("b1", "A", "B", &[("type", "6D")]), "c")
        .unwrap();
    manager
        .register_srg(base_registration("b2", "B", "C", &[("type", "6D")]), "c")
        .unwrap();
    manager
        .register_pattern(concatenation_pattern("concat", &[("type", "6D")], &[]), "c")
        .unwrap();
    manager.apply_all_patterns();
    assert_eq!(manager.srg().size(), 3);

    manager.delete_pattern("concat", "c").unwrap();
    assert_eq!(manager.srg().size(), 2);

    // re-running the expansion does nothing: the pattern is gone
    assert_eq!(manager.apply_all_patterns(), 0);
}

#[test]
fn test_node_merge_propagates_attributes() {
    let mut manager = SrgManager::new();
    manager
        .register_srg(base_registration("b1", "A", "B", &[("type", "6D")]), "c")
        .unwrap();

    // second registration re-registers node A with a new attribute
    let mut second = Subgraph::new("b2", "roomTracker");
    let mut node_a = output_node("A");
    node_a.attributes.set("room", "lab".into());
    second.add_node("A", node_a).unwrap();
    second.add_node("C", output_node("C")).unwrap();
    second.add_edge("AC", "A", "C", output_edge(&[("type", "6D")], &[])).unwrap();
    manager.register_srg(second, "c").unwrap();

    let a = manager.srg().node_index("A").unwrap();
    assert_eq!(manager.srg().node(a).data.attributes.get_text("room"), "lab");
    assert_eq!(manager.srg().node(a).data.subgraph_ids.len(), 2);

    // the merge is written back into the first registration's instance
    let b1 = &manager.repository()["b1"];
    assert_eq!(
        b1.subgraph.graph.get_node("A").unwrap().data.attributes.get_text("room"),
        "lab"
    );
}

#[test]
fn test_best_match_selection_prefers_fewest_sources() {
    let mut manager = SrgManager::new();
    manager
        .register_srg(
            base_registration("direct", "A", "B", &[("type", "6D"), ("latency", "50")]),
            "c",
        )
        .unwrap();
    manager
        .register_srg(base_registration("via1", "A", "C", &[("type", "6D")]), "c")
        .unwrap();
    manager
        .register_srg(base_registration("via2", "C", "B", &[("type", "6D")]), "c")
        .unwrap();
    manager
        .register_pattern(concatenation_pattern("concat", &[("type", "6D")], &[]), "c")
        .unwrap();
    manager.apply_all_patterns();

    let mut query = Subgraph::new("q", "bestAB");
    query.add_node("A", {
        let mut n = input_node();
        n.predicates.push(parse_predicate("id == 'A'").unwrap());
        n
    }).unwrap();
    query.add_node("B", {
        let mut n = input_node();
        n.predicates.push(parse_predicate("id == 'B'").unwrap());
        n
    }).unwrap();
    query.add_edge("AB", "A", "B", input_edge(Some("type == '6D'"))).unwrap();
    query.only_best_edge_match = true;
    manager.register_query(query, "c");

    let responses = manager.process_queries();
    let graphs = &responses["c"][0].graphs;
    // only one solution was selected; it is the single-source direct edge
    let references: Vec<String> = graphs[0]
        .input_edges()
        .map(|(_, e)| e.data.edge_reference.qualified_edge_name())
        .collect();
    assert_eq!(references, vec!["direct:AB".to_string()]);
}
