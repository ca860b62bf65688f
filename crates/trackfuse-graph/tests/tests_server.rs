//! Tests for the announcement protocol and the incremental client delta.

use trackfuse_graph::parser::parse_predicate;
use trackfuse_graph::subgraph::{SectionTag, Subgraph, SubgraphEdge, SubgraphNode};
use trackfuse_graph::QueryServer;

fn registration(id: &str, from: &str, to: &str) -> Subgraph {
    let mut s = Subgraph::new(id, format!("{}-tracker", id));
    for name in [from, to] {
        let mut n = SubgraphNode::new(SectionTag::Output);
        n.qualified_name = name.to_string();
        n.attributes.set("id", name.into());
        s.add_node(name, n).unwrap();
    }
    let mut e = SubgraphEdge::new(SectionTag::Output);
    e.attributes.set("type", "6D".into());
    s.add_edge("out", from, to, e).unwrap();
    s
}

fn query(id: &str, name: &str) -> Subgraph {
    let mut s = Subgraph::new(id, name);
    s.add_node("A", SubgraphNode::new(SectionTag::Input)).unwrap();
    s.add_node("B", SubgraphNode::new(SectionTag::Input)).unwrap();
    let mut e = SubgraphEdge::new(SectionTag::Input);
    e.predicates.push(parse_predicate("type == '6D'").unwrap());
    s.add_edge("AB", "A", "B", e).unwrap();
    s
}

#[test]
fn test_round_emits_new_subgraphs_once() {
    let mut server = QueryServer::new();
    server.process_announcement(registration("base1", "A", "B"), "c1").unwrap();
    server.process_announcement(query("q1", "whereIsB"), "c1").unwrap();

    let first = server.generate_documents();
    let c1 = &first["c1"];
    // query instance plus the base registration it references
    assert_eq!(c1.len(), 2);
    assert!(c1.iter().all(|s| !s.is_null()));

    // an unchanged second round sends nothing new
    let second = server.generate_documents();
    assert!(second["c1"].is_empty());
}

#[test]
fn test_disappearing_subgraphs_become_deletion_markers() {
    let mut server = QueryServer::new();
    server.process_announcement(registration("base1", "A", "B"), "c1").unwrap();
    server.process_announcement(query("q1", "whereIsB"), "c1").unwrap();

    let first = server.generate_documents();
    let running: Vec<String> = first["c1"].iter().map(|s| s.id.clone()).collect();
    assert_eq!(running.len(), 2);

    // withdraw the query: an empty subgraph with the announcement's id
    let marker = Subgraph::new("q1", "whereIsB");
    server.process_announcement(marker, "c1").unwrap();

    let third = server.generate_documents();
    let stopped: Vec<&Subgraph> = third["c1"].iter().filter(|s| s.is_null()).collect();
    // both previously running subgraphs disappear: the query instance is
    // gone and the base registration is no longer referenced by anything
    assert_eq!(stopped.len(), 2);
    for marker in stopped {
        assert!(running.contains(&marker.id));
    }
}

#[test]
fn test_cross_client_references_become_remote_attributes() {
    let mut server = QueryServer::new();
    // the tracker runs on c1, the query comes from c2
    server.process_announcement(registration("base1", "A", "B"), "c1").unwrap();
    server.process_announcement(query("q2", "remoteQuery"), "c2").unwrap();

    let documents = server.generate_documents();

    // c2 runs the query instance, c1 keeps the producing registration
    let c2_query = documents["c2"]
        .iter()
        .find(|s| s.name == "remoteQuery")
        .expect("query instance on c2");
    let (_, edge) = c2_query.input_edges().next().expect("one input edge");
    assert!(edge.data.edge_reference.is_empty());
    assert_eq!(edge.data.attributes.get_text("remotePatternID"), "base1");
    assert_eq!(edge.data.attributes.get_text("remoteEdgeName"), "out");

    assert!(documents["c1"].iter().any(|s| s.id == "base1"));
}

#[test]
fn test_deregister_client_clears_announcements() {
    let mut server = QueryServer::new();
    server.process_announcement(registration("base1", "A", "B"), "c1").unwrap();
    server.process_announcement(query("q1", "whereIsB"), "c1").unwrap();
    server.generate_documents();

    server.deregister_client("c1").unwrap();
    assert_eq!(server.manager().srg().size(), 0);
    assert_eq!(server.manager().srg().order(), 0);
}
