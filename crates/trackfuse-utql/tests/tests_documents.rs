//! Document reading and writing tests, including the opaque
//! configuration blob round-trip.

use trackfuse_graph::subgraph::SubgraphRole;
use trackfuse_utql::{read_document, write_document};

const REQUEST: &str = r#"<?xml version="1.0"?>
<UTQLRequest xmlns="http://ar.in.tum.de/ubitrack/utql">
  <Pattern name="Art6D" id="art1">
    <Output>
      <Node name="Art" id="ArtTracker"><Attribute name="room" value="lab"/></Node>
      <Node name="Body" id="Body1"/>
      <Edge name="ArtToBody" source="Art" destination="Body">
        <Attribute name="type" value="6D"/>
        <Attribute name="latency" value="10"/>
      </Edge>
    </Output>
    <DataflowConfiguration><UbitrackLib class="ArtTracker"/><Attribute name="port" value="5000"/></DataflowConfiguration>
  </Pattern>
  <Pattern name="WhereIsBody" id="q1">
    <Input>
      <Node name="A"><Predicate>id=='ArtTracker'</Predicate></Node>
      <Node name="B"/>
      <Edge name="AB" source="A" destination="B">
        <Predicate>type=='6D'&amp;&amp;latency&lt;20</Predicate>
      </Edge>
    </Input>
    <Constraints>
      <OnlyBestEdgeMatch/>
      <BestMatchExpression>AB.latency</BestMatchExpression>
    </Constraints>
  </Pattern>
</UTQLRequest>
"#;

#[test]
fn test_read_request() {
    let document = read_document(REQUEST).unwrap();
    assert!(document.is_request());
    assert_eq!(document.subgraphs.len(), 2);

    let registration = document.subgraph_by_id("art1").unwrap();
    assert_eq!(registration.role(), SubgraphRole::Registration);
    assert_eq!(registration.name, "Art6D");
    assert_eq!(registration.dataflow_class, "ArtTracker");
    assert_eq!(registration.dataflow_attributes.get_text("port"), "5000");
    let edge = registration.graph.get_edge("ArtToBody").unwrap();
    assert_eq!(edge.data.attributes.get_text("type"), "6D");
    assert_eq!(edge.data.attributes.get("latency").unwrap().as_number().unwrap(), 10.0);
    let node = registration.graph.get_node("Art").unwrap();
    assert_eq!(node.data.qualified_name, "ArtTracker");
    assert_eq!(node.data.attributes.get_text("room"), "lab");

    let query = document.subgraph_by_id("q1").unwrap();
    assert_eq!(query.role(), SubgraphRole::Query);
    assert!(query.only_best_edge_match);
    assert!(query.best_match_expression.is_some());
    let edge = query.graph.get_edge("AB").unwrap();
    assert_eq!(edge.data.predicates.len(), 1);
}

#[test]
fn test_dataflow_configuration_is_byte_exact() {
    let document = read_document(REQUEST).unwrap();
    let registration = document.subgraph_by_id("art1").unwrap();
    assert_eq!(
        registration.dataflow_configuration.as_xml().unwrap(),
        "<UbitrackLib class=\"ArtTracker\"/><Attribute name=\"port\" value=\"5000\"/>"
    );

    // the blob survives a write/read cycle untouched
    let written = write_document(&document).unwrap();
    let reread = read_document(&written).unwrap();
    assert_eq!(
        reread.subgraph_by_id("art1").unwrap().dataflow_configuration.as_xml(),
        registration.dataflow_configuration.as_xml()
    );
}

#[test]
fn test_write_read_round_trip_preserves_structure() {
    let document = read_document(REQUEST).unwrap();
    let written = write_document(&document).unwrap();
    let reread = read_document(&written).unwrap();

    assert_eq!(reread.subgraphs.len(), 2);
    let registration = reread.subgraph_by_id("art1").unwrap();
    assert_eq!(registration.graph.order(), 2);
    assert_eq!(registration.graph.size(), 1);
    assert_eq!(
        registration.graph.get_edge("ArtToBody").unwrap().data.attributes.get_text("latency"),
        "10"
    );

    let query = reread.subgraph_by_id("q1").unwrap();
    assert!(query.only_best_edge_match);
    let edge = query.graph.get_edge("AB").unwrap();
    assert_eq!(edge.data.predicates.len(), 1);
    // the re-parsed predicate still evaluates
    let attrs: trackfuse_graph::KeyValueAttributes =
        [("type", "6D"), ("latency", "10")].into_iter().collect();
    let ctx = trackfuse_graph::EvaluationContext::local_attributes(&attrs);
    assert!(edge.data.predicates[0].evaluate(&ctx).unwrap());
}

#[test]
fn test_edge_references_round_trip() {
    let response = r#"<UTQLResponse xmlns="http://ar.in.tum.de/ubitrack/utql">
  <Pattern name="WhereIsBody" id="resp1">
    <Input>
      <Node name="A" id="ArtTracker"/>
      <Node name="B" id="Body1"/>
      <Edge name="AB" source="A" destination="B" pattern-ref="art1" edge-ref="ArtToBody">
        <Attribute name="type" value="6D"/>
      </Edge>
    </Input>
  </Pattern>
</UTQLResponse>
"#;
    let document = read_document(response).unwrap();
    assert!(!document.is_request());
    let subgraph = document.subgraph_by_id("resp1").unwrap();
    let edge = subgraph.graph.get_edge("AB").unwrap();
    assert_eq!(edge.data.edge_reference.qualified_edge_name(), "art1:ArtToBody");

    let written = write_document(&document).unwrap();
    let reread = read_document(&written).unwrap();
    let edge = reread.subgraph_by_id("resp1").unwrap().graph.get_edge("AB").unwrap();
    assert_eq!(edge.data.edge_reference.qualified_edge_name(), "art1:ArtToBody");
}

#[test]
fn test_deletion_marker_round_trip() {
    let marker = r#"<UTQLRequest xmlns="http://ar.in.tum.de/ubitrack/utql">
  <Pattern name="old" id="old1"/>
</UTQLRequest>"#;
    let document = read_document(marker).unwrap();
    assert_eq!(document.subgraphs[0].role(), SubgraphRole::Deletion);

    let written = write_document(&document).unwrap();
    let reread = read_document(&written).unwrap();
    assert_eq!(reread.subgraphs[0].role(), SubgraphRole::Deletion);
    assert_eq!(reread.subgraphs[0].id, "old1");
}

#[test]
fn test_anonymous_patterns_get_unique_ids() {
    let input = r#"<UTQLRequest xmlns="http://ar.in.tum.de/ubitrack/utql">
  <Pattern name="p"><Input><Node name="A"/></Input></Pattern>
  <Pattern name="p"><Input><Node name="A"/></Input></Pattern>
</UTQLRequest>"#;
    let document = read_document(input).unwrap();
    assert_eq!(document.subgraphs.len(), 2);
    assert_ne!(document.subgraphs[0].id, document.subgraphs[1].id);
    assert!(document.subgraphs[0].id.starts_with('p'));
}

#[test]
fn test_malformed_documents_rejected() {
    assert!(read_document("<NotUtql/>").is_err());
    assert!(read_document("<UTQLRequest><Pattern><Input><Node/></Input></Pattern></UTQLRequest>").is_err());
    // edge referencing a missing node
    let bad_edge = r#"<UTQLRequest>
  <Pattern name="p" id="p1">
    <Input><Node name="A"/><Edge name="AB" source="A" destination="B"/></Input>
  </Pattern>
</UTQLRequest>"#;
    assert!(read_document(bad_edge).is_err());
}
