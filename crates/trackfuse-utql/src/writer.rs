// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
UTQL writer.

Serializes a document back to `<UTQLRequest>`/`<UTQLResponse>` XML.
Predicates and attribute expressions are rendered in the text grammar;
the `<DataflowConfiguration>` blob is written out verbatim.
*/

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use trackfuse_graph::graph::GraphEdge;
use trackfuse_graph::subgraph::{SectionTag, Subgraph, SubgraphEdge};
use trackfuse_graph::{AttributeValue, KeyValueAttributes, Predicate};

use crate::document::{UtqlDocument, UTQL_NAMESPACE};
use crate::error::Result;

/// Serializes a document to XML text.
pub fn write_document(document: &UtqlDocument) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    let root_name = if document.is_request() { "UTQLRequest" } else { "UTQLResponse" };
    let mut root = BytesStart::new(root_name);
    root.push_attribute(("xmlns", UTQL_NAMESPACE));
    writer.write_event(Event::Start(root))?;

    for subgraph in &document.subgraphs {
        write_subgraph(&mut writer, subgraph)?;
    }

    writer.write_event(Event::End(BytesEnd::new(root_name)))?;
    let bytes = writer.into_inner();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_subgraph(writer: &mut Writer<Vec<u8>>, subgraph: &Subgraph) -> Result<()> {
    let mut pattern = BytesStart::new("Pattern");
    if !subgraph.name.is_empty() {
        pattern.push_attribute(("name", subgraph.name.as_str()));
    }
    if !subgraph.id.is_empty() {
        pattern.push_attribute(("id", subgraph.id.as_str()));
    }
    if subgraph.is_null()
        && subgraph.dataflow_configuration.is_empty()
        && subgraph.best_match_expression.is_none()
    {
        // deletion marker
        writer.write_event(Event::Empty(pattern))?;
        return Ok(());
    }
    writer.write_event(Event::Start(pattern))?;

    for section in [SectionTag::Input, SectionTag::Output] {
        write_section(writer, subgraph, section)?;
    }

    if subgraph.only_best_edge_match || subgraph.best_match_expression.is_some() {
        writer.write_event(Event::Start(BytesStart::new("Constraints")))?;
        if subgraph.only_best_edge_match {
            writer.write_event(Event::Empty(BytesStart::new("OnlyBestEdgeMatch")))?;
        }
        if let Some(expression) = &subgraph.best_match_expression {
            writer.write_event(Event::Start(BytesStart::new("BestMatchExpression")))?;
            writer.write_event(Event::Text(BytesText::new(&expression.to_string())))?;
            writer.write_event(Event::End(BytesEnd::new("BestMatchExpression")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("Constraints")))?;
    }

    if let Some(blob) = subgraph.dataflow_configuration.as_xml() {
        writer.write_event(Event::Start(BytesStart::new("DataflowConfiguration")))?;
        // the blob is opaque and must survive byte-for-byte
        writer.write_event(Event::Text(BytesText::from_escaped(blob)))?;
        writer.write_event(Event::End(BytesEnd::new("DataflowConfiguration")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("Pattern")))?;
    Ok(())
}

fn write_section(
    writer: &mut Writer<Vec<u8>>,
    subgraph: &Subgraph,
    section: SectionTag,
) -> Result<()> {
    let nodes: Vec<_> = subgraph.graph.nodes().filter(|(_, n)| n.data.tag == section).collect();
    let edges: Vec<(_, &GraphEdge<SubgraphEdge>)> =
        subgraph.graph.edges().filter(|(_, e)| e.data.tag == section).collect();
    if nodes.is_empty() && edges.is_empty() {
        return Ok(());
    }

    let section_name = match section {
        SectionTag::Input => "Input",
        SectionTag::Output => "Output",
    };
    writer.write_event(Event::Start(BytesStart::new(section_name)))?;

    for (_, node) in nodes {
        let mut element = BytesStart::new("Node");
        element.push_attribute(("name", node.name.as_str()));
        if !node.data.qualified_name.is_empty() {
            element.push_attribute(("id", node.data.qualified_name.as_str()));
        }
        write_entity_body(
            writer,
            element,
            "Node",
            &node.data.attributes,
            &node.data.predicates,
            &node.data.expressions,
        )?;
    }

    for (_, edge) in edges {
        let mut element = BytesStart::new("Edge");
        element.push_attribute(("name", edge.name.as_str()));
        element.push_attribute(("source", subgraph.graph.node(edge.source).name.as_str()));
        element.push_attribute(("destination", subgraph.graph.node(edge.target).name.as_str()));
        if !edge.data.edge_reference.is_empty() {
            element.push_attribute(("pattern-ref", edge.data.edge_reference.subgraph_id()));
            element.push_attribute(("edge-ref", edge.data.edge_reference.edge_name()));
        }
        write_entity_body(
            writer,
            element,
            "Edge",
            &edge.data.attributes,
            &edge.data.predicates,
            &edge.data.expressions,
        )?;
    }

    writer.write_event(Event::End(BytesEnd::new(section_name)))?;
    Ok(())
}

fn write_entity_body(
    writer: &mut Writer<Vec<u8>>,
    element: BytesStart<'static>,
    element_name: &str,
    attributes: &KeyValueAttributes,
    predicates: &[Predicate],
    expressions: &[(String, trackfuse_graph::AttributeExpression)],
) -> Result<()> {
    let body_empty = attributes.iter().all(|(key, _)| key == "id")
        && predicates.is_empty()
        && expressions.is_empty();
    if body_empty {
        writer.write_event(Event::Empty(element))?;
        return Ok(());
    }
    writer.write_event(Event::Start(element))?;

    for (key, value) in attributes.iter() {
        // the id is reflected as an XML attribute already
        if key == "id" {
            continue;
        }
        write_attribute(writer, key, value)?;
    }
    for predicate in predicates {
        writer.write_event(Event::Start(BytesStart::new("Predicate")))?;
        writer.write_event(Event::Text(BytesText::new(&predicate.to_string())))?;
        writer.write_event(Event::End(BytesEnd::new("Predicate")))?;
    }
    for (name, expression) in expressions {
        let mut element = BytesStart::new("AttributeExpression");
        element.push_attribute(("name", name.as_str()));
        writer.write_event(Event::Start(element))?;
        writer.write_event(Event::Text(BytesText::new(&expression.to_string())))?;
        writer.write_event(Event::End(BytesEnd::new("AttributeExpression")))?;
    }

    writer.write_event(Event::End(BytesEnd::new(element_name)))?;
    Ok(())
}

fn write_attribute(writer: &mut Writer<Vec<u8>>, key: &str, value: &AttributeValue) -> Result<()> {
    match value.as_xml() {
        Some(markup) => {
            // opaque XML attribute payloads are written back verbatim
            writer.write_event(Event::Text(BytesText::from_escaped(markup)))?;
        }
        None => {
            let mut element = BytesStart::new("Attribute");
            element.push_attribute(("name", key));
            element.push_attribute(("value", value.as_text()));
            writer.write_event(Event::Empty(element))?;
        }
    }
    Ok(())
}
