// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
UTQL reader.

Parses `<UTQLRequest>`/`<UTQLResponse>` documents into subgraphs.
Predicates and attribute expressions are parsed into their evaluation
trees; the `<DataflowConfiguration>` content is captured verbatim so
that it survives a read/match/write cycle byte-for-byte.
*/

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::error;

use trackfuse_graph::parser::{parse_expression, parse_predicate};
use trackfuse_graph::subgraph::{
    EdgeReference, SectionTag, Subgraph, SubgraphEdge, SubgraphNode,
};
use trackfuse_graph::{AttributeValue, KeyValueAttributes};

use crate::document::UtqlDocument;
use crate::error::{Result, UtqlError};

/// Parses a complete UTQL document.
pub fn read_document(input: &str) -> Result<UtqlDocument> {
    let mut reader = Reader::from_str(input);

    let mut document = None;
    let mut temp_id_counter = 1000u64;

    loop {
        match reader.read_event()? {
            Event::Decl(_) | Event::Comment(_) | Event::Text(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Start(element) => match element.name().as_ref() {
                b"UTQLRequest" | b"UTQLResponse" => {
                    let is_request = element.name().as_ref() == b"UTQLRequest";
                    let mut doc = UtqlDocument::new(is_request);
                    read_patterns(&mut reader, &mut doc, &mut temp_id_counter)?;
                    document = Some(doc);
                }
                other => {
                    let name = String::from_utf8_lossy(other).to_string();
                    error!("unexpected root element: {}", name);
                    return Err(UtqlError::Malformed(format!("unexpected root element {}", name)));
                }
            },
            Event::Empty(element) => match element.name().as_ref() {
                b"UTQLRequest" => document = Some(UtqlDocument::new(true)),
                b"UTQLResponse" => document = Some(UtqlDocument::new(false)),
                other => {
                    let name = String::from_utf8_lossy(other).to_string();
                    return Err(UtqlError::Malformed(format!("unexpected root element {}", name)));
                }
            },
            Event::Eof => break,
            Event::End(_) | Event::CData(_) => {}
        }
    }

    document.ok_or_else(|| UtqlError::Malformed("no root element".into()))
}

fn attribute_of(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| UtqlError::Malformed(e.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(UtqlError::Xml)?
                .into_owned();
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn read_patterns(
    reader: &mut Reader<&[u8]>,
    document: &mut UtqlDocument,
    temp_id_counter: &mut u64,
) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(element) if element.name().as_ref() == b"Pattern" => {
                let name = attribute_of(&element, "name")?.unwrap_or_default();
                let mut id = attribute_of(&element, "id")?.unwrap_or_default();
                if id.is_empty() {
                    // anonymous patterns still need a unique id
                    id = if name.is_empty() {
                        format!("tempSubgraph{}", temp_id_counter)
                    } else {
                        format!("{}{}", name, temp_id_counter)
                    };
                    *temp_id_counter += 1;
                }
                let mut subgraph = Subgraph::new(id, name);
                read_pattern_body(reader, &mut subgraph)?;
                document.add_subgraph(subgraph);
            }
            Event::Empty(element) if element.name().as_ref() == b"Pattern" => {
                let name = attribute_of(&element, "name")?.unwrap_or_default();
                let id = attribute_of(&element, "id")?.unwrap_or_default();
                document.add_subgraph(Subgraph::new(id, name));
            }
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(UtqlError::Malformed("unexpected end of document".into()))
            }
            _ => {}
        }
    }
}

fn read_pattern_body(reader: &mut Reader<&[u8]>, subgraph: &mut Subgraph) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.name().as_ref() {
                b"Input" => read_section(reader, subgraph, SectionTag::Input)?,
                b"Output" => read_section(reader, subgraph, SectionTag::Output)?,
                b"Constraints" => read_constraints(reader, subgraph)?,
                b"DataflowConfiguration" => read_dataflow_configuration(reader, subgraph)?,
                _ => skip_element(reader, &element)?,
            },
            Event::Empty(_) => {}
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(UtqlError::Malformed("unexpected end of document".into()))
            }
            _ => {}
        }
    }
}

/// Collected node/edge declarations of one section. Nodes are inserted
/// before edges so that forward edge declarations resolve.
fn read_section(
    reader: &mut Reader<&[u8]>,
    subgraph: &mut Subgraph,
    tag: SectionTag,
) -> Result<()> {
    let mut nodes: Vec<(String, SubgraphNode)> = Vec::new();
    let mut edges: Vec<(String, String, String, SubgraphEdge)> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(element) if element.name().as_ref() == b"Node" => {
                let (name, mut node) = parse_node_element(&element, tag)?;
                read_entity_body(
                    reader,
                    &mut node.attributes,
                    &mut node.predicates,
                    &mut node.expressions,
                )?;
                nodes.push((name, node));
            }
            Event::Empty(element) if element.name().as_ref() == b"Node" => {
                nodes.push(parse_node_element(&element, tag)?);
            }
            Event::Start(element) if element.name().as_ref() == b"Edge" => {
                let (name, source, destination, mut edge) = parse_edge_element(&element, tag)?;
                read_entity_body(
                    reader,
                    &mut edge.attributes,
                    &mut edge.predicates,
                    &mut edge.expressions,
                )?;
                edges.push((name, source, destination, edge));
            }
            Event::Empty(element) if element.name().as_ref() == b"Edge" => {
                edges.push(parse_edge_element(&element, tag)?);
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(UtqlError::Malformed("unexpected end of document".into()))
            }
            _ => {}
        }
    }

    for (name, node) in nodes {
        subgraph.add_node(name, node)?;
    }
    for (name, source, destination, edge) in edges {
        if !subgraph.graph.has_node(&source) || !subgraph.graph.has_node(&destination) {
            error!("UTQL edge endpoints missing: {} -> {}", source, destination);
            return Err(UtqlError::Malformed(format!(
                "edge {} references unknown nodes {} -> {}",
                name, source, destination
            )));
        }
        subgraph.add_edge(name, &source, &destination, edge)?;
    }
    Ok(())
}

fn parse_node_element(element: &BytesStart<'_>, tag: SectionTag) -> Result<(String, SubgraphNode)> {
    let name = attribute_of(element, "name")?
        .ok_or_else(|| UtqlError::Malformed("UTQL Node without name".into()))?;
    let id = attribute_of(element, "id")?.unwrap_or_default();

    let mut node = SubgraphNode::new(tag);
    node.qualified_name = id.clone();
    if !id.is_empty() {
        node.attributes.set("id", AttributeValue::text(id));
    }
    Ok((name, node))
}

fn parse_edge_element(
    element: &BytesStart<'_>,
    tag: SectionTag,
) -> Result<(String, String, String, SubgraphEdge)> {
    let name = attribute_of(element, "name")?
        .ok_or_else(|| UtqlError::Malformed("UTQL Edge without name".into()))?;
    let source = attribute_of(element, "source")?
        .ok_or_else(|| UtqlError::Malformed("UTQL Edge without source".into()))?;
    let destination = attribute_of(element, "destination")?
        .ok_or_else(|| UtqlError::Malformed("UTQL Edge without destination".into()))?;

    let mut edge = SubgraphEdge::new(tag);
    let pattern_ref = attribute_of(element, "pattern-ref")?;
    let edge_ref = attribute_of(element, "edge-ref")?;
    if let (Some(pattern_ref), Some(edge_ref)) = (pattern_ref, edge_ref) {
        edge.edge_reference = EdgeReference::new(pattern_ref, edge_ref)?;
    }
    Ok((name, source, destination, edge))
}

fn read_entity_body(
    reader: &mut Reader<&[u8]>,
    attributes: &mut KeyValueAttributes,
    predicates: &mut Vec<trackfuse_graph::Predicate>,
    expressions: &mut Vec<(String, trackfuse_graph::AttributeExpression)>,
) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Empty(element) if element.name().as_ref() == b"Attribute" => {
                let name = attribute_of(&element, "name")?
                    .ok_or_else(|| UtqlError::Malformed("UTQL Attribute without name".into()))?;
                let value = attribute_of(&element, "value")?.unwrap_or_default();
                attributes.set(name, AttributeValue::text(value));
            }
            Event::Start(element) if element.name().as_ref() == b"Attribute" => {
                let name = attribute_of(&element, "name")?
                    .ok_or_else(|| UtqlError::Malformed("UTQL Attribute without name".into()))?;
                match attribute_of(&element, "value")? {
                    Some(value) => {
                        attributes.set(name, AttributeValue::text(value));
                        skip_element(reader, &element)?;
                    }
                    None => {
                        // attributes may carry embedded XML subtrees; keep
                        // them opaque
                        let end = element.to_end().into_owned();
                        let inner = reader.read_text(end.name())?.into_owned();
                        let markup =
                            format!("<Attribute name=\"{}\">{}</Attribute>", name, inner);
                        attributes.set(name, AttributeValue::xml(markup));
                    }
                }
            }
            Event::Start(element) if element.name().as_ref() == b"AttributeExpression" => {
                let name = attribute_of(&element, "name")?.ok_or_else(|| {
                    UtqlError::Malformed("UTQL AttributeExpression without name".into())
                })?;
                let end = element.to_end().into_owned();
                let text = reader.read_text(end.name())?;
                let text = unescape_text(&text);
                let expression = parse_expression(text.trim()).map_err(|e| {
                    error!("error parsing attribute expression \"{}\": {}", text, e);
                    UtqlError::Expression(e)
                })?;
                expressions.push((name, expression));
            }
            Event::Start(element) if element.name().as_ref() == b"Predicate" => {
                let end = element.to_end().into_owned();
                let text = reader.read_text(end.name())?;
                let text = unescape_text(&text);
                let predicate = parse_predicate(text.trim()).map_err(|e| {
                    error!("error parsing predicate \"{}\": {}", text, e);
                    UtqlError::Expression(e)
                })?;
                predicates.push(predicate);
            }
            Event::Start(element) => skip_element(reader, &element)?,
            Event::Empty(_) => {}
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(UtqlError::Malformed("unexpected end of document".into()))
            }
            _ => {}
        }
    }
}

fn read_constraints(reader: &mut Reader<&[u8]>, subgraph: &mut Subgraph) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Empty(element) if element.name().as_ref() == b"OnlyBestEdgeMatch" => {
                subgraph.only_best_edge_match = true;
            }
            Event::Start(element) if element.name().as_ref() == b"OnlyBestEdgeMatch" => {
                subgraph.only_best_edge_match = true;
                skip_element(reader, &element)?;
            }
            Event::Start(element) if element.name().as_ref() == b"BestMatchExpression" => {
                let end = element.to_end().into_owned();
                let text = reader.read_text(end.name())?;
                let text = unescape_text(&text);
                subgraph.best_match_expression = Some(parse_expression(text.trim())?);
            }
            Event::Start(element) => skip_element(reader, &element)?,
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(UtqlError::Malformed("unexpected end of document".into()))
            }
            _ => {}
        }
    }
}

/// Captures the configuration blob verbatim and extracts the component
/// class plus the dataflow attributes from it.
fn read_dataflow_configuration(reader: &mut Reader<&[u8]>, subgraph: &mut Subgraph) -> Result<()> {
    let inner = reader.read_text(quick_xml::name::QName(b"DataflowConfiguration"))?.into_owned();
    subgraph.dataflow_configuration = AttributeValue::xml(inner.clone());

    // re-scan the blob for the class selector and plain attributes
    let mut scan = Reader::from_str(&inner);
    loop {
        match scan.read_event()? {
            Event::Start(element) | Event::Empty(element) => match element.name().as_ref() {
                b"UbitrackLib" => {
                    if let Some(class) = attribute_of(&element, "class")? {
                        subgraph.dataflow_class = class;
                    }
                }
                b"Attribute" => {
                    if let Some(name) = attribute_of(&element, "name")? {
                        let value = attribute_of(&element, "value")?.unwrap_or_default();
                        subgraph.dataflow_attributes.set(name, AttributeValue::text(value));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn skip_element(reader: &mut Reader<&[u8]>, element: &BytesStart<'_>) -> Result<()> {
    let end = element.to_end().into_owned();
    reader.read_to_end(end.name())?;
    Ok(())
}

/// `read_text` returns raw markup; predicate/expression text may contain
/// XML entities for the comparison operators.
fn unescape_text(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
