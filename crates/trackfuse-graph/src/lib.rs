// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Spatial relationship graphs and pattern matching.

This crate implements the reasoning core of the tracking runtime:

- an attribute algebra of lazily-typed values, predicates and attribute
  expressions evaluated against node-, edge- or matching-level contexts;
- the world *spatial relationship graph* (SRG): a directed multigraph of
  geometric relations with provenance tracking;
- a pattern matcher that enumerates injective embeddings of typed
  subgraphs into the SRG;
- the SRG manager, which expands the SRG by applying patterns to a fixed
  point, answers queries with dataflow descriptions and deletes
  registrations transitively;
- the query server, which speaks the announcement protocol and computes
  incremental per-client dataflow deltas.
*/

pub mod attribute_value;
pub mod attributes;
pub mod context;
pub mod error;
pub mod expression;
pub mod graph;
pub mod manager;
pub mod matcher;
pub mod matching;
pub mod parser;
pub mod pattern;
pub mod predicate;
pub mod server;
pub mod srg;
pub mod steady_state;
pub mod subgraph;

pub use attribute_value::AttributeValue;
pub use attributes::KeyValueAttributes;
pub use context::{EvaluationContext, InputBinding};
pub use error::{GraphError, Result};
pub use expression::AttributeExpression;
pub use graph::{EdgeIndex, Graph, NodeIndex};
pub use manager::{InstantiatedPattern, QueryResponse, SourceRule, SrgManager};
pub use matcher::check_pattern;
pub use matching::EdgeMatching;
pub use parser::{parse_expression, parse_predicate};
pub use pattern::PatternRecord;
pub use predicate::Predicate;
pub use server::QueryServer;
pub use srg::{Srg, SrgEdge, SrgNode};
pub use subgraph::{EdgeReference, SectionTag, Subgraph, SubgraphEdge, SubgraphNode, SubgraphRole};
