// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for graph and pattern operations

use thiserror::Error;

/// Errors raised by the graph store, the attribute algebra and the
/// pattern machinery.
///
/// Evaluation errors (`NotANumber`, `UnknownAttribute`, ...) are recoverable:
/// predicate callers treat them as "does not match" and expression callers
/// treat them as "does not apply". Store errors (`DuplicateNode`,
/// `UnknownSubgraph`, ...) indicate misuse or bugs and are propagated.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// An attribute value could not be interpreted as a number
    #[error("attribute is not a number ({0})")]
    NotANumber(String),

    /// A referenced attribute, node or edge was not found during evaluation
    #[error("unknown attribute or reference: {0}")]
    UnknownAttribute(String),

    /// An expression or predicate could not be evaluated in this context
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Text could not be parsed as a predicate or expression
    #[error("parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    /// A node with this name already exists in the graph
    #[error("node already in graph: {0}")]
    DuplicateNode(String),

    /// An edge with this name already exists in the graph
    #[error("edge already in graph: {0}")]
    DuplicateEdge(String),

    /// A node lookup failed
    #[error("no such node in graph: {0}")]
    UnknownNode(String),

    /// An edge lookup failed
    #[error("no such edge in graph: {0}")]
    UnknownEdge(String),

    /// A subgraph, pattern or query lookup failed
    #[error("no such subgraph: {0}")]
    UnknownSubgraph(String),

    /// A pattern with this name is already registered for the client
    #[error("pattern already registered: {0}")]
    DuplicatePattern(String),

    /// The steady-state system matrix was numerically singular
    #[error("singular matrix")]
    SingularMatrix,

    /// An edge reference was malformed
    #[error("illegal edge reference: {0}")]
    BadEdgeReference(String),
}

/// Result type for graph operations
pub type Result<T> = core::result::Result<T, GraphError>;
