// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for UTQL document processing

use thiserror::Error;

/// Errors raised while reading or writing UTQL documents.
#[derive(Debug, Error)]
pub enum UtqlError {
    /// The document is not well-formed XML
    #[error("error parsing UTQL document: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The document violates the UTQL structure
    #[error("malformed UTQL document: {0}")]
    Malformed(String),

    /// An embedded predicate or attribute expression failed to parse
    #[error("error parsing embedded expression: {0}")]
    Expression(#[from] trackfuse_graph::GraphError),
}

/// Result type for document operations
pub type Result<T> = core::result::Result<T, UtqlError>;
