// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! UTQL document model.

use trackfuse_graph::Subgraph;

/// The UTQL XML namespace.
pub const UTQL_NAMESPACE: &str = "http://ar.in.tum.de/ubitrack/utql";

/// A parsed UTQL document: a request (client to server) or a response
/// (dataflow description).
#[derive(Debug, Clone, Default)]
pub struct UtqlDocument {
    request: bool,
    pub subgraphs: Vec<Subgraph>,
}

impl UtqlDocument {
    pub fn new(request: bool) -> Self {
        UtqlDocument { request, subgraphs: Vec::new() }
    }

    /// True for `<UTQLRequest>` documents.
    pub fn is_request(&self) -> bool {
        self.request
    }

    pub fn add_subgraph(&mut self, subgraph: Subgraph) {
        self.subgraphs.push(subgraph);
    }

    pub fn has_subgraph_by_id(&self, id: &str) -> bool {
        self.subgraphs.iter().any(|s| s.id == id)
    }

    pub fn subgraph_by_id(&self, id: &str) -> Option<&Subgraph> {
        self.subgraphs.iter().find(|s| s.id == id)
    }

    pub fn remove_subgraph_by_id(&mut self, id: &str) {
        self.subgraphs.retain(|s| s.id != id);
    }
}
