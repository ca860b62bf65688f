// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
UTQL document model and XML reader/writer.

UTQL documents carry patterns, queries and SRG registrations between
clients and the server, and dataflow descriptions back. The component
configuration blob inside `<DataflowConfiguration>` is opaque to the
core and preserved byte-for-byte across a read/match/write cycle.
*/

pub mod document;
pub mod error;
pub mod reader;
pub mod writer;

pub use document::{UtqlDocument, UTQL_NAMESPACE};
pub use error::{Result, UtqlError};
pub use reader::read_document;
pub use writer::write_document;
