// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the dataflow runtime

use thiserror::Error;

/// Errors raised by ports, components, the network and the factory.
#[derive(Debug, Clone, Error)]
pub enum DataflowError {
    /// The factory knows no component class of this name
    #[error("unknown component class: {0}")]
    UnknownClass(String),

    /// A component with this id already exists in the network
    #[error("duplicate component id: {0}")]
    DuplicateComponent(String),

    /// A component lookup failed
    #[error("component not found: {0}")]
    UnknownComponent(String),

    /// A port lookup failed
    #[error("no such port: {0}")]
    UnknownPort(String),

    /// A port with this name already exists on the component
    #[error("port already exists: {0}")]
    DuplicatePort(String),

    /// The two ports cannot be connected (direction, mode or event type)
    #[error("cannot connect {source_port} to {destination}: incompatible ports")]
    TypeMismatch { source_port: String, destination: String },

    /// The two ports are already connected
    #[error("ports already connected: {0}")]
    AlreadyConnected(String),

    /// The two ports are not connected
    #[error("ports not connected: {0}")]
    NotConnected(String),

    /// A pull returned no measurement for the requested timestamp
    #[error("{0}: no valid measurement for the requested timestamp")]
    NoMeasurement(String),

    /// The component's subgraph configuration is incomplete or malformed
    #[error("invalid configuration: {0}")]
    BadConfiguration(String),

    /// A shared library could not be loaded or resolved
    #[error("module load error: {0}")]
    ModuleLoad(String),
}

/// Result type for dataflow operations
pub type Result<T> = core::result::Result<T, DataflowError>;
