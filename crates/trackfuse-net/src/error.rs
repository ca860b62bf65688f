// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the frame transport

use std::fmt;

/// Result type alias for transport operations
pub type NetResult<T> = Result<T, NetError>;

/// Transport errors.
#[derive(Debug)]
pub enum NetError {
    /// Failed to connect or bind
    ConnectFailed(String),

    /// A frame exceeded the 1 MiB payload limit
    FrameTooLarge { size: usize, max_size: usize },

    /// The length header was not valid zero-padded uppercase hex
    BadHeader(String),

    /// The connection was marked bad and refuses further traffic
    BadConnection,

    /// The peer closed the connection
    ConnectionClosed,

    /// I/O error
    Io(std::io::Error),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "Connect failed: {}", msg),
            Self::FrameTooLarge { size, max_size } => {
                write!(f, "Frame too large: {} bytes (max: {})", size, max_size)
            }
            Self::BadHeader(header) => write!(f, "Bad frame header: {}", header),
            Self::BadConnection => write!(f, "Connection is marked bad"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
