// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Length-prefixed TCP transport for the tracking network bridge.

Messages are framed with an 8-byte zero-padded uppercase ASCII hex
length header. Zero-length frames are keep-alives; payloads are capped
at 1 MiB. A protocol violation marks the connection bad and closes it,
leaving the rest of the process untouched.
*/

pub mod connection;
pub mod error;
pub mod framing;

pub use connection::{FrameConnection, ReceiveHandler};
pub use error::{NetError, NetResult};
pub use framing::{decode, encode, keep_alive, Decoded, HEADER_SIZE, MAX_FRAME_SIZE};
