// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Wire framing.

Each message is an 8-byte ASCII hex length header (zero-padded,
uppercase) followed by that many payload bytes. A length of `00000000` is
a keep-alive and never reaches the application. Payloads are limited to
1 MiB; a violation marks the connection bad.
*/

use crate::error::{NetError, NetResult};

/// Size of the length header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size per frame.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Renders the zero-padded uppercase hex length header.
pub fn make_header(size: usize) -> NetResult<[u8; HEADER_SIZE]> {
    check_size(size)?;
    let text = format!("{:08X}", size);
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(text.as_bytes());
    Ok(header)
}

/// Parses a length header.
pub fn parse_header(header: &[u8; HEADER_SIZE]) -> NetResult<usize> {
    let text = std::str::from_utf8(header)
        .map_err(|_| NetError::BadHeader(format!("{:?}", header)))?;
    let size = usize::from_str_radix(text, 16)
        .map_err(|_| NetError::BadHeader(text.to_string()))?;
    check_size(size)?;
    Ok(size)
}

/// Frames one payload: header plus body.
pub fn encode(payload: &[u8]) -> NetResult<Vec<u8>> {
    let header = make_header(payload.len())?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// A keep-alive frame: zero length, no payload.
pub fn keep_alive() -> [u8; HEADER_SIZE] {
    *b"00000000"
}

/// Result of decoding one frame from a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet.
    Incomplete,
    /// A keep-alive; `consumed` bytes should be discarded.
    KeepAlive { consumed: usize },
    /// A complete payload; `consumed` bytes should be discarded.
    Frame { payload: Vec<u8>, consumed: usize },
}

/// Decodes the first frame in `buffer`, if complete.
pub fn decode(buffer: &[u8]) -> NetResult<Decoded> {
    if buffer.len() < HEADER_SIZE {
        return Ok(Decoded::Incomplete);
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&buffer[..HEADER_SIZE]);
    let size = parse_header(&header)?;

    if size == 0 {
        return Ok(Decoded::KeepAlive { consumed: HEADER_SIZE });
    }
    if buffer.len() < HEADER_SIZE + size {
        return Ok(Decoded::Incomplete);
    }
    Ok(Decoded::Frame {
        payload: buffer[HEADER_SIZE..HEADER_SIZE + size].to_vec(),
        consumed: HEADER_SIZE + size,
    })
}

/// Enforces the payload size limit.
pub fn check_size(size: usize) -> NetResult<()> {
    if size > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge { size, max_size: MAX_FRAME_SIZE });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_format() {
        assert_eq!(&make_header(0).unwrap(), b"00000000");
        assert_eq!(&make_header(255).unwrap(), b"000000FF");
        assert_eq!(&make_header(1024 * 1024).unwrap(), b"00100000");
    }

    #[test]
    fn test_round_trip() {
        let payload = b"<UTQLRequest/>".to_vec();
        let frame = encode(&payload).unwrap();
        match decode(&frame).unwrap() {
            Decoded::Frame { payload: decoded, consumed } => {
                assert_eq!(decoded, payload);
                assert_eq!(consumed, frame.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_at_limit() {
        let payload = vec![0x42u8; MAX_FRAME_SIZE];
        let frame = encode(&payload).unwrap();
        match decode(&frame).unwrap() {
            Decoded::Frame { payload: decoded, .. } => assert_eq!(decoded.len(), MAX_FRAME_SIZE),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversize_rejected() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(encode(&payload), Err(NetError::FrameTooLarge { .. })));

        let mut frame = Vec::new();
        frame.extend_from_slice(b"00100001"); // 1 MiB + 1
        assert!(matches!(decode(&frame), Err(NetError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_keep_alive_suppressed() {
        let mut buffer = keep_alive().to_vec();
        buffer.extend_from_slice(&encode(b"data").unwrap());

        match decode(&buffer).unwrap() {
            Decoded::KeepAlive { consumed } => {
                assert_eq!(consumed, HEADER_SIZE);
                match decode(&buffer[consumed..]).unwrap() {
                    Decoded::Frame { payload, .. } => assert_eq!(payload, b"data"),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_frames() {
        assert_eq!(decode(b"0000").unwrap(), Decoded::Incomplete);
        let frame = encode(b"hello").unwrap();
        assert_eq!(decode(&frame[..frame.len() - 1]).unwrap(), Decoded::Incomplete);
    }

    #[test]
    fn test_bad_header_rejected() {
        assert!(matches!(decode(b"zzzzzzzzxx"), Err(NetError::BadHeader(_))));
    }
}
