// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Frame connection.

A blocking, length-prefixed message connection over a TCP stream. A
receive thread reads frames and hands complete payloads to the registered
handler; keep-alives are consumed silently. Any protocol violation or
I/O failure marks the connection bad; a bad connection refuses all
further traffic but never takes the rest of the process down.
*/

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{NetError, NetResult};
use crate::framing::{check_size, keep_alive, make_header, parse_header, HEADER_SIZE};

/// Handler invoked with each received payload.
pub type ReceiveHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A length-prefixed message connection over TCP.
pub struct FrameConnection {
    name: String,
    stream: Mutex<TcpStream>,
    bad: Arc<AtomicBool>,
    handler: Arc<Mutex<Option<ReceiveHandler>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl FrameConnection {
    /// Connects to a remote endpoint and starts the receive thread.
    pub fn connect(addr: impl ToSocketAddrs) -> NetResult<Arc<Self>> {
        let stream =
            TcpStream::connect(addr).map_err(|e| NetError::ConnectFailed(e.to_string()))?;
        Self::from_stream(stream)
    }

    /// Wraps an accepted stream and starts the receive thread.
    pub fn from_stream(stream: TcpStream) -> NetResult<Arc<Self>> {
        let name = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "(unknown)".to_string());

        let read_stream = stream.try_clone()?;
        let bad = Arc::new(AtomicBool::new(false));
        let handler: Arc<Mutex<Option<ReceiveHandler>>> = Arc::new(Mutex::new(None));

        let connection = Arc::new(FrameConnection {
            name,
            stream: Mutex::new(stream),
            bad: Arc::clone(&bad),
            handler: Arc::clone(&handler),
            reader: Mutex::new(None),
        });

        let thread_name = format!("frame-recv {}", connection.name);
        let reader = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || receive_loop(read_stream, bad, handler))
            .map_err(NetError::Io)?;
        *connection.reader.lock() = Some(reader);
        Ok(connection)
    }

    /// The peer's address.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the handler that receives complete payloads.
    pub fn set_receiver(&self, handler: ReceiveHandler) {
        *self.handler.lock() = Some(handler);
    }

    /// True once the connection violated the protocol or hit an I/O
    /// error.
    pub fn bad_connection(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }

    /// Sends one framed payload.
    pub fn send(&self, payload: &[u8]) -> NetResult<()> {
        if self.bad_connection() {
            return Err(NetError::BadConnection);
        }
        if let Err(e) = check_size(payload.len()) {
            error!("{}: refusing oversized frame", self.name);
            self.bad.store(true, Ordering::Release);
            return Err(e);
        }

        let header = make_header(payload.len())?;
        let mut stream = self.stream.lock();
        let result = stream.write_all(&header).and_then(|_| stream.write_all(payload));
        if let Err(e) = result {
            self.bad.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// Sends a zero-length keep-alive frame.
    pub fn send_keep_alive(&self) -> NetResult<()> {
        if self.bad_connection() {
            return Err(NetError::BadConnection);
        }
        let mut stream = self.stream.lock();
        if let Err(e) = stream.write_all(&keep_alive()) {
            self.bad.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for FrameConnection {
    fn drop(&mut self) {
        self.bad.store(true, Ordering::Release);
        let _ = self.stream.lock().shutdown(std::net::Shutdown::Both);
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
    }
}

fn receive_loop(
    mut stream: TcpStream,
    bad: Arc<AtomicBool>,
    handler: Arc<Mutex<Option<ReceiveHandler>>>,
) {
    loop {
        if bad.load(Ordering::Acquire) {
            return;
        }

        let mut header = [0u8; HEADER_SIZE];
        if let Err(e) = stream.read_exact(&mut header) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                info!("connection closed");
            } else {
                error!("error reading frame header: {}", e);
            }
            bad.store(true, Ordering::Release);
            return;
        }

        let size = match parse_header(&header) {
            Ok(size) => size,
            Err(e) => {
                error!("bad frame: {}", e);
                bad.store(true, Ordering::Release);
                return;
            }
        };

        if size == 0 {
            // keep-alive, not delivered to the application
            debug!("keep-alive received");
            continue;
        }

        let mut payload = vec![0u8; size];
        if let Err(e) = stream.read_exact(&mut payload) {
            error!("error reading frame payload: {}", e);
            bad.store(true, Ordering::Release);
            return;
        }

        // handler failures only lose this message
        let current = handler.lock().clone();
        if let Some(handler) = current {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&payload);
            }));
            if result.is_err() {
                error!("frame receive handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::MAX_FRAME_SIZE;
    use std::net::TcpListener;

    fn pair() -> (Arc<FrameConnection>, Arc<FrameConnection>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server_stream, _) = listener.accept().unwrap();
        let server = FrameConnection::from_stream(server_stream).unwrap();
        let client = FrameConnection::from_stream(client.join().unwrap()).unwrap();
        (server, client)
    }

    fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..500 {
            if predicate() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_send_receive_round_trip() {
        let (server, client) = pair();
        let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let log = Arc::clone(&received);
        client.set_receiver(Arc::new(move |payload| log.lock().push(payload.to_vec())));

        server.send(b"<UTQLResponse/>").unwrap();
        wait_for(|| !received.lock().is_empty());
        assert_eq!(received.lock()[0], b"<UTQLResponse/>");
    }

    #[test]
    fn test_keep_alive_not_delivered() {
        let (server, client) = pair();
        let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let log = Arc::clone(&received);
        client.set_receiver(Arc::new(move |payload| log.lock().push(payload.to_vec())));

        server.send_keep_alive().unwrap();
        server.send(b"after").unwrap();
        wait_for(|| !received.lock().is_empty());

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], b"after");
    }

    #[test]
    fn test_oversize_send_marks_bad() {
        let (server, _client) = pair();
        let huge = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(server.send(&huge), Err(NetError::FrameTooLarge { .. })));
        assert!(server.bad_connection());
        assert!(matches!(server.send(b"small"), Err(NetError::BadConnection)));
    }

    #[test]
    fn test_garbage_header_marks_receiver_bad() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"not-hex!").unwrap();
            stream
        });
        let (server_stream, _) = listener.accept().unwrap();
        let server = FrameConnection::from_stream(server_stream).unwrap();
        let _keep = sender.join().unwrap();

        wait_for(|| server.bad_connection());
    }
}
