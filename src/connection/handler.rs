//! Connection Handler
//!
//! Each client gets its own handler task that reads request frames,
//! dispatches them, and writes replies until the connection ends.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! OPEN
//!   │
//!   ▼
//! ┌──────────────────────────────┐
//! │ read bytes into buffer       │◄─────┐
//! │ parse frame (need more? ─────┼──┐   │
//! │ dispatch                     │  │   │
//! │ write reply                  │──┼───┘
//! └──────────────────────────────┘  │
//!   │                               │
//!   ▼                               │
//! CLOSED  on: peer EOF, unknown command, framing error,
//!             I/O error, buffer overflow
//! ```
//!
//! No reply is written when the connection closes because of a protocol
//! violation.
//!
//! ## Buffer Management
//!
//! TCP is a stream protocol: one read may hold part of a frame. Incoming
//! bytes accumulate in a `BytesMut` until the parser finds a full frame.

use crate::commands::{CommandError, CommandHandler};
use crate::protocol::parser::{MAX_FRAME_SIZE, MAX_HEADER_LEN};
use crate::protocol::{Frame, FrameError, FrameParser, Reply};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer. An incomplete frame never holds more
/// than its checked headers and payloads plus one partial header line.
pub const MAX_BUFFER_SIZE: usize = MAX_FRAME_SIZE + MAX_HEADER_LEN;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection over any byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    buffer: BytesMut,

    command_handler: CommandHandler,

    parser: FrameParser,

    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: FrameParser::new(),
            stats,
        }
    }

    /// Runs the connection until the peer disconnects or a fatal error
    /// occurs. The stream is dropped (closed) on return.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Closing connection"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-dispatch-reply loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.try_parse_frame()? {
                let response = self.command_handler.execute(&frame)?;
                self.stats.command_processed();

                self.send_response(&response).await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Attempts to take one complete frame off the front of the buffer.
    fn try_parse_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer)? {
            Some((frame, consumed)) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Ok(Some(frame))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                Ok(None)
            }
        }
    }

    /// Reads more data from the stream into the buffer.
    ///
    /// Returns `Ok(false)` when the peer closed the connection cleanly.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Ok(false)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(true)
    }

    async fn send_response(&mut self, response: &Reply) -> Result<(), ConnectionError> {
        let bytes = response.encode(self.command_handler.dialect());
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            reply = %response,
            "Sent response"
        );
        Ok(())
    }
}

/// Reasons a connection ends abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent bytes that do not form a valid frame
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// The client sent a command we do not serve
    #[error("{0}")]
    Command(#[from] CommandError),

    /// Peer closed the stream in the middle of a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection to completion.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, Dialect};
    use crate::storage::Store;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn test_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn mock_handler(stream: tokio_test::io::Mock) -> ConnectionHandler<tokio_test::io::Mock> {
        let handler = CommandHandler::new(Arc::new(Store::new()));
        ConnectionHandler::new(stream, test_addr(), handler, Arc::new(ConnectionStats::new()))
    }

    async fn create_test_server() -> (SocketAddr, Arc<Store>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(Store::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, storage, stats)
    }

    async fn roundtrip(client: &mut TcpStream, args: &[&str], expected: &[u8]) {
        let frame = Frame::new(args.iter().map(|s| Bytes::from(s.to_string())));
        client.write_all(&frame.encode()).await.unwrap();

        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf, expected, "reply to {:?}", args);
    }

    async fn assert_closed(client: &mut TcpStream) {
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0, "expected EOF, got {:?}", &buf[..n]);
    }

    #[tokio::test]
    async fn test_mock_ping_then_eof() {
        let stream = tokio_test::io::Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"$4\r\nPONG\r\n")
            .build();

        assert!(mock_handler(stream).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_frame_split_across_reads() {
        let stream = tokio_test::io::Builder::new()
            .read(b"*2\r\n$4\r\nEC")
            .read(b"HO\r\n$5\r\nhel")
            .read(b"lo\r\n")
            .write(b"$5\r\nhello\r\n")
            .build();

        assert!(mock_handler(stream).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_unknown_command_closes_without_reply() {
        let stream = tokio_test::io::Builder::new()
            .read(b"*1\r\n$3\r\nFOO\r\n")
            .build();

        let result = mock_handler(stream).run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Command(CommandError::UnknownCommand(_)))
        ));
    }

    #[tokio::test]
    async fn test_mock_framing_error_closes_without_reply() {
        let stream = tokio_test::io::Builder::new().read(b"PING\r\n").build();

        let result = mock_handler(stream).run().await;
        assert!(matches!(result, Err(ConnectionError::Frame(_))));
    }

    #[tokio::test]
    async fn test_mock_partial_frame_at_eof() {
        let stream = tokio_test::io::Builder::new()
            .read(b"*2\r\n$3\r\nGET\r\n")
            .build();

        let result = mock_handler(stream).run().await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_mock_resp2_dialect() {
        let stream = tokio_test::io::Builder::new()
            .read(b"*2\r\n$4\r\nECHO\r\n$3\r\nfoo\r\n")
            .write(b"*1\r\n$3\r\nfoo\r\n")
            .read(b"*1\r\n$3\r\nGET\r\n")
            .write(b"-ERR wrong number of arguments for 'GET' command\r\n")
            .build();

        let handler = CommandHandler::with_dialect(Arc::new(Store::new()), Dialect::Resp2);
        let conn = ConnectionHandler::new(
            stream,
            test_addr(),
            handler,
            Arc::new(ConnectionStats::new()),
        );
        assert!(conn.run().await.is_ok());
    }

    async fn duplex_exchange(wire: Vec<u8>) -> (Result<(), ConnectionError>, Vec<u8>) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let handler = CommandHandler::new(Arc::new(Store::new()));
        let conn = ConnectionHandler::new(
            server,
            test_addr(),
            handler,
            Arc::new(ConnectionStats::new()),
        );
        let task = tokio::spawn(conn.run());

        // The server may close early, so write errors are expected there
        let _ = client.write_all(&wire).await;
        let _ = client.shutdown().await;

        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).await;
        (task.await.unwrap(), reply)
    }

    #[tokio::test]
    async fn test_largest_frame_is_served() {
        let arg = "x".repeat(500 * 1024);
        let wire = Frame::new(["ECHO".to_string(), arg.clone(), arg.clone()]).encode();
        assert!(wire.len() > 1000 * 1024);
        assert!(decode(&wire).is_ok());

        let (result, reply) = duplex_exchange(wire).await;
        assert!(result.is_ok(), "{:?}", result);

        let expected = Reply::sequence(vec![Bytes::from(arg.clone()), Bytes::from(arg)])
            .encode(Dialect::Legacy);
        assert_eq!(reply, expected);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_a_framing_error() {
        let arg = "x".repeat(400 * 1024);
        let wire = Frame::new(["ECHO".to_string(), arg.clone(), arg.clone(), arg.clone()]).encode();

        let (result, reply) = duplex_exchange(wire).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Frame(FrameError::TooLarge { .. }))
        ));
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, &["PING"], b"$4\r\nPONG\r\n").await;
        roundtrip(&mut client, &["ping"], b"$4\r\nPONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, storage, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, &["SET", "name", "Ariz"], b"$2\r\nOK\r\n").await;
        roundtrip(&mut client, &["GET", "name"], b"$4\r\nAriz\r\n").await;
        roundtrip(&mut client, &["GET", "missing"], b"$-1\r\n").await;

        assert_eq!(storage.get(b"name"), Some(Bytes::from("Ariz")));
    }

    #[tokio::test]
    async fn test_expiry_over_the_wire() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, &["SET", "k", "v", "PX", "50"], b"$2\r\nOK\r\n").await;
        roundtrip(&mut client, &["GET", "k"], b"$1\r\nv\r\n").await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        roundtrip(&mut client, &["GET", "k"], b"$-1\r\n").await;
        roundtrip(&mut client, &["GET", "k"], b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn test_echo_reply_decodes_to_payload() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let expected = b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        roundtrip(&mut client, &["ECHO", "foo", "bar"], expected).await;

        // An array reply has the same shape as a request frame
        let decoded = decode(expected).unwrap();
        assert_eq!(decoded, Frame::new(["foo", "bar"]));
    }

    #[tokio::test]
    async fn test_info() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, &["INFO"], b"$11\r\nrole:master\r\n").await;
    }

    #[tokio::test]
    async fn test_unknown_command_closes_connection() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$3\r\nFOO\r\n").await.unwrap();
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_arity_error_keeps_connection_open() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, &["SET", "onlykey"], b"$5\r\nERROR\r\n").await;
        roundtrip(&mut client, &["SET", "k", "v"], b"$2\r\nOK\r\n").await;
        roundtrip(&mut client, &["GET", "k"], b"$1\r\nv\r\n").await;
    }

    #[tokio::test]
    async fn test_concurrent_clients() {
        let (addr, storage, _) = create_test_server().await;
        let mut tasks = Vec::new();

        for t in 0..8u8 {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let value = String::from_utf8(vec![b'a' + t; 32]).unwrap();

                for i in 0..50 {
                    let key = format!("key{}", i % 4);
                    let set = ["SET", key.as_str(), value.as_str()];
                    roundtrip(&mut client, &set, b"$2\r\nOK\r\n").await;

                    let frame = Frame::new(["GET".to_string(), key]);
                    client.write_all(&frame.encode()).await.unwrap();

                    // Every value is 32 identical bytes: "$32\r\n" + 32 + "\r\n"
                    let mut buf = [0u8; 39];
                    client.read_exact(&mut buf).await.unwrap();
                    assert_eq!(&buf[..5], b"$32\r\n");
                    let payload = &buf[5..37];
                    assert!(payload.iter().all(|b| *b == payload[0]));
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(storage.len(), 4);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        roundtrip(&mut client, &["PING"], b"$4\r\nPONG\r\n").await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
