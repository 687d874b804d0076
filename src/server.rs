//! TCP Transport
//!
//! Binds the listening socket and runs the accept loop, spawning one
//! connection task per client. There is no connection limit.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::protocol::Dialect;
use crate::storage::Store;
use std::io;
use std::sync::Arc;
use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tracing::{error, info};

/// Pending-connection queue length passed to `listen(2)`
const LISTEN_BACKLOG: u32 = 1024;

/// Binds a listener on `addr` (`host:port`) with `SO_REUSEADDR` set.
///
/// Every address the host resolves to is tried in order; the first one
/// that binds wins.
pub async fn bind_listener(addr: &str) -> io::Result<TcpListener> {
    let mut last_err = None;

    for candidate in lookup_host(addr).await? {
        let socket = if candidate.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;

        match socket.bind(candidate) {
            Ok(()) => return socket.listen(LISTEN_BACKLOG),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} did not resolve to any address", addr),
        )
    }))
}

/// Accepts connections forever, one task per client.
pub async fn serve(
    listener: TcpListener,
    storage: Arc<Store>,
    stats: Arc<ConnectionStats>,
    dialect: Dialect,
) {
    if let Ok(local) = listener.local_addr() {
        info!(addr = %local, ?dialect, "Accepting connections");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::with_dialect(Arc::clone(&storage), dialect);
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start(dialect: Dialect) -> (std::net::SocketAddr, Arc<ConnectionStats>) {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        tokio::spawn(serve(
            listener,
            Arc::new(Store::new()),
            Arc::clone(&stats),
            dialect,
        ));

        (addr, stats)
    }

    #[tokio::test]
    async fn test_bind_loopback() {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_resolves_hostname() {
        let listener = bind_listener("localhost:0").await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_rejects_garbage() {
        assert!(bind_listener("not an address").await.is_err());
    }

    #[tokio::test]
    async fn test_rebind_after_close() {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // The server side closes first, leaving the port in TIME_WAIT
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        let client = TcpStream::connect(addr).await.unwrap();
        accept.await.unwrap().unwrap();
        drop(client);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bind_listener(&addr.to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn test_serve_handles_many_clients() {
        let (addr, stats) = start(Dialect::Legacy).await;
        let mut clients = Vec::new();

        for _ in 0..16 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
            clients.push(client);
        }

        for client in &mut clients {
            let mut buf = [0u8; 10];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"$4\r\nPONG\r\n");
        }

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 16);
    }

    #[tokio::test]
    async fn test_serve_uses_dialect() {
        let (addr, _) = start(Dialect::Resp2).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 12];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"*1\r\n$2\r\nhi\r\n");
    }
}
