//! Existence probes for local proxies.
//!
//! Each probe performs the smallest handshake that makes a proxy answer and
//! inspects a single flag byte of the reply. Any I/O failure means "no proxy
//! here"; nothing in this module is fatal.

use crate::report::Reporter;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Greeting: version 5, one method, "no authentication".
pub const SOCKS5_GREETING: [u8; 3] = [0x05, 0x01, 0x00];
/// Offset of the version byte in the method-selection reply
pub const SOCKS5_FLAG_OFFSET: usize = 0;
pub const SOCKS5_FLAG: u8 = 0x05;

/// CONNECT to 66.102.7.99:80 with user id "Fred".
pub const SOCKS4_CONNECT: [u8; 13] = [
    0x04, 0x01, 0x00, 0x50, 0x42, 0x66, 0x07, 0x63, 0x46, 0x72, 0x65, 0x64, 0x00,
];
/// Offset of the status byte in the SOCKS4 reply
pub const SOCKS4_FLAG_OFFSET: usize = 1;
/// "Request granted"
pub const SOCKS4_FLAG: u8 = 0x5a;

/// Prefix of every HTTP status line
pub const HTTP_MAGIC: &[u8; 5] = b"HTTP/";

/// Both SOCKS replies are inspected through their first two bytes.
pub const REPLY_LEN: usize = 2;

/// Proxy protocol families probed on every candidate port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Socks5,
    Socks4,
    Http,
}

impl ProxyKind {
    /// Probe order for one port.
    pub const ALL: [ProxyKind; 3] = [ProxyKind::Socks5, ProxyKind::Socks4, ProxyKind::Http];

    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyKind::Socks5 => "socks5",
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Http => "http",
        }
    }

    pub fn proxy_url(&self, addr: SocketAddr) -> String {
        format!("{}://{addr}", self.scheme())
    }

    /// Request bytes and `(flag offset, flag value)` of the SOCKS handshakes.
    pub fn handshake(&self) -> Option<(&'static [u8], usize, u8)> {
        match self {
            ProxyKind::Socks5 => Some((&SOCKS5_GREETING, SOCKS5_FLAG_OFFSET, SOCKS5_FLAG)),
            ProxyKind::Socks4 => Some((&SOCKS4_CONNECT, SOCKS4_FLAG_OFFSET, SOCKS4_FLAG)),
            ProxyKind::Http => None,
        }
    }
}

/// Whether a SOCKS reply carries the expected flag.
pub fn reply_matches(reply: &[u8], offset: usize, flag: u8) -> bool {
    reply.get(offset).is_some_and(|byte| *byte == flag)
}

/// Check whether a proxy of `kind` answers at `addr`.
///
/// `timeout_after` bounds the connect; reads get twice that.
pub async fn proxy_exists(
    kind: ProxyKind,
    addr: SocketAddr,
    timeout_after: Duration,
    reporter: &dyn Reporter,
) -> bool {
    let result = match kind.handshake() {
        Some((request, offset, flag)) => socks_exchange(addr, request, timeout_after)
            .await
            .map(|reply| {
                reporter.debug(&format!(
                    "{} reply from {addr}: {}",
                    kind.scheme(),
                    hex::encode(reply)
                ));
                reply_matches(&reply, offset, flag)
            }),
        None => http_connect_exchange(addr, timeout_after).await,
    };

    match result {
        Ok(found) => found,
        Err(e) => {
            reporter.debug(&format!("{} probe on {addr} failed: {e}", kind.scheme()));
            false
        }
    }
}

async fn connect(addr: SocketAddr, timeout_after: Duration) -> std::io::Result<TcpStream> {
    timeout(timeout_after, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))?
}

async fn socks_exchange(
    addr: SocketAddr,
    request: &[u8],
    timeout_after: Duration,
) -> std::io::Result<[u8; REPLY_LEN]> {
    let mut stream = connect(addr, timeout_after).await?;
    stream.write_all(request).await?;

    let mut reply = [0u8; REPLY_LEN];
    timeout(timeout_after * 2, stream.read_exact(&mut reply))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;
    Ok(reply)
}

/// Issue a bare `CONNECT` and accept any HTTP status line as an answer.
///
/// The status line may arrive in several segments.
async fn http_connect_exchange(addr: SocketAddr, timeout_after: Duration) -> std::io::Result<bool> {
    let mut stream = connect(addr, timeout_after).await?;
    let request = format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut head = [0u8; HTTP_MAGIC.len()];
    timeout(timeout_after * 2, stream.read_exact(&mut head))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;
    Ok(head == *HTTP_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::memory::MemoryReporter;
    use tokio::net::TcpListener;

    async fn exists(kind: ProxyKind, addr: SocketAddr, millis: u64) -> bool {
        proxy_exists(kind, addr, Duration::from_millis(millis), &MemoryReporter::default()).await
    }

    /// Listener that answers every connection with `reply` after reading `expect` bytes.
    async fn mock_server(expect: usize, reply: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; expect];
                if stream.read_exact(&mut buf).await.is_ok() {
                    let _ = stream.write_all(reply).await;
                }
            }
        });
        addr
    }

    #[test]
    fn test_wire_constants() {
        assert_eq!(SOCKS5_GREETING, [0x05, 0x01, 0x00]);
        assert_eq!(hex::encode(SOCKS4_CONNECT), "04010050426607634672656400");
        assert!(reply_matches(&[0x05, 0x00], SOCKS5_FLAG_OFFSET, SOCKS5_FLAG));
        assert!(!reply_matches(&[0x00, 0x00], SOCKS5_FLAG_OFFSET, SOCKS5_FLAG));
        assert!(reply_matches(&[0x00, 0x5a], SOCKS4_FLAG_OFFSET, SOCKS4_FLAG));
        // The SOCKS4 flag lives in the second byte, not the first.
        assert!(!reply_matches(&[0x5a, 0x5b], SOCKS4_FLAG_OFFSET, SOCKS4_FLAG));
        assert!(!reply_matches(&[], 0, SOCKS5_FLAG));
    }

    #[tokio::test]
    async fn test_socks5_probe_detects_server() {
        let addr = mock_server(SOCKS5_GREETING.len(), &[0x05, 0x00]).await;
        assert!(exists(ProxyKind::Socks5, addr, 500).await);
    }

    #[tokio::test]
    async fn test_socks5_probe_rejects_wrong_version() {
        let addr = mock_server(SOCKS5_GREETING.len(), &[0x00, 0x00]).await;
        assert!(!exists(ProxyKind::Socks5, addr, 500).await);
    }

    #[tokio::test]
    async fn test_socks4_probe_reads_second_byte() {
        let addr = mock_server(SOCKS4_CONNECT.len(), &[0x00, 0x5a, 0, 0, 0, 0, 0, 0]).await;
        assert!(exists(ProxyKind::Socks4, addr, 500).await);
    }

    #[tokio::test]
    async fn test_http_connect_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                    .await;
            }
        });
        assert!(exists(ProxyKind::Http, addr, 500).await);
    }

    #[tokio::test]
    async fn test_http_connect_status_line_in_pieces() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(b"HT").await;
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = stream
                    .write_all(b"TP/1.1 200 Connection established\r\n\r\n")
                    .await;
            }
        });
        assert!(exists(ProxyKind::Http, addr, 500).await);
    }

    #[tokio::test]
    async fn test_http_connect_short_reply_is_absent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 256];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(b"HTT").await;
            }
        });
        assert!(!exists(ProxyKind::Http, addr, 300).await);
    }

    #[tokio::test]
    async fn test_socks_reply_bytes_reach_reporter() {
        let addr = mock_server(SOCKS5_GREETING.len(), &[0x05, 0x00]).await;
        let reporter = MemoryReporter::default();
        assert!(proxy_exists(ProxyKind::Socks5, addr, Duration::from_millis(500), &reporter).await);
        assert!(reporter.logged("socks5 reply from"));
        assert!(reporter.logged("0500"));
    }

    #[tokio::test]
    async fn test_closed_port_is_absent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        for kind in ProxyKind::ALL {
            assert!(!exists(kind, addr, 200).await);
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        assert!(!exists(ProxyKind::Socks5, addr, 100).await);
    }
}
