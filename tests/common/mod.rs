//! Test utilities and mocks for Kneesocks
//!
//! This module provides a minimal SOCKS5 server, scriptable origin servers
//! and helpers to start a proxy wired to them.

#![allow(dead_code)]

use kneesocks::config::{AuthMode, ProxyConfig};
use kneesocks::transport::SocksConnector;
use kneesocks::ProxyServer;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// An address nothing listens on
pub async fn unused_addr() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr
}

/// Read from `stream` until the end of an HTTP head
pub async fn read_head<R: AsyncReadExt + Unpin>(stream: &mut R) -> Vec<u8> {
    let mut received = Vec::new();
    let mut byte = [0u8; 1];
    while !received.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        received.push(byte[0]);
    }
    received
}

/// Read everything until the peer closes
pub async fn read_all<R: AsyncReadExt + Unpin>(stream: &mut R) -> Vec<u8> {
    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    received
}

/// Mock SOCKS5 server
pub struct MockSocks {
    /// Listening address
    pub addr: SocketAddr,
    /// Accepted connections
    pub connections: Arc<AtomicUsize>,
    /// Targets requested, as `host:port`
    pub targets: Arc<Mutex<Vec<String>>>,
}

impl MockSocks {
    /// Number of connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Targets requested so far
    pub fn requested_targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

/// Start a SOCKS5 server that connects to real targets
///
/// With `credentials` set, only username/password authentication with
/// exactly those credentials is accepted.
pub async fn spawn_socks5(credentials: Option<(&str, &str)>) -> MockSocks {
    let (listener, addr) = create_test_listener().await;
    let connections = Arc::new(AtomicUsize::new(0));
    let targets = Arc::new(Mutex::new(Vec::new()));
    let credentials = credentials.map(|(u, p)| (u.to_string(), p.to_string()));

    {
        let connections = connections.clone();
        let targets = targets.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                connections.fetch_add(1, Ordering::SeqCst);
                let targets = targets.clone();
                let credentials = credentials.clone();
                tokio::spawn(async move {
                    let _ = serve_socks5(stream, credentials, targets).await;
                });
            }
        });
    }

    MockSocks {
        addr,
        connections,
        targets,
    }
}

async fn serve_socks5(
    mut stream: TcpStream,
    credentials: Option<(String, String)>,
    targets: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    // Greeting: VER NMETHODS METHODS
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;

    match &credentials {
        None if methods.contains(&0x00) => stream.write_all(&[0x05, 0x00]).await?,
        Some((user, pass)) if methods.contains(&0x02) => {
            stream.write_all(&[0x05, 0x02]).await?;

            // VER ULEN UNAME PLEN PASSWD
            let mut ver_len = [0u8; 2];
            stream.read_exact(&mut ver_len).await?;
            let mut username = vec![0u8; ver_len[1] as usize];
            stream.read_exact(&mut username).await?;
            let mut plen = [0u8; 1];
            stream.read_exact(&mut plen).await?;
            let mut password = vec![0u8; plen[0] as usize];
            stream.read_exact(&mut password).await?;

            if username != user.as_bytes() || password != pass.as_bytes() {
                stream.write_all(&[0x01, 0x01]).await?;
                return Ok(());
            }
            stream.write_all(&[0x01, 0x00]).await?;
        }
        _ => {
            stream.write_all(&[0x05, 0xFF]).await?;
            return Ok(());
        }
    }

    // Request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    let host = match request[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            IpAddr::V4(Ipv4Addr::from(ip)).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            String::from_utf8_lossy(&domain).to_string()
        }
        0x04 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            IpAddr::V6(Ipv6Addr::from(ip)).to_string()
        }
        _ => return Ok(()),
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);
    targets.lock().unwrap().push(format!("{}:{}", host, port));

    let mut upstream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(upstream) => upstream,
        Err(_) => {
            // REP 0x05: connection refused
            stream
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            return Ok(());
        }
    };
    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0])
        .await?;

    let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
    Ok(())
}

/// Start an origin server running `handler` for every connection
pub async fn spawn_origin<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (listener, addr) = create_test_listener().await;
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handler(stream));
        }
    });
    addr
}

/// Start an origin that echoes every byte back
pub async fn spawn_echo_origin() -> SocketAddr {
    spawn_origin(|mut stream| async move {
        let (mut reader, mut writer) = stream.split();
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    })
    .await
}

/// Start an origin answering every request with `200` and `body`, keeping
/// connections open between requests
pub async fn spawn_http_origin(body: &'static str) -> SocketAddr {
    spawn_origin(move |mut stream| async move {
        loop {
            let head = read_head(&mut stream).await;
            if head.is_empty() {
                break;
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            if stream.write_all(response.as_bytes()).await.is_err() {
                break;
            }
        }
    })
    .await
}

/// Proxy configuration on an ephemeral port relaying through `socks`
pub fn proxy_config(socks: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.server.http_port = 0;
    config.upstream.host = socks.ip().to_string();
    config.upstream.port = socks.port();
    config.upstream.connect_timeout = 2;
    config.upstream.idle_timeout = 5;
    config
}

/// Proxy configuration presenting username/password credentials
pub fn proxy_config_with_auth(socks: SocketAddr, username: &str, password: &str) -> ProxyConfig {
    let mut config = proxy_config(socks);
    config.upstream.auth = AuthMode::UserPass {
        username: username.to_string(),
        password: password.to_string(),
    };
    config
}

/// Start a proxy; returns the server and its listening address
pub async fn start_proxy(config: ProxyConfig) -> (ProxyServer<SocksConnector>, SocketAddr) {
    let server = ProxyServer::from_config(config);
    let addr = server.start().await.unwrap();
    (server, addr)
}
