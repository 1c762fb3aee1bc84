//! Plain HTTP forwarding through a mock SOCKS5 server

mod common;

use common::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn exchange(proxy: std::net::SocketAddr, request: &str) -> Vec<u8> {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();
    tokio::time::timeout(TIMEOUT, read_all(&mut client))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_request_and_response_relayed_byte_exact() {
    let (origin_tx, origin_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();
    let origin_tx = std::sync::Mutex::new(Some(origin_tx));
    let origin = spawn_origin(move |mut stream| {
        let tx = origin_tx.lock().unwrap().take();
        async move {
            let head = read_head(&mut stream).await;
            if let Some(tx) = tx {
                let _ = tx.send(head);
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nx-odd-CASE:  spaced \r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
        }
    })
    .await;
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let request = format!(
        "GET http://{}/some/path?q=1 HTTP/1.1\r\nHost: {}\r\nX-Custom: Value\r\nConnection: close\r\n\r\n",
        origin, origin
    );
    let response = exchange(proxy, &request).await;
    assert_eq!(
        response,
        b"HTTP/1.1 200 OK\r\nx-odd-CASE:  spaced \r\nContent-Length: 5\r\n\r\nhello".to_vec()
    );

    let seen = origin_rx.await.unwrap();
    assert_eq!(
        String::from_utf8(seen).unwrap(),
        format!(
            "GET /some/path?q=1 HTTP/1.1\r\nHost: {}\r\nX-Custom: Value\r\nConnection: close\r\n\r\n",
            origin
        )
    );
    assert_eq!(socks.requested_targets(), vec![origin.to_string()]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_chunked_response_passthrough() {
    const RESPONSE: &[u8] =
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nX-Trailer: t\r\n\r\n";
    let origin = spawn_origin(|mut stream| async move {
        read_head(&mut stream).await;
        // Split writes so chunks straddle reads
        for piece in RESPONSE.chunks(7) {
            stream.write_all(piece).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let request = format!(
        "GET http://{}/ HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        origin, origin
    );
    assert_eq!(exchange(proxy, &request).await, RESPONSE.to_vec());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_request_body_forwarded() {
    let origin = spawn_origin(|mut stream| async move {
        let head = read_head(&mut stream).await;
        assert!(head.starts_with(b"POST /upload HTTP/1.1\r\n"));
        let mut body = [0u8; 11];
        stream.read_exact(&mut body).await.unwrap();
        let response = format!(
            "HTTP/1.1 201 Created\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            String::from_utf8_lossy(&body)
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    })
    .await;
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let request = format!(
        "POST http://{}/upload HTTP/1.1\r\nHost: {}\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world",
        origin, origin
    );
    let response = exchange(proxy, &request).await;
    assert_eq!(
        response,
        b"HTTP/1.1 201 Created\r\nContent-Length: 11\r\n\r\nhello world".to_vec()
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_socks_answers_bad_gateway() {
    let socks = unused_addr().await;
    let (server, proxy) = start_proxy(proxy_config(socks)).await;

    let response = exchange(
        proxy,
        "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n",
    )
    .await;
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{}", response);
    assert!(response.contains("Proxy-Agent: Kneesocks\r\n"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_refused_target_answers_bad_gateway() {
    let target = unused_addr().await;
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let request = format!("GET http://{}/ HTTP/1.1\r\nHost: {}\r\n\r\n", target, target);
    let response = exchange(proxy, &request).await;
    assert!(response.starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_request_answers_bad_request() {
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let response = exchange(proxy, "NOT A REQUEST\r\n\r\n").await;
    assert!(response.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    assert_eq!(socks.connection_count(), 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_clients_get_their_own_responses() {
    let origin = spawn_origin(|mut stream| async move {
        let head = read_head(&mut stream).await;
        let head = String::from_utf8(head).unwrap();
        let path = head.split(' ').nth(1).unwrap().to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            path.len(),
            path
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    })
    .await;
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            tokio::spawn(async move {
                let request = format!(
                    "GET http://{}/client/{} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
                    origin, i, origin
                );
                let response = exchange(proxy, &request).await;
                (i, String::from_utf8(response).unwrap())
            })
        })
        .collect();

    for task in tasks {
        let (i, response) = task.await.unwrap();
        assert!(response.ends_with(&format!("\r\n\r\n/client/{}", i)), "{}", response);
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_keep_alive_reuses_upstream_connection() {
    let origin = spawn_http_origin("pong").await;
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let expected = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\npong";
    for _ in 0..3 {
        let request = format!("GET http://{}/ping HTTP/1.1\r\nHost: {}\r\n\r\n", origin, origin);
        client.write_all(request.as_bytes()).await.unwrap();

        let mut response = vec![0u8; expected.len()];
        tokio::time::timeout(TIMEOUT, client.read_exact(&mut response))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response, expected.to_vec());
    }
    assert_eq!(socks.connection_count(), 1);

    // A second client picks up the parked connection
    tokio::time::sleep(Duration::from_millis(50)).await;
    let request = format!(
        "GET http://{}/ping HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        origin, origin
    );
    assert_eq!(exchange(proxy, &request).await, expected.to_vec());
    assert_eq!(socks.connection_count(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_socks_credentials_presented() {
    let origin = spawn_http_origin("secret").await;
    let socks = spawn_socks5(Some(("alice", "s3cret"))).await;
    let (server, proxy) = start_proxy(proxy_config_with_auth(socks.addr, "alice", "s3cret")).await;

    let request = format!(
        "GET http://{}/ HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        origin, origin
    );
    let response = exchange(proxy, &request).await;
    assert!(response.ends_with(b"\r\n\r\nsecret"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_wrong_socks_credentials_answer_bad_gateway() {
    let origin = spawn_http_origin("secret").await;
    let socks = spawn_socks5(Some(("alice", "s3cret"))).await;
    let (server, proxy) = start_proxy(proxy_config_with_auth(socks.addr, "alice", "wrong")).await;

    let request = format!("GET http://{}/ HTTP/1.1\r\nHost: {}\r\n\r\n", origin, origin);
    let response = exchange(proxy, &request).await;
    assert!(response.starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_half_closed_client_gets_response() {
    let origin = spawn_origin(|mut stream| async move {
        read_head(&mut stream).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
    })
    .await;
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = format!(
        "GET http://{}/ HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        origin, origin
    );
    client.write_all(request.as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    let response = tokio::time::timeout(TIMEOUT, read_all(&mut client)).await.unwrap();
    assert_eq!(
        response,
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_same_path_get_distinct_bodies() {
    let served = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let origin = {
        let served = served.clone();
        spawn_origin(move |mut stream| {
            let n = served.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                read_head(&mut stream).await;
                // Bodies of different sizes, finished at different times
                let body = format!("body-{}-{}", n, "x".repeat(n * 1024));
                tokio::time::sleep(Duration::from_millis((16usize.saturating_sub(n) * 5) as u64)).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
            }
        })
        .await
    };
    let socks = spawn_socks5(None).await;
    let (server, proxy) = start_proxy(proxy_config(socks.addr)).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            tokio::spawn(async move {
                let request = format!(
                    "GET http://{}/same HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
                    origin, origin
                );
                String::from_utf8(exchange(proxy, &request).await).unwrap()
            })
        })
        .collect();

    let mut bodies = Vec::new();
    for task in tasks {
        let response = task.await.unwrap();
        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        let length: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(body.len(), length);
        let n: usize = body.split('-').nth(1).unwrap().parse().unwrap();
        assert_eq!(body, format!("body-{}-{}", n, "x".repeat(n * 1024)));
        bodies.push(n);
    }

    bodies.sort_unstable();
    assert_eq!(bodies, (0..16).collect::<Vec<_>>());

    server.stop().await.unwrap();
}
