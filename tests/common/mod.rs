//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a mock search backend that returns a fixed 200 response and counts
/// the requests it served.
///
/// The full request (head plus declared body) is drained before answering so
/// the proxy's client never sees a connection reset.
pub async fn start_mock_upstream(addr: SocketAddr, response: &'static str) -> Arc<AtomicU32> {
    let listener = TcpListener::bind(addr).await.unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        drain_request(&mut socket).await;
                        counter.fetch_add(1, Ordering::SeqCst);

                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    hits
}

/// Read one HTTP/1.1 request: the head, then as many body bytes as the
/// Content-Length header declares.
async fn drain_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = vec![0u8; 8192];
    let mut seen: Vec<u8> = Vec::new();
    let mut expected: Option<usize> = None;

    loop {
        if let Some(total) = expected {
            if seen.len() >= total {
                return;
            }
        } else if let Some(head_end) = seen.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&seen[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            expected = Some(head_end + 4 + content_length);
            continue;
        }

        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => seen.extend_from_slice(&buf[..n]),
        }
    }
}
