//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_shield::config::ShieldConfig;
use api_shield::http::HttpServer;
use api_shield::lifecycle::Shutdown;
use api_shield::security::{ChannelAuditSink, SecurityEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Read one request head and body; returns the request line.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::new(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    head.lines().next().unwrap_or_default().to_string()
}

/// Start a mock data backend that answers every request with `response`.
///
/// The request line it saw is echoed back in `x-upstream-request`.
pub async fn start_mock_backend(addr: SocketAddr, response: &'static str) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let request_line = read_request(&mut socket).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Upstream-Request: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            request_line,
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
}

/// Default configuration pointed at the given addresses, metrics off.
pub fn test_config(bind: SocketAddr, upstream: Option<SocketAddr>) -> ShieldConfig {
    let mut config = ShieldConfig::default();
    config.listener.bind_address = bind.to_string();
    config.upstream.address = upstream.map(|addr| addr.to_string());
    config.observability.metrics_enabled = false;
    config
}

/// A running shield with a channel audit sink.
pub struct TestShield {
    pub shutdown: Shutdown,
    pub events: mpsc::UnboundedReceiver<SecurityEvent>,
}

/// Serve `config` on its bind address until the returned shutdown fires.
pub async fn start_shield(config: ShieldConfig) -> TestShield {
    let (sink, events) = ChannelAuditSink::new();
    let server = HttpServer::new(config.clone(), Arc::new(sink));

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();

    tokio::spawn(async move {
        server.run(listener, None, stop).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestShield { shutdown, events }
}
