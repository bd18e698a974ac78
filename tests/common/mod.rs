//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prefetch_proxy::config::PrefetchProxyConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

/// One canned origin answer.
#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub chunked: bool,
    pub delay: Duration,
}

impl Route {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.into(),
            chunked: false,
            delay: Duration::ZERO,
        }
    }

    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A mock origin on an ephemeral local port that counts hits per path.
pub struct MockOrigin {
    pub addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockOrigin {
    pub async fn start(routes: Vec<(&'static str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<String, Route>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, route)| (path.to_string(), route))
                .collect(),
        );
        let hits = Arc::new(Mutex::new(HashMap::new()));

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => {
                        let routes = Arc::clone(&routes);
                        let counter = Arc::clone(&counter);
                        tokio::spawn(async move {
                            let _ = serve(socket, routes, counter).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

async fn serve(
    mut socket: TcpStream,
    routes: Arc<HashMap<String, Route>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut headers);
    let _ = request.parse(&buf);
    let target = request.path.unwrap_or("/");
    let path = target.split('?').next().unwrap_or("/").to_string();
    *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let Some(route) = routes.get(&path).cloned() else {
        socket
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await?;
        return socket.shutdown().await;
    };

    tokio::time::sleep(route.delay).await;
    let mut head = format!(
        "HTTP/1.1 {} OK\r\nContent-Type: {}\r\nConnection: close\r\n",
        route.status, route.content_type
    );
    if route.chunked {
        head.push_str("Transfer-Encoding: chunked\r\n\r\n");
        socket.write_all(head.as_bytes()).await?;
        for piece in route.body.chunks(4000) {
            socket.write_all(format!("{:x}\r\n", piece.len()).as_bytes()).await?;
            socket.write_all(piece).await?;
            socket.write_all(b"\r\n").await?;
        }
        socket.write_all(b"0\r\n\r\n").await?;
    } else {
        head.push_str(&format!("Content-Length: {}\r\n\r\n", route.body.len()));
        socket.write_all(head.as_bytes()).await?;
        socket.write_all(&route.body).await?;
    }
    socket.shutdown().await
}

/// A page whose head references `resources` (scripts for `.js`, stylesheets
/// otherwise).
pub fn page(resources: &[&str]) -> String {
    let mut head = String::new();
    for resource in resources {
        if resource.ends_with(".js") {
            head.push_str(&format!("<script src=\"{}\"></script>\n", resource));
        } else {
            head.push_str(&format!("<link rel=\"stylesheet\" href=\"{}\">\n", resource));
        }
    }
    format!("<!doctype html><html><head>\n{}</head><body>hi</body></html>", head)
}

/// Deterministic filler of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| b"abcdefghijklmnopqrstuvwxyz0123456789"[i % 36]).collect()
}

/// Defaults with short timers suitable for tests.
pub fn test_config() -> PrefetchProxyConfig {
    let mut config = PrefetchProxyConfig::default();
    config.push.reconnect_delay_ms = 50;
    config.push.purge_interval_secs = 1;
    config.timeouts.request_secs = 5;
    config.racing.push_grace_ms = 2000;
    config
}
