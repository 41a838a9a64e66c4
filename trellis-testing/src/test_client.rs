// Test HTTP client

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use trellis_core::{Application, HttpMethod, HttpRequest, HttpResponse};

/// Drives an [`Application`] in-process, without a socket
#[derive(Clone, Debug)]
pub struct TestClient {
    app: Application,
}

impl TestClient {
    pub fn new(app: Application) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn get(&self, path: &str) -> TestResponse {
        self.request(HttpMethod::GET, path, None)
    }

    pub fn post<T: Serialize>(&self, path: &str, body: &T) -> TestResponse {
        self.request(HttpMethod::POST, path, Some(to_body(body)))
    }

    pub fn put<T: Serialize>(&self, path: &str, body: &T) -> TestResponse {
        self.request(HttpMethod::PUT, path, Some(to_body(body)))
    }

    pub fn patch<T: Serialize>(&self, path: &str, body: &T) -> TestResponse {
        self.request(HttpMethod::PATCH, path, Some(to_body(body)))
    }

    pub fn delete(&self, path: &str) -> TestResponse {
        self.request(HttpMethod::DELETE, path, None)
    }

    /// Make a request with custom method; `path` may carry a query string
    pub fn request(&self, method: HttpMethod, path: &str, body: Option<Vec<u8>>) -> TestResponse {
        let mut request = HttpRequest::new(method.as_str(), path);
        if let Some(body) = body {
            request = request
                .with_header("Content-Type", "application/json")
                .with_body(body);
        }
        self.send(request)
    }

    pub fn send(&self, request: HttpRequest) -> TestResponse {
        TestResponse(self.app.handle(request))
    }
}

fn to_body<T: Serialize>(body: &T) -> Vec<u8> {
    serde_json::to_vec(body).unwrap_or_default()
}

/// Response from a test request
#[derive(Debug, Clone)]
pub struct TestResponse(pub HttpResponse);

impl TestResponse {
    pub fn status(&self) -> u16 {
        self.0.status
    }

    /// Case-insensitive header lookup
    pub fn header(&self, key: &str) -> Option<&String> {
        self.0.header(key)
    }

    pub fn body_string(&self) -> String {
        self.0.body_string()
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_slice(&self.0.body).map_err(|e| format!("Serialization error: {}", e))
    }

    pub fn into_inner(self) -> HttpResponse {
        self.0
    }
}

/// Serve `app` on an ephemeral local port; returns the bound address
pub async fn spawn_server(app: Application) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = app.serve(listener).await {
            tracing::debug!(error = %err, "Test server stopped");
        }
    });
    Ok(addr)
}

/// Send one HTTP/1.1 request over a socket and return `(status, body)`
pub async fn send_raw(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> std::io::Result<(u16, String)> {
    let mut stream = TcpStream::connect(addr).await?;
    let body = body.unwrap_or("");
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        addr,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let raw = String::from_utf8_lossy(&raw);

    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((&raw, ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    Ok((status, body.to_string()))
}
