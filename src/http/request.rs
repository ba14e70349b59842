//! Request-side helpers shared by the instrumentors.
//!
//! # Responsibilities
//! - Carry the per-request list of handling errors (`RequestErrors`)
//! - Produce a raw dump of a request for failure diagnostics
//!
//! # Design Decisions
//! - `RequestErrors` is attached by the outermost layer so every inner layer
//!   and the handler share one list
//! - The dump captures the body only when it is small and has a known length;
//!   streaming bodies are left untouched

use std::fmt;
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, request::Parts, HeaderMap, Uri, Version};

/// Handling errors accumulated while serving one request.
///
/// Handlers extract it with `Extension<RequestErrors>` and push
/// non-fatal failures; the access log reports each one.
#[derive(Debug, Clone, Default)]
pub struct RequestErrors {
    inner: Arc<Mutex<Vec<String>>>,
}

impl RequestErrors {
    /// Return the list attached to `req`, attaching a fresh one if needed.
    pub fn attach(req: &mut Request) -> Self {
        if let Some(errors) = req.extensions().get::<RequestErrors>() {
            return errors.clone();
        }
        let errors = RequestErrors::default();
        req.extensions_mut().insert(errors.clone());
        errors
    }

    pub fn push(&self, error: impl fmt::Display) {
        self.lock().push(error.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        // A poisoned list still holds valid strings.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Declared host of a request: the `Host` header, else the URI authority
/// (HTTP/2 carries it there). Empty when neither is present.
pub(crate) fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/?",
    }
}

/// `(major, minor)` protocol version numbers.
pub(crate) fn version_numbers(version: Version) -> (u8, u8) {
    match version {
        Version::HTTP_09 => (0, 9),
        Version::HTTP_10 => (1, 0),
        Version::HTTP_11 => (1, 1),
        Version::HTTP_2 => (2, 0),
        Version::HTTP_3 => (3, 0),
        _ => (0, 0),
    }
}

/// Request body already read into memory by an outer layer.
#[derive(Debug, Clone)]
pub(crate) struct BufferedBody(pub(crate) Bytes);

/// Wire-format dump of a request: request line, headers, body.
#[derive(Debug, Clone)]
pub struct RequestDump {
    head: String,
    body: Option<Bytes>,
}

impl RequestDump {
    /// Dump `req`, buffering its body when `Content-Length` is known and at
    /// most `body_limit` bytes. The returned request carries the same body.
    ///
    /// Fails only when the buffered body cannot be read from the client.
    pub async fn capture(req: Request, body_limit: usize) -> Result<(Request, Self), axum::Error> {
        let (parts, body) = req.into_parts();
        let head = dump_head(&parts);

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());

        match declared {
            Some(len) if len > 0 && len <= body_limit => {
                let bytes = axum::body::to_bytes(body, body_limit).await?;
                let mut req = Request::from_parts(parts, Body::from(bytes.clone()));
                req.extensions_mut().insert(BufferedBody(bytes.clone()));
                Ok((req, Self { head, body: Some(bytes) }))
            }
            _ => Ok((Request::from_parts(parts, body), Self { head, body: None })),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_head(head: &str) -> Self {
        Self {
            head: head.to_string(),
            body: None,
        }
    }
}

fn dump_head(parts: &Parts) -> String {
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut head = format!("{} {} {}\r\n", parts.method, target, version_str(parts.version));

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host());
    if let Some(host) = host {
        head.push_str(&format!("Host: {host}\r\n"));
    }
    for (name, value) in &parts.headers {
        if *name == header::HOST {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes())));
    }
    head.push_str("\r\n");
    head
}

impl fmt::Display for RequestDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.head)?;
        if let Some(body) = &self.body {
            f.write_str(&String::from_utf8_lossy(body))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dump_includes_small_body() {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/orders?id=7")
            .header("host", "shop.local")
            .header("content-length", "11")
            .header("x-trace", "abc")
            .body(Body::from("hello world"))
            .unwrap();

        let (req, dump) = RequestDump::capture(req, 1024).await.unwrap();
        let text = dump.to_string();
        assert!(text.starts_with("POST /orders?id=7 HTTP/1.1\r\nHost: shop.local\r\n"));
        assert!(text.contains("x-trace: abc\r\n"));
        assert!(text.ends_with("\r\n\r\nhello world"));

        assert!(req.extensions().get::<BufferedBody>().is_some());
        // The body is still readable downstream.
        let body = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_dump_skips_large_body() {
        let req = axum::http::Request::builder()
            .uri("/upload")
            .header("content-length", "5")
            .body(Body::from("12345"))
            .unwrap();

        let (req, dump) = RequestDump::capture(req, 4).await.unwrap();
        assert!(dump.to_string().ends_with("\r\n\r\n"));
        assert!(req.extensions().get::<BufferedBody>().is_none());
        let body = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"12345");
    }

    #[test]
    fn test_request_errors_shared() {
        let mut req = Request::new(Body::empty());
        let first = RequestErrors::attach(&mut req);
        let second = RequestErrors::attach(&mut req);
        first.push("db timeout");
        assert_eq!(second.to_vec(), vec!["db timeout".to_string()]);
        assert_eq!(second.len(), 1);
    }
}
