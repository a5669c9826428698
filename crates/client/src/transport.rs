//! HTTP transport abstraction.
//!
//! The client never talks to `reqwest` directly; it issues [`HttpRequest`]s
//! through a [`Transport`], so tests can substitute a scripted fake.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Url;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

/// A boxed stream of response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// A single request to the store or to a generated upload URL.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
    /// Longest wait for the response head or for any single body chunk.
    /// The transfer as a whole is not bounded.
    pub read_timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            body: None,
            content_type: None,
            read_timeout: None,
        }
    }

    pub fn post(url: Url, body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url,
            body: Some(body.into()),
            content_type: Some(content_type.into()),
            read_timeout: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

/// Status and streaming body of a response.
pub struct HttpResponse {
    pub status: u16,
    body: ByteStream,
}

impl HttpResponse {
    pub fn new(status: u16, body: ByteStream) -> Self {
        Self { status, body }
    }

    /// A response whose whole body is already in memory.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(body) });
        Self::new(status, Box::pin(stream))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Collect the full body.
    pub async fn bytes(mut self) -> std::io::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Collect the body as text, replacing invalid UTF-8.
    pub async fn text(self) -> std::io::Result<String> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub fn into_stream(self) -> ByteStream {
        self.body
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Performs HTTP requests on behalf of the client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a request. Any HTTP status is a response; only failures to get
    /// one at all are errors.
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Wait before the next retry attempt.
    async fn wait_before_retry(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// [`Transport`] backed by a shared `reqwest` connection pool.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.http.get(request.url),
            Method::Post => self.http.post(request.url),
        };
        if let Some(content_type) = request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = match request.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, builder.send())
                .await
                .map_err(|_| TransportError::new(format!("no response within {timeout:?}")))?,
            None => builder.send().await,
        }
        .map_err(|e| TransportError::new(e.to_string()))?;

        let status = response.status().as_u16();
        let body: ByteStream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        let body = match request.read_timeout {
            Some(timeout) => with_read_timeout(body, timeout),
            None => body,
        };
        Ok(HttpResponse::new(status, body))
    }
}

/// Fail the stream with `TimedOut` when no chunk arrives within `timeout`.
///
/// Each chunk gets a fresh deadline, so slow but steady bodies complete.
pub fn with_read_timeout(body: ByteStream, timeout: Duration) -> ByteStream {
    let chunks = futures::stream::unfold(Some(body), move |body| async move {
        let mut body = body?;
        match tokio::time::timeout(timeout, body.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(body))),
            Ok(None) => None,
            Err(_) => {
                let error = std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no data received within {timeout:?}"),
                );
                Some((Err(error), None))
            }
        }
    });
    Box::pin(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_response_collects_chunks() {
        let chunks = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"Cou")),
            Ok(Bytes::from_static(b"cou")),
        ]);
        let response = HttpResponse::new(200, Box::pin(chunks));
        assert!(response.is_success());
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"Coucou");
    }

    #[tokio::test]
    async fn test_text_of_error_response() {
        let response = HttpResponse::from_bytes(500, "boom");
        assert!(!response.is_success());
        assert_eq!(response.text().await.unwrap(), "boom");
    }

    #[tokio::test]
    async fn test_text_reports_body_errors() {
        let chunks = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"tok")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        ]);
        let response = HttpResponse::new(200, Box::pin(chunks));
        let err = response.text().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
    }

    fn paced(chunks: usize, gap: Duration) -> ByteStream {
        Box::pin(futures::stream::unfold(0, move |sent| async move {
            if sent == chunks {
                return None;
            }
            tokio::time::sleep(gap).await;
            Some((Ok::<_, std::io::Error>(Bytes::from_static(b"chunk")), sent + 1))
        }))
    }

    #[tokio::test]
    async fn test_read_timeout_is_per_chunk() {
        // Five chunks 15 ms apart take longer than the 50 ms read timeout.
        let body = with_read_timeout(paced(5, Duration::from_millis(15)), Duration::from_millis(50));
        let response = HttpResponse::new(200, body);
        assert_eq!(response.bytes().await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn test_read_timeout_fails_stalled_body() {
        let stalled = futures::stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"head")) })
            .chain(futures::stream::pending());
        let body = with_read_timeout(Box::pin(stalled), Duration::from_millis(20));
        let err = HttpResponse::new(200, body).bytes().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }
}
