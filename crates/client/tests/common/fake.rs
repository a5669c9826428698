use async_trait::async_trait;
use bytes::Bytes;
use isolate_client::transport::{HttpRequest, HttpResponse, Method, Transport};
use isolate_client::TransportError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE: &str = "http://localhost:1/";
pub const TOKEN: &str = "foo bar";
pub const TOKEN_QUERY: &str = "token=foo%20bar";

/// How an expected request body is matched.
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub enum Body {
    Any,
    None,
    Exact(Bytes),
    /// The body contains this byte sequence (multipart uploads).
    Contains(Bytes),
}

impl Body {
    fn matches(&self, body: Option<&Bytes>) -> bool {
        match (self, body) {
            (Self::Any, _) => true,
            (Self::None, None) => true,
            (Self::Exact(want), Some(got)) => want == got,
            (Self::Contains(want), Some(got)) => {
                want.is_empty() || got.windows(want.len()).any(|w| w == want.as_ref())
            }
            _ => false,
        }
    }
}

/// What the fake answers.
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub enum Reply {
    Status(u16, Bytes),
    /// The request never gets a response.
    Fail(&'static str),
}

#[allow(dead_code)]
impl Reply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::Status(200, body.into())
    }

    pub fn status(status: u16) -> Self {
        Self::Status(status, Bytes::new())
    }
}

#[derive(Debug)]
struct Expectation {
    method: Method,
    url: String,
    body: Body,
    reply: Reply,
}

/// Scripted [`Transport`].
///
/// Each expectation answers exactly one request. Requests are matched against
/// the remaining expectations in declaration order, so concurrent workers can
/// issue them in any order. Retry waits return immediately.
#[derive(Default)]
pub struct FakeTransport {
    expected: Mutex<Vec<Expectation>>,
    seen: Mutex<Vec<HttpRequest>>,
    unexpected: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Expect a request; `target` is a full URL or a path relative to `BASE`.
    pub fn expect(&self, method: Method, target: &str, body: Body, reply: Reply) -> &Self {
        let url = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{BASE}{target}")
        };
        self.expected.lock().unwrap().push(Expectation {
            method,
            url,
            body,
            reply,
        });
        self
    }

    /// Expect the session token fetch.
    pub fn expect_token(&self) -> &Self {
        self.expect(
            Method::Get,
            "content/get_token",
            Body::None,
            Reply::ok(TOKEN),
        )
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path_prefix: &str) -> usize {
        let prefix = format!("{BASE}{path_prefix}");
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.as_str().starts_with(&prefix))
            .count()
    }

    /// Fail unless every expectation was used and nothing unexpected arrived.
    pub fn assert_done(&self) {
        let unexpected = self.unexpected.lock().unwrap();
        assert!(unexpected.is_empty(), "unexpected requests: {unexpected:#?}");
        let left = self.expected.lock().unwrap();
        assert!(left.is_empty(), "expected requests never made: {left:#?}");
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.seen.lock().unwrap().push(request.clone());

        let reply = {
            let mut expected = self.expected.lock().unwrap();
            let position = expected.iter().position(|e| {
                e.method == request.method
                    && e.url == request.url.as_str()
                    && e.body.matches(request.body.as_ref())
            });
            position.map(|index| expected.remove(index).reply)
        };

        match reply {
            Some(Reply::Status(status, body)) => Ok(HttpResponse::from_bytes(status, body)),
            Some(Reply::Fail(message)) => Err(TransportError::new(message)),
            None => {
                let description = format!("{} {}", request.method, request.url);
                self.unexpected.lock().unwrap().push(description.clone());
                Err(TransportError::new(format!("unexpected request {description}")))
            }
        }
    }

    async fn wait_before_retry(&self, _delay: Duration) {}
}
