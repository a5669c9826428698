//! Protocol client for the isolate content store.
//!
//! [`IsolateClient`] speaks the `content/*` HTTP surface: session token,
//! batched existence queries, direct stores, blobstore redirection and
//! retrieval. All requests go through an injected [`Transport`].

use crate::error::{ClientError, ClientResult};
use crate::multipart::{FilePart, encode_multipart};
use crate::retry::{RetryOn, send_with_retry};
use crate::transport::{
    FORM_URLENCODED, HttpRequest, HttpResponse, OCTET_STREAM, ReqwestTransport, Transport,
};
use bytes::{BufMut, Bytes, BytesMut};
use isolate_core::hash::CONTENT_ID_LEN;
use isolate_core::{ClientConfig, ContentId, Namespace};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Existence response byte for an object the server holds.
const PRESENT: u8 = 1;
/// Existence response byte for an object the server lacks.
const MISSING: u8 = 0;

/// Upload URLs tried per blobstore upload: the first plus one regeneration.
const BLOBSTORE_URL_ATTEMPTS: u32 = 2;

/// Opaque credential fetched once per session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn encoded(&self) -> String {
        utf8_percent_encode(&self.0, NON_ALPHANUMERIC).to_string()
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionToken").field(&"<redacted>").finish()
    }
}

/// Client for one store and namespace.
pub struct IsolateClient {
    transport: Arc<dyn Transport>,
    base_url: Url,
    config: ClientConfig,
    token: OnceCell<SessionToken>,
}

impl std::fmt::Debug for IsolateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolateClient")
            .field("base_url", &self.base_url.as_str())
            .field("namespace", &self.config.namespace)
            .finish_non_exhaustive()
    }
}

impl IsolateClient {
    /// Create a client over the default HTTP transport.
    pub fn connect(config: ClientConfig) -> ClientResult<Self> {
        Self::new(config, Arc::new(ReqwestTransport::new()))
    }

    /// Create a client over an explicit transport.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> ClientResult<Self> {
        config.validate()?;
        let mut base = config.server.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            isolate_core::Error::InvalidConfig(format!("invalid server URL {base:?}: {e}"))
        })?;

        Ok(Self {
            transport,
            base_url,
            config,
            token: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn namespace(&self) -> &Namespace {
        &self.config.namespace
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Protocol(format!("failed to build URL for {path}: {e}")))
    }

    fn url_with_token(&self, path: &str, token: &SessionToken) -> ClientResult<Url> {
        let mut url = self.url(path)?;
        url.set_query(Some(&format!("token={}", token.encoded())));
        Ok(url)
    }

    async fn send(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        send_with_retry(
            self.transport.as_ref(),
            &self.config.retry,
            &request,
            RetryOn::default(),
        )
        .await
    }

    /// The session token, fetched on first use and shared afterwards.
    pub async fn token(&self) -> ClientResult<&SessionToken> {
        self.token.get_or_try_init(|| self.fetch_token()).await
    }

    async fn fetch_token(&self) -> ClientResult<SessionToken> {
        let response = self
            .send(HttpRequest::get(self.url("content/get_token")?))
            .await?;
        let body = response.text().await?;
        let token = body.trim();
        if token.is_empty() {
            return Err(ClientError::Protocol(
                "server returned an empty session token".to_string(),
            ));
        }
        tracing::debug!("Fetched session token");
        Ok(SessionToken::new(token))
    }

    /// Ask the server which of `ids` it holds.
    ///
    /// Returns one flag per id, in the same order.
    pub async fn contains(&self, ids: &[ContentId]) -> ClientResult<Vec<bool>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let token = self.token().await?;

        let mut body = BytesMut::with_capacity(ids.len() * CONTENT_ID_LEN);
        for id in ids {
            body.put_slice(id.as_bytes());
        }
        let url = self.url_with_token(
            &format!("content/contains/{}", self.config.namespace),
            token,
        )?;
        let response = self
            .send(HttpRequest::post(url, body.freeze(), OCTET_STREAM))
            .await?;
        let flags = response.bytes().await?;

        decode_presence(&flags, ids.len())
    }

    /// Store a compressed payload through the direct endpoint.
    pub async fn store(&self, id: &ContentId, payload: Bytes) -> ClientResult<()> {
        let token = self.token().await?;
        let url = self.url_with_token(
            &format!("content/store/{}/{}", self.config.namespace, id),
            token,
        )?;
        self.send(HttpRequest::post(url, payload, OCTET_STREAM))
            .await?;
        Ok(())
    }

    /// Request a one-time upload URL for a large object.
    pub async fn generate_blobstore_url(&self, id: &ContentId) -> ClientResult<Url> {
        let token = self.token().await?;
        let url = self.url(&format!(
            "content/generate_blobstore_url/{}/{}",
            self.config.namespace, id
        ))?;
        let form = format!("token={}", token.encoded());
        let response = self
            .send(HttpRequest::post(url, form, FORM_URLENCODED))
            .await?;

        let body = response.text().await?;
        let location = body.trim();
        if location.is_empty() {
            return Err(ClientError::Protocol(format!(
                "empty blobstore URL for {id}"
            )));
        }
        // Relative locations are relative to the store.
        self.base_url.join(location).map_err(|e| {
            ClientError::Protocol(format!("invalid blobstore URL {location:?} for {id}: {e}"))
        })
    }

    /// Upload a compressed payload through blobstore redirection.
    ///
    /// A failed POST consumes its URL; a fresh one is generated and the POST
    /// is tried once more before giving up.
    pub async fn upload_to_blobstore(&self, id: &ContentId, payload: Bytes) -> ClientResult<()> {
        let token = self.token().await?;
        let filename = id.to_hex();

        for attempt in 1..=BLOBSTORE_URL_ATTEMPTS {
            let url = self.generate_blobstore_url(id).await?;
            let (content_type, body) = encode_multipart(
                &[("token", token.as_str())],
                FilePart {
                    field: "content",
                    filename: &filename,
                    data: &payload,
                },
            );

            let request = HttpRequest::post(url.clone(), body, content_type);
            let failure = match self.transport.perform(request).await {
                Ok(response) if response.is_success() => return Ok(()),
                Ok(response) => format!("HTTP {}", response.status),
                Err(e) => e.to_string(),
            };
            tracing::warn!(
                id = %id,
                url = %url,
                attempt,
                failure = %failure,
                "Blobstore upload failed"
            );
        }

        Err(ClientError::BlobstoreUpload {
            id: *id,
            attempts: BLOBSTORE_URL_ATTEMPTS,
        })
    }

    /// Start retrieving an object; the body is still compressed.
    pub async fn retrieve(&self, id: &ContentId) -> ClientResult<HttpResponse> {
        let url = self.url(&format!(
            "content/retrieve/{}/{}",
            self.config.namespace, id
        ))?;
        let request = HttpRequest::get(url).with_read_timeout(self.config.download.read_timeout());
        send_with_retry(
            self.transport.as_ref(),
            &self.config.retry,
            &request,
            RetryOn {
                not_found: self.config.download.retry_404,
            },
        )
        .await
    }
}

/// Decode a one-byte-per-item existence response.
fn decode_presence(flags: &[u8], expected: usize) -> ClientResult<Vec<bool>> {
    if flags.len() != expected {
        return Err(ClientError::Protocol(format!(
            "contains returned {} flags for {} items",
            flags.len(),
            expected
        )));
    }
    flags
        .iter()
        .enumerate()
        .map(|(index, flag)| match *flag {
            PRESENT => Ok(true),
            MISSING => Ok(false),
            other => Err(ClientError::Protocol(format!(
                "invalid contains flag {other:#04x} at position {index}"
            ))),
        })
        .collect()
}
