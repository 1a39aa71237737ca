use super::error::ApiError;
use super::types::Verb;
use crate::util::{is_loopback, validate_base_url, UrlValidationError};
use futures::StreamExt;
use reqwest::header::{ACCEPT, ALLOW, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const MAX_BODY_SIZE: usize = 1024 * 1024; // 1MB

/// Body encodings used by the category endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    Json(Vec<u8>),
    /// `application/x-www-form-urlencoded` payload
    Form(String),
}

/// A fully described request relative to the backend base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub verb: Verb,
    /// Path segments appended to the base URL, unescaped
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(verb: Verb, segments: Vec<String>) -> Self {
        Self {
            verb,
            segments,
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Human-readable `VERB /path` for logs.
    pub fn describe(&self) -> String {
        format!("{} /{}", self.verb, self.segments.join("/"))
    }
}

/// Status, `Allow` header and body of a completed request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub allow: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Thin request executor for the category backend.
///
/// Every call carries the same fixed timeout, covering both the send and
/// the body read. Cloning is cheap: the reqwest client and token are shared.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    api_token: Option<Arc<SecretString>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Transport {
    /// Create a transport rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`UrlValidationError`] if the base URL is not a usable
    /// http(s) URL.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        api_token: Option<SecretString>,
    ) -> Result<Self, UrlValidationError> {
        let base_url = validate_base_url(base_url)?;

        if base_url.scheme() != "https" && !is_loopback(&base_url) {
            tracing::warn!(base_url = %base_url, "Using non-HTTPS base URL for a remote backend");
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            timeout,
            api_token: api_token.map(Arc::new),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the absolute URL for a request.
    pub fn url_for(&self, request: &ApiRequest) -> Url {
        let mut url = self.base_url.clone();
        // Validated base URLs always have a host, so they can carry segments
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(request.segments.iter());
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        url
    }

    /// Execute a request and return whatever status the server produced.
    ///
    /// # Errors
    ///
    /// Only transport failures are errors here:
    /// - [`ApiError::Timeout`] - no complete response within the timeout
    /// - [`ApiError::Network`] - connection, TLS or body stream errors
    /// - [`ApiError::ResponseTooLarge`] - body exceeded 1MB
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url_for(request);
        let mut builder = self
            .client
            .request(request.verb.to_method(), url.clone())
            .header(ACCEPT, "application/json");

        if let Some(token) = &self.api_token {
            builder = builder.header(
                AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(bytes.clone()),
            RequestBody::Form(encoded) => builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encoded.clone()),
        };

        tracing::trace!(request = %request.describe(), url = %url, "Sending request");

        let response = tokio::time::timeout(self.timeout, async {
            let response = builder.send().await.map_err(ApiError::Network)?;
            let status = response.status().as_u16();
            let allow = response
                .headers()
                .get(ALLOW)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = read_limited_bytes(response, MAX_BODY_SIZE).await?;
            Ok::<_, ApiError>(ApiResponse {
                status,
                allow,
                body,
            })
        })
        .await
        .map_err(|_| ApiError::Timeout(self.timeout))??;

        tracing::debug!(
            request = %request.describe(),
            status = response.status,
            bytes = response.body.len(),
            "Request completed"
        );

        Ok(response)
    }

    /// Execute a request, treating any non-2xx status as an error.
    ///
    /// # Errors
    ///
    /// Transport failures as in [`Transport::execute`], plus
    /// [`ApiError::HttpRejection`] carrying the status and response body.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.execute(request).await?;
        if !response.is_success() {
            return Err(ApiError::HttpRejection {
                status: response.status,
                body: response.text(),
            });
        }
        Ok(response)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ApiError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ApiError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
