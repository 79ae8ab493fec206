//! HTTP transport abstraction.
//!
//! Components speak to the Cardseal API through the [`Transport`] trait so
//! the authorization layer can wrap any transport and tests can substitute
//! an in-process fake. [`HttpTransport`] is the production implementation
//! over `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::CardsealConfig;
use crate::error::{HttpContext, SdkError};

/// Errors raised below the HTTP layer, before any response exists.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("TLS failure: {message}")]
    Tls { message: String },

    #[error("connection failed: {message}")]
    Connect { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Json(_) => f.write_str("Json([REDACTED])"),
            RequestBody::Form(pairs) => {
                let names: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
                f.debug_tuple("Form").field(&names).finish()
            }
        }
    }
}

/// A request relative to the API base URL.
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path beginning with `/`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            headers: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn post_form<K, V>(path: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: Method::Post,
            path: path.into(),
            headers: Vec::new(),
            body: RequestBody::Form(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Form field value, if the body is a form.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(pairs) => pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &header_names)
            .field("body", &self.body)
            .finish()
    }
}

/// A completed HTTP exchange. Any status code counts as a response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub method: Method,
    pub url: String,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn http_context(&self) -> HttpContext {
        HttpContext {
            status_code: self.status,
            request_url: self.url.clone(),
            request_method: self.method.as_str().to_string(),
            response_body: if self.body.is_empty() {
                None
            } else {
                Some(self.body.clone())
            },
        }
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SdkError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the response, whatever its status.
    ///
    /// Errors mean no usable response was obtained.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
        (**self).send(request).await
    }
}

/// `reqwest`-backed transport bound to one API origin.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: url::Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = url::Url::parse(base_url).map_err(|e| TransportError::InvalidRequest {
            message: format!("invalid base URL {}: {}", base_url, e),
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Tls {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &CardsealConfig) -> Result<Self, TransportError> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<url::Url, TransportError> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        url::Url::parse(&joined).map_err(|e| TransportError::InvalidRequest {
            message: format!("invalid request path {}: {}", path, e),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
        let url = self.url_for(&request.path)?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url.clone()),
            Method::Post => self.client.post(url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        tracing::debug!("{} {}", request.method, request.path);

        let response = builder
            .send()
            .await
            .map_err(|e| classify(url.as_str(), e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportError::Io {
            message: format!("failed to read response body: {}", e),
        })?;

        tracing::debug!("{} {} -> {}", request.method, request.path, status);

        Ok(ApiResponse {
            status,
            method: request.method,
            url: url.to_string(),
            body,
        })
    }
}

fn classify(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout {
            url: url.to_string(),
        };
    }

    let mut chain = String::new();
    let mut source: Option<&dyn std::error::Error> = Some(&err);
    while let Some(e) = source {
        chain.push_str(&e.to_string().to_ascii_lowercase());
        chain.push(' ');
        source = e.source();
    }

    if chain.contains("certificate") || chain.contains("tls") {
        TransportError::Tls {
            message: err.to_string(),
        }
    } else if err.is_connect() {
        TransportError::Connect {
            message: err.to_string(),
        }
    } else if err.is_builder() {
        TransportError::InvalidRequest {
            message: err.to_string(),
        }
    } else {
        TransportError::Io {
            message: err.to_string(),
        }
    }
}
