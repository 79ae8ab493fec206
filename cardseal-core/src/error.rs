//! Structured error type shared by every Cardseal operation.
//!
//! Every failure that leaves the core is an [`SdkError`]: a stable
//! [`ErrorCode`] consumers may branch on, a human readable message, and
//! optional cause, HTTP context and free-form additional data.
//!
//! Codes are grouped by prefix into an [`ErrorKind`] so a host can tell
//! "needs re-authentication" apart from "transient network issue" and
//! "integration mistake" without matching every individual code.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Broad category of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Expired or missing tokens, failed refresh, invalid credentials.
    Authentication,
    /// Timeouts, HTTP failures, TLS and I/O problems.
    Network,
    /// Missing setup or invalid parameters.
    Configuration,
    /// Payment method and tokenization failures.
    Payment,
    /// Card data rejected by the server.
    Card,
    /// Malformed input fields caught before any network work.
    Validation,
    /// Keystore, key material and certificate failures.
    Security,
    /// Serialization, storage and concurrency faults.
    Internal,
}

/// Stable error codes.
///
/// The string form returned by [`as_str`](ErrorCode::as_str) is part of the
/// public contract and never changes for an existing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    // Authentication
    Unauthenticated,
    TokenExpired,
    RefreshRejected,
    TokenRefreshFailed,
    InvalidCredentials,
    MalformedToken,

    // Network
    Timeout,
    ClientError,
    ServerError,
    TlsFailure,
    Io,
    KeyFetchFailed,

    // Configuration
    NotInitialized,
    InvalidParameter,
    NoPublicKey,

    // Payment / card
    InvalidPaymentMethod,
    TokenizationFailed,
    CardInvalid,

    // Validation
    InvalidPan,
    InvalidExpiryMonth,
    InvalidExpiryYear,
    InvalidCvv,

    // Security
    KeystoreUnavailable,
    DecryptionFailed,
    EncryptionFailed,
    InvalidKey,
    TrustFailure,

    // Internal
    Serialization,
    Storage,
    Concurrency,
    NotImplemented,
}

impl ErrorCode {
    /// The stable string constant for this code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "AUTH_UNAUTHENTICATED",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::RefreshRejected => "AUTH_REFRESH_REJECTED",
            Self::TokenRefreshFailed => "AUTH_TOKEN_REFRESH_FAILED",
            Self::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::MalformedToken => "AUTH_MALFORMED_TOKEN",
            Self::Timeout => "NETWORK_TIMEOUT",
            Self::ClientError => "NETWORK_CLIENT_ERROR",
            Self::ServerError => "NETWORK_SERVER_ERROR",
            Self::TlsFailure => "NETWORK_TLS_FAILURE",
            Self::Io => "NETWORK_IO",
            Self::KeyFetchFailed => "NETWORK_KEY_FETCH_FAILED",
            Self::NotInitialized => "CONFIG_NOT_INITIALIZED",
            Self::InvalidParameter => "CONFIG_INVALID_PARAMETER",
            Self::NoPublicKey => "CONFIG_NO_PUBLIC_KEY",
            Self::InvalidPaymentMethod => "PAYMENT_INVALID_METHOD",
            Self::TokenizationFailed => "PAYMENT_TOKENIZATION_FAILED",
            Self::CardInvalid => "CARD_INVALID",
            Self::InvalidPan => "VALIDATION_INVALID_PAN",
            Self::InvalidExpiryMonth => "VALIDATION_INVALID_EXPIRY_MONTH",
            Self::InvalidExpiryYear => "VALIDATION_INVALID_EXPIRY_YEAR",
            Self::InvalidCvv => "VALIDATION_INVALID_CVV",
            Self::KeystoreUnavailable => "SECURITY_KEYSTORE_UNAVAILABLE",
            Self::DecryptionFailed => "SECURITY_DECRYPTION_FAILED",
            Self::EncryptionFailed => "SECURITY_ENCRYPTION_FAILED",
            Self::InvalidKey => "SECURITY_INVALID_KEY",
            Self::TrustFailure => "SECURITY_TRUST_FAILURE",
            Self::Serialization => "INTERNAL_SERIALIZATION",
            Self::Storage => "INTERNAL_STORAGE",
            Self::Concurrency => "INTERNAL_CONCURRENCY",
            Self::NotImplemented => "INTERNAL_NOT_IMPLEMENTED",
        }
    }

    /// The category this code belongs to.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated
            | Self::TokenExpired
            | Self::RefreshRejected
            | Self::TokenRefreshFailed
            | Self::InvalidCredentials
            | Self::MalformedToken => ErrorKind::Authentication,
            Self::Timeout
            | Self::ClientError
            | Self::ServerError
            | Self::TlsFailure
            | Self::Io
            | Self::KeyFetchFailed => ErrorKind::Network,
            Self::NotInitialized | Self::InvalidParameter | Self::NoPublicKey => {
                ErrorKind::Configuration
            }
            Self::InvalidPaymentMethod | Self::TokenizationFailed => ErrorKind::Payment,
            Self::CardInvalid => ErrorKind::Card,
            Self::InvalidPan
            | Self::InvalidExpiryMonth
            | Self::InvalidExpiryYear
            | Self::InvalidCvv => ErrorKind::Validation,
            Self::KeystoreUnavailable
            | Self::DecryptionFailed
            | Self::EncryptionFailed
            | Self::InvalidKey
            | Self::TrustFailure => ErrorKind::Security,
            Self::Serialization | Self::Storage | Self::Concurrency | Self::NotImplemented => {
                ErrorKind::Internal
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP details attached to errors raised from a server response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpContext {
    pub status_code: u16,
    pub request_url: String,
    pub request_method: String,
    pub response_body: Option<String>,
}

/// A structured Cardseal error.
///
/// Immutable once built; clones share the underlying cause, which lets one
/// refresh outcome be handed to every caller that waited on it.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct SdkError {
    code: ErrorCode,
    message: String,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    http_context: Option<HttpContext>,
    additional_data: BTreeMap<String, String>,
}

impl SdkError {
    /// Create an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            http_context: None,
            additional_data: BTreeMap::new(),
        }
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attach HTTP request/response details.
    pub fn with_http_context(mut self, context: HttpContext) -> Self {
        self.http_context = Some(context);
        self
    }

    /// Attach a free-form key/value pair.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_context(&self) -> Option<&HttpContext> {
        self.http_context.as_ref()
    }

    pub fn additional_data(&self) -> &BTreeMap<String, String> {
        &self.additional_data
    }

    /// True when the host should send the user back through authentication.
    pub fn needs_reauthentication(&self) -> bool {
        self.kind() == ErrorKind::Authentication
            && !matches!(self.code, ErrorCode::TokenRefreshFailed)
    }

    /// True for transient failures that may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Timeout
                | ErrorCode::ServerError
                | ErrorCode::Io
                | ErrorCode::KeyFetchFailed
                | ErrorCode::TokenRefreshFailed
        )
    }
}

impl From<StoreError> for SdkError {
    fn from(err: StoreError) -> Self {
        let code = match &err {
            StoreError::Decryption { .. } => ErrorCode::DecryptionFailed,
            StoreError::Encryption { .. } => ErrorCode::EncryptionFailed,
            StoreError::KeyringUnavailable { .. } => ErrorCode::KeystoreUnavailable,
            StoreError::SerializationError(_) => ErrorCode::Serialization,
            StoreError::NotFound { .. }
            | StoreError::AccessDenied { .. }
            | StoreError::BackendError { .. }
            | StoreError::Io(_) => ErrorCode::Storage,
        };
        Self::new(code, err.to_string()).with_cause(err)
    }
}

impl From<TransportError> for SdkError {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::Timeout { .. } => ErrorCode::Timeout,
            TransportError::Tls { .. } => ErrorCode::TlsFailure,
            TransportError::Connect { .. } | TransportError::Io { .. } => ErrorCode::Io,
            TransportError::InvalidRequest { .. } => ErrorCode::InvalidParameter,
        };
        Self::new(code, err.to_string()).with_cause(err)
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Serialization, format!("serialization error: {}", err))
            .with_cause(err)
    }
}
