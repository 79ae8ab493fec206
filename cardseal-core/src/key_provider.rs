//! Server public key retrieval and caching.

use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::error::{ErrorCode, SdkError};
use crate::jwk::Jwk;
use crate::transport::{ApiRequest, Transport};

/// Fetches the tokenize service's encryption key and keeps it in the
/// credential store.
///
/// The cached key has no expiry; call [`invalidate`](Self::invalidate) to
/// force the next [`get`](Self::get) to go back to the server.
pub struct KeyProvider {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    public_key_path: String,
}

impl KeyProvider {
    /// `transport` must attach authorization; pass the gateway, not the raw
    /// HTTP transport.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        public_key_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            public_key_path: public_key_path.into(),
        }
    }

    /// Download the current key and cache it.
    ///
    /// # Errors
    ///
    /// - `NETWORK_KEY_FETCH_FAILED` on a non-success status or empty body
    /// - `INTERNAL_SERIALIZATION` if the body is not a JWK
    /// - `SECURITY_INVALID_KEY` if the JWK is not a usable RSA key; nothing
    ///   is cached in that case
    pub async fn fetch(&self) -> Result<Jwk, SdkError> {
        let response = self
            .transport
            .send(ApiRequest::get(&self.public_key_path))
            .await?;

        if !response.is_success() || response.body.trim().is_empty() {
            return Err(SdkError::new(
                ErrorCode::KeyFetchFailed,
                format!("public key request failed with status {}", response.status),
            )
            .with_http_context(response.http_context()));
        }

        let jwk: Jwk = response.json()?;
        jwk.to_rsa_public_key()?;

        self.credentials
            .save_public_key(&serde_json::to_string(&jwk)?)
            .await?;
        tracing::info!("Cached server public key {}", jwk.kid);
        Ok(jwk)
    }

    /// The cached key, fetching it first if none is cached.
    pub async fn get(&self) -> Result<Jwk, SdkError> {
        if let Some(cached) = self.credentials.public_key().await? {
            match serde_json::from_str::<Jwk>(&cached) {
                Ok(jwk) => {
                    tracing::debug!("Using cached public key {}", jwk.kid);
                    return Ok(jwk);
                }
                Err(e) => {
                    tracing::warn!("Cached public key is unreadable, refetching: {}", e);
                }
            }
        }
        self.fetch().await
    }

    /// True iff a key is cached.
    pub async fn is_available(&self) -> Result<bool, SdkError> {
        Ok(self.credentials.public_key().await?.is_some())
    }

    /// Drop the cached key, keeping the session tokens.
    pub async fn invalidate(&self) -> Result<(), SdkError> {
        self.credentials.clear_public_key().await?;
        tracing::debug!("Invalidated cached public key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwe::testutil::test_jwk;
    use crate::store::MemoryStore;
    use crate::transport::{ApiResponse, Method};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replies with a fixed status and body and counts calls.
    struct FixedTransport {
        status: u16,
        body: String,
        calls: Mutex<Vec<String>>,
    }

    impl FixedTransport {
        fn new(status: u16, body: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.into(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
            self.calls.lock().push(request.path.clone());
            Ok(ApiResponse {
                status: self.status,
                method: Method::Get,
                url: format!("https://api.example.com{}", request.path),
                body: self.body.clone(),
            })
        }
    }

    fn credentials() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::unencrypted(Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn test_fetch_caches_key() {
        let jwk = test_jwk();
        let transport = FixedTransport::new(200, serde_json::to_string(&jwk).unwrap());
        let creds = credentials();
        let provider = KeyProvider::new(transport.clone(), creds.clone(), "/v1/keys/public");

        assert!(!provider.is_available().await.unwrap());
        let fetched = provider.fetch().await.unwrap();

        assert_eq!(fetched, jwk);
        assert!(provider.is_available().await.unwrap());
        assert_eq!(transport.calls.lock().as_slice(), ["/v1/keys/public"]);
    }

    #[tokio::test]
    async fn test_get_prefers_cache() {
        let transport = FixedTransport::new(200, serde_json::to_string(&test_jwk()).unwrap());
        let provider = KeyProvider::new(transport.clone(), credentials(), "/v1/keys/public");

        provider.get().await.unwrap();
        provider.get().await.unwrap();

        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let transport = FixedTransport::new(200, serde_json::to_string(&test_jwk()).unwrap());
        let provider = KeyProvider::new(transport.clone(), credentials(), "/v1/keys/public");

        provider.get().await.unwrap();
        provider.invalidate().await.unwrap();
        assert!(!provider.is_available().await.unwrap());

        provider.get().await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_cache_is_refetched() {
        let transport = FixedTransport::new(200, serde_json::to_string(&test_jwk()).unwrap());
        let creds = credentials();
        creds.save_public_key("not a jwk").await.unwrap();
        let provider = KeyProvider::new(transport.clone(), creds, "/v1/keys/public");

        assert_eq!(provider.get().await.unwrap().kid, "test-key-1");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_error_status_is_fetch_failure() {
        let transport = FixedTransport::new(500, "oops");
        let provider = KeyProvider::new(transport, credentials(), "/v1/keys/public");

        let err = provider.fetch().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::KeyFetchFailed);
        assert_eq!(err.http_context().map(|c| c.status_code), Some(500));
        assert!(!provider.is_available().await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_body_is_fetch_failure() {
        let transport = FixedTransport::new(200, "  ");
        let provider = KeyProvider::new(transport, credentials(), "/v1/keys/public");

        assert_eq!(provider.fetch().await.unwrap_err().code(), ErrorCode::KeyFetchFailed);
    }

    #[tokio::test]
    async fn test_unusable_key_is_not_cached() {
        let mut jwk = test_jwk();
        jwk.n = "AQID".to_string();
        let transport = FixedTransport::new(200, serde_json::to_string(&jwk).unwrap());
        let provider = KeyProvider::new(transport, credentials(), "/v1/keys/public");

        assert_eq!(provider.fetch().await.unwrap_err().code(), ErrorCode::InvalidKey);
        assert!(!provider.is_available().await.unwrap());
    }
}
