//! Authorization layer for outgoing API calls.
//!
//! [`AuthGateway`] wraps a [`Transport`] and is itself a transport. Every
//! request except those aimed at the token endpoint gets a bearer token
//! attached; an expired token is refreshed first.
//!
//! # Refresh
//!
//! Refresh is single-flight. Callers note the refresh generation before they
//! read the access token, then queue on one async mutex. Whoever gets the
//! lock first performs the refresh and records its outcome under a new
//! generation; everyone who queued behind it sees the generation has moved
//! and takes the recorded outcome instead of calling the token endpoint
//! again.
//!
//! A failed refresh always clears the stored credentials. Nothing is retried
//! beyond the single refresh attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::credentials::CredentialStore;
use crate::error::{ErrorCode, SdkError};
use crate::jwt;
use crate::store::Secret;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Token endpoint response.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Default)]
struct RefreshSlot {
    generation: u64,
    last: Option<Result<(), SdkError>>,
}

pub struct AuthGateway<T: Transport> {
    inner: T,
    credentials: Arc<CredentialStore>,
    token_path: String,
    generation: AtomicU64,
    refresh: Mutex<RefreshSlot>,
}

impl<T: Transport> AuthGateway<T> {
    pub fn new(inner: T, credentials: Arc<CredentialStore>, token_path: impl Into<String>) -> Self {
        Self {
            inner,
            credentials,
            token_path: token_path.into(),
            generation: AtomicU64::new(0),
            refresh: Mutex::new(RefreshSlot::default()),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// First authentication with client credentials.
    ///
    /// Stores the issued token pair on success.
    ///
    /// # Errors
    ///
    /// - `AUTH_INVALID_CREDENTIALS` if the token endpoint rejects the client
    /// - `INTERNAL_SERIALIZATION` if the response is not a token pair
    /// - transport errors as returned by the inner transport
    pub async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<(), SdkError> {
        let mut slot = self.refresh.lock().await;

        let request = ApiRequest::post_form(
            &self.token_path,
            [
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ],
        );
        let response = self.inner.send(request).await?;

        if !response.is_success() {
            return Err(SdkError::new(
                ErrorCode::InvalidCredentials,
                format!("client credentials rejected with status {}", response.status),
            )
            .with_http_context(response.http_context())
            .with_data("client_id", client_id));
        }

        let tokens: TokenResponse = response.json()?;
        let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| {
            SdkError::new(
                ErrorCode::Serialization,
                "token response did not include a refresh_token",
            )
        })?;

        self.credentials
            .save_tokens(&tokens.access_token, refresh_token)
            .await?;
        self.settle(&mut slot, Ok(()));
        tracing::info!("Authenticated client {}", client_id);
        Ok(())
    }

    /// Forget the session: tokens and cached public key.
    pub async fn logout(&self) -> Result<(), SdkError> {
        let mut slot = self.refresh.lock().await;
        self.credentials.clear().await?;
        self.settle(&mut slot, Err(SdkError::unauthenticated("logged out")));
        tracing::info!("Logged out");
        Ok(())
    }

    /// True when a token pair (or at least one half of it) is stored.
    pub async fn is_authenticated(&self) -> Result<bool, SdkError> {
        self.credentials.has_tokens().await
    }

    /// The access token to attach to a request, refreshing first if needed.
    async fn bearer_token(&self) -> Result<Secret, SdkError> {
        let observed = self.generation.load(Ordering::Acquire);

        match self.credentials.access_token().await? {
            Some(access) if !jwt::is_expired(access.expose()) => {
                tracing::debug!("Attaching cached bearer token");
                Ok(access)
            }
            Some(_) => {
                tracing::debug!("Access token expired, refreshing");
                self.refresh_once(observed).await?;
                self.current_access_token().await
            }
            None => {
                let refresh = self.credentials.refresh_token().await?;
                match refresh {
                    Some(token) if jwt::is_well_formed(token.expose()) => {
                        tracing::debug!("No access token stored, refreshing");
                        self.refresh_once(observed).await?;
                        self.current_access_token().await
                    }
                    _ => Err(SdkError::unauthenticated("no stored credentials")),
                }
            }
        }
    }

    async fn current_access_token(&self) -> Result<Secret, SdkError> {
        self.credentials
            .access_token()
            .await?
            .ok_or_else(|| SdkError::unauthenticated("no access token after refresh"))
    }

    /// Run a refresh unless one completed since `observed`, in which case
    /// return its outcome.
    async fn refresh_once(&self, observed: u64) -> Result<(), SdkError> {
        let mut slot = self.refresh.lock().await;

        if slot.generation != observed {
            if let Some(outcome) = &slot.last {
                tracing::debug!("Reusing outcome of concurrent refresh");
                return outcome.clone();
            }
        }

        let outcome = self.refresh_tokens().await;
        self.settle(&mut slot, outcome.clone());
        outcome
    }

    /// Record a change to the stored tokens. Callers that observed an older
    /// generation take `outcome` instead of refreshing again.
    fn settle(&self, slot: &mut RefreshSlot, outcome: Result<(), SdkError>) {
        slot.generation += 1;
        slot.last = Some(outcome);
        self.generation.store(slot.generation, Ordering::Release);
    }

    async fn refresh_tokens(&self) -> Result<(), SdkError> {
        let result = self.request_new_tokens().await;
        if let Err(e) = &result {
            tracing::error!("Token refresh failed: {}", e);
            if let Err(clear_err) = self.credentials.clear().await {
                tracing::warn!("Failed to clear credentials after refresh failure: {}", clear_err);
            }
        }
        result
    }

    async fn request_new_tokens(&self) -> Result<(), SdkError> {
        let refresh = self
            .credentials
            .refresh_token()
            .await?
            .ok_or_else(|| SdkError::unauthenticated("no refresh token stored"))?;

        let access = self.credentials.access_token().await?;
        let client_id = access
            .as_ref()
            .and_then(|token| jwt::subject(token.expose()))
            .or_else(|| jwt::subject(refresh.expose()))
            .ok_or_else(|| SdkError::unauthenticated("cannot determine client id for refresh"))?;

        let request = ApiRequest::post_form(
            &self.token_path,
            [
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh.expose()),
                ("client_id", client_id.as_str()),
            ],
        );

        let response = self.inner.send(request).await.map_err(|e| {
            SdkError::new(
                ErrorCode::TokenRefreshFailed,
                format!("token refresh request failed: {}", e.message()),
            )
            .with_cause(e)
        })?;

        if !response.is_success() {
            return Err(SdkError::new(
                ErrorCode::RefreshRejected,
                format!("refresh token rejected with status {}", response.status),
            )
            .with_http_context(response.http_context()));
        }

        let tokens: TokenResponse = response.json().map_err(|e| {
            SdkError::new(ErrorCode::TokenRefreshFailed, "unreadable token response").with_cause(e)
        })?;
        let new_refresh = tokens
            .refresh_token
            .as_deref()
            .unwrap_or_else(|| refresh.expose());

        self.credentials
            .save_tokens(&tokens.access_token, new_refresh)
            .await?;
        tracing::info!("Refreshed access token for client {}", client_id);
        Ok(())
    }
}

#[async_trait]
impl<T: Transport> Transport for AuthGateway<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
        if request.path == self.token_path {
            tracing::debug!("Forwarding token endpoint request without authorization");
            return self.inner.send(request).await;
        }

        let token = self.bearer_token().await?;
        self.inner.send(request.with_bearer(token.expose())).await
    }
}

impl<T: Transport> std::fmt::Debug for AuthGateway<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("token_path", &self.token_path)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
