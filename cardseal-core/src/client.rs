//! The host-facing handle.
//!
//! A [`Cardseal`] owns every component and is built once from a
//! [`CardsealConfig`] plus whatever capabilities the host injects: a
//! transport, a persistence backend, a master key source and error
//! reporters. Anything not injected is derived from the configuration.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), cardseal_core::SdkError> {
//! use cardseal_core::{CardRecord, Cardseal, CardsealConfig, FnReporter, SdkError};
//!
//! let cardseal = Cardseal::builder(CardsealConfig::with_base_url("https://api.example.com"))
//!     .reporter(FnReporter::new(|e: &SdkError| eprintln!("cardseal error: {}", e.code())))
//!     .build()?;
//!
//! cardseal.authenticate("client-id", "client-secret").await?;
//! let card = CardRecord::new("4444444444444448", "06", "27", "123");
//! let result = cardseal.tokenize(&card, false).await?;
//! println!("token: {}", result.token);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::card::{CardRecord, TokenResult};
use crate::config::{CardsealConfig, StorageBackend};
use crate::credentials::{CredentialStore, Protection};
use crate::error::SdkError;
use crate::gateway::AuthGateway;
use crate::jwe::EnvelopeEncryptor;
use crate::jwk::Jwk;
use crate::key_provider::KeyProvider;
use crate::report::{ErrorReporter, Reporters};
use crate::store::{MasterKeySource, SecretStore, StaticMasterKey, create_store};
use crate::tokenize::TokenizationCoordinator;
use crate::transport::{HttpTransport, Transport};

pub struct Cardseal {
    config: CardsealConfig,
    credentials: Arc<CredentialStore>,
    gateway: Arc<AuthGateway<Arc<dyn Transport>>>,
    keys: Arc<KeyProvider>,
    tokenizer: TokenizationCoordinator,
    reporters: Reporters,
}

impl Cardseal {
    pub fn builder(config: CardsealConfig) -> CardsealBuilder {
        CardsealBuilder::new(config)
    }

    pub fn config(&self) -> &CardsealConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Whether credentials are encrypted at rest.
    pub fn protection(&self) -> Protection {
        self.credentials.protection()
    }

    /// The authorizing transport, for host calls to other API endpoints.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.gateway.clone()
    }

    /// Exchange client credentials for a session.
    pub async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<(), SdkError> {
        self.reporters
            .observe(self.gateway.authenticate(client_id, client_secret).await)
    }

    /// Clear tokens and the cached public key.
    pub async fn logout(&self) -> Result<(), SdkError> {
        self.reporters.observe(self.gateway.logout().await)
    }

    pub async fn is_authenticated(&self) -> Result<bool, SdkError> {
        self.reporters.observe(self.gateway.is_authenticated().await)
    }

    /// Download and cache the server's current public key.
    pub async fn fetch_public_key(&self) -> Result<Jwk, SdkError> {
        self.reporters.observe(self.keys.fetch().await)
    }

    pub async fn public_key_available(&self) -> Result<bool, SdkError> {
        self.reporters.observe(self.keys.is_available().await)
    }

    /// Forget the cached public key so the next tokenize refetches it.
    pub async fn invalidate_public_key(&self) -> Result<(), SdkError> {
        self.reporters.observe(self.keys.invalidate().await)
    }

    pub fn validate_card(&self, card: &CardRecord) -> Result<(), SdkError> {
        self.reporters.observe(self.tokenizer.validate(card))
    }

    pub async fn tokenize(&self, card: &CardRecord, permanent: bool) -> Result<TokenResult, SdkError> {
        self.reporters
            .observe(self.tokenizer.tokenize(card, permanent).await)
    }
}

impl std::fmt::Debug for Cardseal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cardseal")
            .field("base_url", &self.config.base_url)
            .field("credentials", &self.credentials)
            .field("reporters", &self.reporters)
            .finish()
    }
}

pub struct CardsealBuilder {
    config: CardsealConfig,
    transport: Option<Arc<dyn Transport>>,
    secret_store: Option<Arc<dyn SecretStore>>,
    master_key: Option<Arc<dyn MasterKeySource>>,
    reporters: Vec<Arc<dyn ErrorReporter>>,
}

impl CardsealBuilder {
    fn new(config: CardsealConfig) -> Self {
        Self {
            config,
            transport: None,
            secret_store: None,
            master_key: None,
            reporters: Vec::new(),
        }
    }

    /// Use `transport` instead of an HTTP transport built from the config.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Persist credentials in `store` instead of the configured backend.
    pub fn secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secret_store = Some(store);
        self
    }

    pub fn master_key(mut self, source: impl MasterKeySource + 'static) -> Self {
        self.master_key = Some(Arc::new(source));
        self
    }

    pub fn reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporters.push(Arc::new(reporter));
        self
    }

    /// Assemble the handle.
    ///
    /// Without an injected master key, the OS keyring supplies one; a
    /// memory backend gets a random per-process key since its contents do
    /// not outlive the process anyway.
    ///
    /// # Errors
    ///
    /// - `CONFIG_INVALID_PARAMETER` for an invalid configuration
    /// - `SECURITY_KEYSTORE_UNAVAILABLE` if no master key can be obtained
    ///   and `storage.allow_unencrypted` is off
    /// - storage errors from opening the backend
    pub fn build(self) -> Result<Cardseal, SdkError> {
        let reporters = Reporters::new(self.reporters);
        let assembled = Self::assemble(
            self.config,
            self.transport,
            self.secret_store,
            self.master_key,
            reporters.clone(),
        );
        reporters.observe(assembled)
    }

    fn assemble(
        config: CardsealConfig,
        transport: Option<Arc<dyn Transport>>,
        secret_store: Option<Arc<dyn SecretStore>>,
        master_key: Option<Arc<dyn MasterKeySource>>,
        reporters: Reporters,
    ) -> Result<Cardseal, SdkError> {
        config.validate()?;

        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::from_config(&config)?),
        };

        let backend = match secret_store {
            Some(store) => store,
            None => create_store(&config.storage)?,
        };

        let master_key = master_key.or_else(|| default_master_key(&config));
        let credentials = Arc::new(CredentialStore::open(
            backend,
            master_key.as_deref(),
            &config.storage,
        )?);

        let gateway = Arc::new(AuthGateway::new(
            transport,
            credentials.clone(),
            config.token_path.clone(),
        ));
        let authorized: Arc<dyn Transport> = gateway.clone();

        let keys = Arc::new(KeyProvider::new(
            authorized.clone(),
            credentials.clone(),
            config.public_key_path.clone(),
        ));
        let tokenizer = TokenizationCoordinator::new(
            authorized,
            keys.clone(),
            EnvelopeEncryptor::new(credentials.clone()),
            config.tokenize_path.clone(),
        );

        tracing::debug!(
            "Cardseal ready for {} (protection: {:?})",
            config.base_url,
            credentials.protection()
        );

        Ok(Cardseal {
            config,
            credentials,
            gateway,
            keys,
            tokenizer,
            reporters,
        })
    }
}

fn default_master_key(config: &CardsealConfig) -> Option<Arc<dyn MasterKeySource>> {
    if config.storage.backend == StorageBackend::Memory {
        return Some(Arc::new(StaticMasterKey::random()));
    }

    #[cfg(feature = "keyring-store")]
    let source: Option<Arc<dyn MasterKeySource>> = Some(Arc::new(
        crate::store::KeyringMasterKey::new(config.storage.keyring_service.clone()),
    ));
    #[cfg(not(feature = "keyring-store"))]
    let source: Option<Arc<dyn MasterKeySource>> = None;

    source
}

impl std::fmt::Debug for CardsealBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardsealBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_store", &self.secret_store.is_some())
            .field("custom_master_key", &self.master_key.is_some())
            .field("reporters", &self.reporters.len())
            .finish()
    }
}
