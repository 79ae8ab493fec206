//! # Cardseal Core
//!
//! Client core for the Cardseal card tokenization API.
//!
//! This crate provides:
//! - Encrypted-at-rest persistence of the session tokens and server key
//! - An authorizing transport that attaches bearer tokens and refreshes
//!   expired ones exactly once, however many requests notice the expiry
//! - JWE (`RSA-OAEP-256` / `A256GCM`) envelope encryption of card data
//! - Card validation and the tokenize call
//! - Structured errors with stable codes and host-registered reporters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cardseal_core::{CardRecord, Cardseal, load_config};
//!
//! async fn tokenize(pan: &str) -> Result<String, cardseal_core::SdkError> {
//!     let cardseal = Cardseal::builder(load_config()?).build()?;
//!     let card = CardRecord::new(pan, "06", "27", "123");
//!     Ok(cardseal.tokenize(&card, false).await?.token)
//! }
//! ```

pub mod card;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod jwe;
pub mod jwk;
pub mod jwt;
pub mod key_provider;
pub mod report;
pub mod store;
pub mod tokenize;
pub mod transport;

// Re-export commonly used types at crate root
pub use card::{
    CardRecord,
    TokenResult,
    TokenizeRequest,
};

pub use client::{
    Cardseal,
    CardsealBuilder,
};

pub use config::{
    CardsealConfig,
    StorageBackend,
    StorageConfig,
    load_config,
    load_config_from,
};

pub use credentials::{
    CredentialStore,
    DecryptFailurePolicy,
    Protection,
};

pub use error::{
    ErrorCode,
    ErrorKind,
    HttpContext,
    SdkError,
};

pub use gateway::{
    AuthGateway,
    TokenResponse,
};

pub use jwe::EnvelopeEncryptor;
pub use jwk::Jwk;
pub use key_provider::KeyProvider;

pub use report::{
    ErrorReporter,
    FnReporter,
    Reporters,
};

pub use store::{
    FileStore,
    MasterKeySource,
    MemoryStore,
    Secret,
    SecretStore,
    StaticMasterKey,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::{
    KeyringMasterKey,
    KeyringStore,
};

pub use tokenize::TokenizationCoordinator;

pub use transport::{
    ApiRequest,
    ApiResponse,
    HttpTransport,
    Method,
    RequestBody,
    Transport,
    TransportError,
};
