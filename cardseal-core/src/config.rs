//! Cardseal configuration.
//!
//! Loaded from `cardseal.toml` in the platform configuration directory, or
//! built in code by the host application.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::credentials::DecryptFailurePolicy;
use crate::error::{ErrorCode, SdkError};

/// Environment variable that overrides [`CardsealConfig::base_url`].
pub const BASE_URL_ENV: &str = "CARDSEAL_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CardsealConfig {
    /// API origin, e.g. `https://api.example.com`.
    pub base_url: String,

    /// Path of the token-issuance endpoint. Requests to it bypass
    /// authorization.
    pub token_path: String,

    /// Path of the public-key (JWK) endpoint.
    pub public_key_path: String,

    /// Path of the tokenize endpoint.
    pub tokenize_path: String,

    /// Per-request timeout applied by the HTTP transport.
    pub request_timeout_secs: u64,

    pub storage: StorageConfig,
}

impl Default for CardsealConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cardseal.example".to_string(),
            token_path: "/oauth/token".to_string(),
            public_key_path: "/v1/keys/public".to_string(),
            tokenize_path: "/v1/tokenize".to_string(),
            request_timeout_secs: 30,
            storage: StorageConfig::default(),
        }
    }
}

/// Where credentials are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Directory for the file backend. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,

    /// Keyring service name for both the keyring backend and the master key.
    pub keyring_service: String,

    /// Permit running without at-rest encryption when no keystore is
    /// reachable. Off by default: opening the store fails instead.
    pub allow_unencrypted: bool,

    /// What to return when a stored value cannot be decrypted.
    pub decrypt_failure: DecryptFailurePolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: None,
            keyring_service: "cardseal".to_string(),
            allow_unencrypted: false,
            decrypt_failure: DecryptFailurePolicy::Fail,
        }
    }
}

impl StorageConfig {
    /// The data directory, falling back to `.cardseal` when the platform has
    /// no home directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".cardseal"))
        })
    }
}

impl CardsealConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, SdkError> {
        toml::from_str(contents).map_err(|e| {
            SdkError::new(
                ErrorCode::InvalidParameter,
                format!("invalid configuration: {}", e),
            )
            .with_cause(e)
        })
    }

    /// Create a configuration pointing at `base_url` with default paths.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Check the values a transport depends on.
    pub fn validate(&self) -> Result<(), SdkError> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            SdkError::new(
                ErrorCode::InvalidParameter,
                format!("base_url is not a valid URL: {}", e),
            )
            .with_data("field", "base_url")
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SdkError::new(
                ErrorCode::InvalidParameter,
                format!("base_url must be http or https, got {}", parsed.scheme()),
            )
            .with_data("field", "base_url"));
        }

        for (field, path) in [
            ("token_path", &self.token_path),
            ("public_key_path", &self.public_key_path),
            ("tokenize_path", &self.tokenize_path),
        ] {
            if !path.starts_with('/') {
                return Err(SdkError::new(
                    ErrorCode::InvalidParameter,
                    format!("{} must start with '/'", field),
                )
                .with_data("field", field));
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(SdkError::new(
                ErrorCode::InvalidParameter,
                "request_timeout_secs must be positive",
            )
            .with_data("field", "request_timeout_secs"));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            if !base_url.is_empty() {
                tracing::debug!("Using base URL from {}", BASE_URL_ENV);
                self.base_url = base_url;
            }
        }
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("cardseal.toml"))
        .unwrap_or_else(|| PathBuf::from("cardseal.toml"))
}

/// Load configuration from the default location or fall back to defaults.
pub fn load_config() -> Result<CardsealConfig, SdkError> {
    load_config_from(&default_config_path())
}

/// Load configuration from `path`; a missing file yields defaults.
///
/// `CARDSEAL_BASE_URL` overrides the file in both cases.
pub fn load_config_from(path: &Path) -> Result<CardsealConfig, SdkError> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SdkError::new(
                ErrorCode::InvalidParameter,
                format!("failed to read config from {:?}: {}", path, e),
            )
            .with_cause(e)
        })?;
        CardsealConfig::from_toml_str(&contents)?
    } else {
        CardsealConfig::default()
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "cardseal", "cardseal")
}
