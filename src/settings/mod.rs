//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. Examples of
//! configuration files can be found in the `configs/` directory located in the repository root.
//!
//! The shared key is never part of a configuration file in the repository. Set it with the
//! `SEALED_EVAL_CRYPTO__KEY` environment variable.

use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment};
use redis::IntoConnectionInfo;
use serde::{
    de::{self, DeserializeOwned, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{client::RetryPolicy, crypto::SharedKey};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Loads the settings from a configuration file and the environment.
fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let mut config = Config::new();
    config.merge(config::File::from(path.as_ref()))?;
    config.merge(Environment::with_prefix("sealed_eval").separator("__"))?;
    config.try_into()
}

#[derive(Debug, Validate, Deserialize)]
#[validate(schema(function = "validate_developer"))]
/// The settings of the developer coordinator.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct DeveloperSettings {
    #[validate]
    pub api: ApiSettings,
    pub log: LoggingSettings,
    pub crypto: CryptoSettings,
    #[validate]
    pub peer: PeerSettings,
    #[validate]
    pub storage: StorageSettings,
}

impl DeveloperSettings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Self = load(path)?;
        settings.validate()?;
        Ok(settings)
    }
}

fn validate_developer(s: &DeveloperSettings) -> Result<(), ValidationError> {
    if s.storage.backend == StorageBackend::Redis {
        return Err(ValidationError::new(
            "the developer supports the memory and filesystem backends only",
        ));
    }
    Ok(())
}

#[derive(Debug, Validate, Deserialize)]
/// The settings of the evaluator coordinator.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct EvaluatorSettings {
    #[validate]
    pub api: ApiSettings,
    pub log: LoggingSettings,
    pub crypto: CryptoSettings,
    #[validate]
    pub peer: PeerSettings,
    #[validate]
    pub storage: StorageSettings,
    pub dataset: DatasetSettings,
    #[validate]
    pub workers: WorkerSettings,
    #[validate]
    #[serde(default)]
    pub delivery: DeliverySettings,
}

impl EvaluatorSettings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Self = load(path)?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// REST API settings.
pub struct ApiSettings {
    /// The address to which the REST API should be bound.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// bind_address = "0.0.0.0:5000"
    /// # or
    /// bind_address = "127.0.0.1:5000"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SEALED_EVAL_API__BIND_ADDRESS=127.0.0.1:5000
    /// ```
    pub bind_address: SocketAddr,

    /// The maximum size of a request body in bytes. Defaults to 256 MiB.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// max_upload_size = 1073741824
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SEALED_EVAL_API__MAX_UPLOAD_SIZE=1073741824
    /// ```
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// The origins from which browsers may call the REST API. `"*"` allows any origin, which is
    /// the default.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// cors_origins = ["http://localhost:3000"]
    /// ```
    #[serde(default = "default_cors_origins")]
    #[validate(custom = "validate_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_max_upload_size() -> u64 {
    256 * 1024 * 1024
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// Accepts `"*"` and `http(s)://host[:port]` origins.
fn validate_cors_origins(origins: &[String]) -> Result<(), ValidationError> {
    for origin in origins.iter().filter(|origin| *origin != "*") {
        let authority = origin
            .strip_prefix("http://")
            .or_else(|| origin.strip_prefix("https://"));
        match authority {
            Some(authority)
                if !authority.is_empty()
                    && !authority.contains('/')
                    && validator::validate_url(origin.as_str()) => {}
            _ => return Err(ValidationError::new("invalid CORS origin")),
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
/// Settings of the shared secret.
pub struct CryptoSettings {
    /// The base64 encoded 32 byte key shared by both parties.
    ///
    /// # Examples
    ///
    /// **Environment variable**
    /// ```text
    /// SEALED_EVAL_CRYPTO__KEY=<base64 encoded key>
    /// ```
    #[serde(deserialize_with = "deserialize_shared_key")]
    pub key: SharedKey,
}

fn deserialize_shared_key<'de, D>(deserializer: D) -> Result<SharedKey, D::Error>
where
    D: Deserializer<'de>,
{
    struct SharedKeyVisitor;

    impl<'de> Visitor<'de> for SharedKeyVisitor {
        type Value = SharedKey;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a base64 encoded {} byte key", SharedKey::LENGTH)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            // the value must not end up in the error message
            SharedKey::from_base64(value).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_str(SharedKeyVisitor)
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Settings to reach the other party.
pub struct PeerSettings {
    /// The base URL of the peer's REST API.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [peer]
    /// url = "http://127.0.0.1:5001"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SEALED_EVAL_PEER__URL=http://127.0.0.1:5001
    /// ```
    #[validate(url)]
    pub url: String,

    /// The timeout of a request to the peer in seconds, between 1 and 300. Defaults to 30.
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    30
}

impl PeerSettings {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// The available storage backends.
pub enum StorageBackend {
    /// Everything is lost when the process exits.
    Memory,
    /// Everything is kept below `storage.path`.
    Filesystem,
    /// Task records are kept in Redis, everything else below `storage.path`.
    Redis,
}

#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_storage"))]
/// Storage settings.
pub struct StorageSettings {
    /// The storage backend.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [storage]
    /// backend = "filesystem"
    /// path = "/var/lib/sealed-eval"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SEALED_EVAL_STORAGE__BACKEND=redis
    /// SEALED_EVAL_STORAGE__REDIS_URL=redis://127.0.0.1/
    /// ```
    pub backend: StorageBackend,

    /// The root directory of the filesystem storage. Defaults to `./data`.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// The URL where Redis is running. Required by the `redis` backend.
    ///
    /// The format of the URL is `redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]`.
    #[serde(default)]
    pub redis_url: Option<String>,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data")
}

fn validate_storage(s: &StorageSettings) -> Result<(), ValidationError> {
    match (s.backend, &s.redis_url) {
        (StorageBackend::Redis, None) => Err(ValidationError::new("missing redis url")),
        (StorageBackend::Redis, Some(url)) if url.as_str().into_connection_info().is_err() => {
            Err(ValidationError::new("invalid redis url"))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Deserialize, Clone)]
/// Settings of the evaluation dataset.
pub struct DatasetSettings {
    /// The path to the JSON dataset of labelled texts.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [dataset]
    /// path = "datasets/clinical_notes.json"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SEALED_EVAL_DATASET__PATH=datasets/clinical_notes.json
    /// ```
    pub path: PathBuf,
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
/// Settings of the evaluation workers.
pub struct WorkerSettings {
    /// The number of evaluations running at once, between 1 and 64.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [workers]
    /// count = 2
    /// queue_capacity = 64
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SEALED_EVAL_WORKERS__COUNT=2
    /// SEALED_EVAL_WORKERS__QUEUE_CAPACITY=64
    /// ```
    #[validate(range(min = 1, max = 64))]
    pub count: usize,

    /// The number of accepted evaluations waiting for a worker. Further requests are refused
    /// until a slot frees up.
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
/// Settings of the result delivery.
pub struct DeliverySettings {
    /// The number of retries after a failed delivery, at most 3. Defaults to 3.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [delivery]
    /// retries = 3
    /// backoff = 500
    /// ```
    #[validate(range(max = 3))]
    pub retries: u32,

    /// The pause before the first retry in milliseconds. Defaults to 500.
    pub backoff: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: 500,
        }
    }
}

impl From<DeliverySettings> for RetryPolicy {
    fn from(settings: DeliverySettings) -> Self {
        Self {
            retries: settings.retries,
            backoff: Duration::from_millis(settings.backoff),
        }
    }
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// SEALED_EVAL_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3.1/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.3.1/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

#[cfg(test)]
mod tests;
