use config_rs::{Config as ConfigTree, ConfigError, Environment, File};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub api_base_url: String,
    pub lookup_chunk_size: NonZeroUsize,
    pub ids_page_size: NonZeroUsize,
    pub request_timeout_secs: u64,
    pub max_requests_per_minute: NonZeroU32,
    pub max_retries: usize,
}

impl Configurable for Settings {
    fn key() -> &'static str {
        // Root key
        "real_friends"
    }
}

pub const ENVIRONMENT_PREFIX: &str = "APP";
pub const CONFIG_SEPARATOR: &str = "__";

#[must_use]
pub fn environment() -> String {
    env::var(format!("{ENVIRONMENT_PREFIX}{CONFIG_SEPARATOR}ENVIRONMENT"))
        .unwrap_or_else(|_| "development".into())
}

pub trait Configurable {
    fn key() -> &'static str;
}

#[derive(Debug, Clone)]
pub struct Config {
    config: ConfigTree,
}

impl Config {
    pub fn new(config_dir: &str) -> Result<Self, ConfigError> {
        let environment = environment();

        let default_config_path = format!("{}/settings.yml", &config_dir);
        let env_config_path = format!("{}/settings.{}.yml", &config_dir, &environment);
        let local_config_path = format!("{}/settings.local.yml", &config_dir);

        info!("Loading configuration from: {}", default_config_path);
        info!(
            "Loading environment-specific configuration from: {}",
            env_config_path
        );
        info!("Loading local overrides from: {}", local_config_path);

        // The tool has to work from any directory, so every file is optional
        // and the built-in defaults fill the gaps.
        ConfigTree::builder()
            .set_default("real_friends.database_url", "sqlite://real_friends_cache.db")?
            .set_default("real_friends.api_base_url", "https://api.twitter.com/1.1")?
            .set_default("real_friends.lookup_chunk_size", 100)?
            .set_default("real_friends.ids_page_size", 5000)?
            .set_default("real_friends.request_timeout_secs", 30)?
            .set_default("real_friends.max_requests_per_minute", 60)?
            .set_default("real_friends.max_retries", 5)?
            .add_source(File::with_name(&default_config_path).required(false))
            .add_source(File::with_name(&env_config_path).required(false))
            .add_source(File::with_name(&local_config_path).required(false))
            .add_source(Environment::with_prefix(ENVIRONMENT_PREFIX).separator(CONFIG_SEPARATOR))
            .build()
            .map(|c| Config { config: c })
    }

    pub fn get<T>(&self) -> Result<T, ConfigError>
    where
        T: Configurable,
        T: DeserializeOwned,
    {
        self.config.get::<T>(T::key())
    }
}

pub const CONSUMER_KEY_VAR: &str = "TWITTER_CONSUMER_KEY";
pub const CONSUMER_SECRET_VAR: &str = "TWITTER_CONSUMER_SECRET";
pub const ACCESS_KEY_VAR: &str = "TWITTER_ACCESS_KEY";
pub const ACCESS_SECRET_VAR: &str = "TWITTER_ACCESS_SECRET";

/// API credentials, handed untouched to the remote client.
#[derive(Clone, Default)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_key: String,
    pub access_secret: String,
}

impl Credentials {
    /// Reads the four secrets from the process environment. Missing values
    /// stay empty; a fully cached run never needs them.
    pub fn from_env() -> Self {
        let credentials = Self {
            consumer_key: read_secret(CONSUMER_KEY_VAR),
            consumer_secret: read_secret(CONSUMER_SECRET_VAR),
            access_key: read_secret(ACCESS_KEY_VAR),
            access_secret: read_secret(ACCESS_SECRET_VAR),
        };

        if !credentials.is_complete() {
            warn!("API credentials are incomplete, only cached handles can be queried");
        }

        credentials
    }

    pub fn is_complete(&self) -> bool {
        [
            &self.consumer_key,
            &self.consumer_secret,
            &self.access_key,
            &self.access_secret,
        ]
        .iter()
        .all(|secret| !secret.is_empty())
    }
}

fn read_secret(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "<unset>" } else { "<redacted>" };

        f.debug_struct("Credentials")
            .field("consumer_key", &redact(&self.consumer_key))
            .field("consumer_secret", &redact(&self.consumer_secret))
            .field("access_key", &redact(&self.access_key))
            .field("access_secret", &redact(&self.access_secret))
            .finish()
    }
}
