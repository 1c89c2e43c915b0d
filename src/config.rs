//! Client configuration and its environment loader.
//!
//! A [`ClientConfig`] is handed to [`crate::HttpClient::new`] and is immutable
//! from then on.

use std::time::Duration;

use mockable::Env;
use tracing::warn;
use url::Url;

use crate::negotiator::ApiVersion;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_ADDRESS: &str = "http://localhost:8081";
const ADDRESS_ENV: &str = "LUMI_API_ADDRESS";
const FALLBACK_URL_ENV: &str = "LUMI_API_FALLBACK_URL";
const VERSION_ENV: &str = "LUMI_API_VERSION";
const LOGGING_ENV: &str = "LUMI_API_LOGGING";
const BOOL_EXPECTED: &str = "1|0|true|false|yes|no|y|n";
const VERSION_EXPECTED: &str = "1|2";

/// Build mode, used to pick defaults and strictness.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildMode {
    /// Debug builds tolerate missing or invalid values and log warnings.
    Debug,
    /// Release builds reject them.
    Release,
}

impl BuildMode {
    /// Determine the build mode from `cfg!(debug_assertions)`.
    pub fn from_debug_assertions() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Release
        }
    }

    fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }
}

/// Errors raised while building a [`ClientConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Configuration Error: Invalid URL: {0}")]
    UrlInvalid(#[from] url::ParseError),
    #[error("Configuration Error: {url} cannot be used as an API address")]
    UnsupportedAddress { url: String },
    #[error("Configuration Error: Missing required environment variable {name}")]
    MissingEnv { name: &'static str },
    #[error("Configuration Error: Invalid value for {name}='{value}'; expected {expected}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Settings shared by every request a client makes.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    address: Url,
    fallback_target: Url,
    api_version: Option<ApiVersion>,
    timeout: Duration,
    with_credentials: bool,
    enable_logging: bool,
}

impl ClientConfig {
    /// Configuration with default timeout, credentials enabled and logging
    /// following the build mode.
    pub fn new(address: Url, fallback_target: Url) -> Result<Self, ConfigError> {
        for url in [&address, &fallback_target] {
            if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::UnsupportedAddress {
                    url: url.to_string(),
                });
            }
        }
        Ok(Self {
            address,
            fallback_target,
            api_version: None,
            timeout: DEFAULT_TIMEOUT,
            with_credentials: true,
            enable_logging: BuildMode::from_debug_assertions().is_debug(),
        })
    }

    /// Parse both URLs from strings.
    pub fn parse(address: &str, fallback_target: &str) -> Result<Self, ConfigError> {
        Self::new(Url::parse(address)?, Url::parse(fallback_target)?)
    }

    /// Configuration whose discovery endpoint is `{address}/api/v1`.
    pub fn for_address(address: &str) -> Result<Self, ConfigError> {
        let address = Url::parse(address)?;
        let fallback_target = default_fallback_target(&address)?;
        Self::new(address, fallback_target)
    }

    /// Load configuration from `LUMI_API_*` environment variables.
    pub fn from_env<E: Env>(env: &E, mode: BuildMode) -> Result<Self, ConfigError> {
        let address = match env.string(ADDRESS_ENV) {
            Some(value) => Url::parse(&value)?,
            None if mode.is_debug() => {
                warn!("{ADDRESS_ENV} not set; defaulting to {DEFAULT_ADDRESS}");
                Url::parse(DEFAULT_ADDRESS)?
            }
            None => return Err(ConfigError::MissingEnv { name: ADDRESS_ENV }),
        };
        let fallback_target = match env.string(FALLBACK_URL_ENV) {
            Some(value) => Url::parse(&value)?,
            None => default_fallback_target(&address)?,
        };
        let api_version = match env.string(VERSION_ENV) {
            Some(value) => Some(parse_version(&value).ok_or(ConfigError::InvalidEnv {
                name: VERSION_ENV,
                value,
                expected: VERSION_EXPECTED,
            })?),
            None => None,
        };
        let enable_logging = logging_from_env(env, mode)?;

        let mut config = Self::new(address, fallback_target)?.with_logging(enable_logging);
        config.api_version = api_version;
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    pub fn with_logging(mut self, enable_logging: bool) -> Self {
        self.enable_logging = enable_logging;
        self
    }

    /// Pin the API version; no negotiation request will be made.
    pub fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = Some(version);
        self
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn fallback_target(&self) -> &Url {
        &self.fallback_target
    }

    pub fn api_version(&self) -> Option<ApiVersion> {
        self.api_version
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn with_credentials_enabled(&self) -> bool {
        self.with_credentials
    }

    pub fn logging_enabled(&self) -> bool {
        self.enable_logging
    }
}

fn default_fallback_target(address: &Url) -> Result<Url, ConfigError> {
    if address.cannot_be_a_base() {
        return Err(ConfigError::UnsupportedAddress {
            url: address.to_string(),
        });
    }
    Ok(ApiVersion::V1.base_url(address))
}

fn logging_from_env<E: Env>(env: &E, mode: BuildMode) -> Result<bool, ConfigError> {
    let default_value = mode.is_debug();
    let Some(value) = env.string(LOGGING_ENV) else {
        return Ok(default_value);
    };
    match parse_bool(&value) {
        Some(flag) => Ok(flag),
        None if mode.is_debug() => {
            warn!(value = %value, "invalid {LOGGING_ENV}; defaulting to {default_value}");
            Ok(default_value)
        }
        None => Err(ConfigError::InvalidEnv {
            name: LOGGING_ENV,
            value,
            expected: BOOL_EXPECTED,
        }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_version(value: &str) -> Option<ApiVersion> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|number| ApiVersion::try_from(number).ok())
}
