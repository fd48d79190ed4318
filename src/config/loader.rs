//! Configuration loading from disk and environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix for environment overrides, e.g. `PROXY_LISTENER_BIND_ADDRESS`.
pub const ENV_PREFIX: &str = "PROXY_";

/// Locations probed when no path is given explicitly.
pub const DEFAULT_LOCATIONS: [&str; 2] = ["config.toml", "/etc/forward-proxy/config.toml"];

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {key}={value:?} is invalid")]
    Env { key: String, value: String },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: file (explicit or discovered), then environment overrides,
/// then validation.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let file = match path {
        Some(path) => Some(path.to_path_buf()),
        None => DEFAULT_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file()),
    };

    let mut config = match file {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Reading configuration file");
            parse_file(&path)?
        }
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML file without applying overrides or validation.
pub fn parse_file(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Apply `PROXY_<SECTION>_<FIELD>` overrides using the given lookup.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    env.set("LISTENER_BIND_ADDRESS", &mut config.listener.bind_address)?;
    env.set("LISTENER_MAX_CONNECTIONS_PER_IP", &mut config.listener.max_connections_per_ip)?;
    env.set(
        "LISTENER_MAX_REQUESTS_PER_CONNECTION",
        &mut config.listener.max_requests_per_connection,
    )?;
    env.set("LISTENER_MAX_REQUEST_BODY_BYTES", &mut config.listener.max_request_body_bytes)?;

    env.set("TIMEOUTS_READ_SECS", &mut config.timeouts.read_secs)?;
    env.set("TIMEOUTS_WRITE_SECS", &mut config.timeouts.write_secs)?;
    env.set("TIMEOUTS_IDLE_SECS", &mut config.timeouts.idle_secs)?;
    env.set("TIMEOUTS_DIAL_SECS", &mut config.timeouts.dial_secs)?;
    env.set("TIMEOUTS_RESPONSE_SECS", &mut config.timeouts.response_secs)?;
    env.set("TIMEOUTS_SHUTDOWN_SECS", &mut config.timeouts.shutdown_secs)?;

    env.set("UPSTREAM_MAX_CONNECTIONS_PER_HOST", &mut config.upstream.max_connections_per_host)?;
    env.set("UPSTREAM_DIAL_RETRIES", &mut config.upstream.dial_retries)?;
    env.set("UPSTREAM_DIAL_RETRY_DELAY_MS", &mut config.upstream.dial_retry_delay_ms)?;

    env.set("OBSERVABILITY_LOG_LEVEL", &mut config.observability.log_level)?;
    env.set("OBSERVABILITY_LOG_FORMAT", &mut config.observability.log_format)?;
    env.set("OBSERVABILITY_LOG_OUTPUT", &mut config.observability.log_output)?;
    env.set("OBSERVABILITY_METRICS_ENABLED", &mut config.observability.metrics_enabled)?;
    env.set("OBSERVABILITY_METRICS_ADDRESS", &mut config.observability.metrics_address)?;
    env.set("OBSERVABILITY_METRICS_PATH", &mut config.observability.metrics_path)?;

    Ok(())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn set<T: FromStr>(&self, suffix: &str, target: &mut T) -> Result<(), ConfigError> {
        let key = format!("{ENV_PREFIX}{suffix}");
        if let Some(value) = (self.lookup)(&key) {
            *target = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { key, value })?;
        }
        Ok(())
    }
}
