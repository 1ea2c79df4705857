//! Process configuration, loaded once at startup from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Errors raised while building the configuration or the release catalog.
///
/// All of these are fatal at startup: the service never binds its port with a
/// half-valid configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("release {version} is missing required field '{field}'")]
    MissingField { version: String, field: &'static str },
    #[error("release {version} has an invalid {field} '{value}': {source}")]
    InvalidUrl {
        version: String,
        field: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("release {version} has an unsupported {field} scheme '{scheme}'")]
    UnsupportedScheme {
        version: String,
        field: &'static str,
        scheme: String,
    },
    #[error("release {version} has an invalid {field}: expected 64 hex characters")]
    InvalidChecksum { version: String, field: &'static str },
    #[error("release version '{0}' cannot be used as a cache directory name")]
    InvalidVersion(String),
    #[error("release catalog is empty")]
    EmptyCatalog,
    #[error("version {0} is not present in the release catalog")]
    UnknownVersion(String),
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How cluster identifiers are mapped to release versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    /// Always serve the configured default version.
    Static,
    /// Ask the assisted service which version the cluster runs.
    Service,
}

/// Tuning for the fetch phase.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub populate_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(30 * 60),
            populate_timeout: Duration::from_secs(2 * 60 * 60),
            max_concurrent_fetches: 4,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream assisted service, used by the service-backed resolver.
    pub assisted_service_url: Url,

    /// Raw JSON overriding the compiled-in release catalog.
    pub versions: Option<String>,

    /// Address the HTTP listener binds to.
    pub listen_addr: SocketAddr,

    /// Root of the local image cache.
    pub data_dir: PathBuf,

    pub resolver: ResolverKind,

    /// Version served by the static resolver.
    pub default_version: String,

    pub fetch: FetchSettings,

    /// How long open downloads may drain after a shutdown signal.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let assisted_service_url = {
            let raw = lookup("ASSISTED_SERVICE_URL")
                .unwrap_or_else(|| "http://assisted-service:8080".to_string());
            Url::parse(&raw).map_err(|e| invalid("ASSISTED_SERVICE_URL", &raw, e))?
        };

        let versions = lookup("RHCOS_VERSIONS").filter(|s| !s.trim().is_empty());

        let listen_addr: SocketAddr = parse_or("LISTEN_ADDR", &lookup, "0.0.0.0:8080".parse().ok())?;

        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/data"));

        let resolver = match lookup("VERSION_RESOLVER").as_deref() {
            None | Some("static") => ResolverKind::Static,
            Some("service") => ResolverKind::Service,
            Some(other) => {
                return Err(invalid(
                    "VERSION_RESOLVER",
                    other,
                    "expected 'static' or 'service'",
                ));
            }
        };

        let default_version =
            lookup("DEFAULT_RHCOS_VERSION").unwrap_or_else(|| "4.8".to_string());

        let defaults = FetchSettings::default();
        let max_attempts: u32 = parse_or("FETCH_MAX_ATTEMPTS", &lookup, Some(defaults.max_attempts))?;
        if max_attempts == 0 {
            return Err(invalid("FETCH_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        let max_concurrent_fetches: usize = parse_or(
            "MAX_CONCURRENT_FETCHES",
            &lookup,
            Some(defaults.max_concurrent_fetches),
        )?;
        if max_concurrent_fetches == 0 {
            return Err(invalid("MAX_CONCURRENT_FETCHES", "0", "must be at least 1"));
        }
        let attempt_timeout = Duration::from_secs(parse_or(
            "FETCH_ATTEMPT_TIMEOUT_SECS",
            &lookup,
            Some(defaults.attempt_timeout.as_secs()),
        )?);
        let populate_timeout = Duration::from_secs(parse_or(
            "POPULATE_TIMEOUT_SECS",
            &lookup,
            Some(defaults.populate_timeout.as_secs()),
        )?);

        let shutdown_grace =
            Duration::from_secs(parse_or("SHUTDOWN_GRACE_SECS", &lookup, Some(10))?);

        Ok(Self {
            assisted_service_url,
            versions,
            listen_addr,
            data_dir,
            resolver,
            default_version,
            fetch: FetchSettings {
                max_attempts,
                attempt_timeout,
                populate_timeout,
                max_concurrent_fetches,
            },
            shutdown_grace,
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `var` when set, otherwise fall back to `default`.
fn parse_or<T, F>(var: &'static str, lookup: &F, default: Option<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(var, &raw, e)),
        None => default.ok_or_else(|| invalid(var, "", "no default available")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.resolver, ResolverKind::Static);
        assert_eq!(config.default_version, "4.8");
        assert_eq!(
            config.assisted_service_url.as_str(),
            "http://assisted-service:8080/"
        );
        assert!(config.versions.is_none());
        assert_eq!(config.fetch.max_attempts, 5);
        assert_eq!(config.fetch.max_concurrent_fetches, 4);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn overrides_are_read() {
        let config = config_from(&[
            ("LISTEN_ADDR", "127.0.0.1:9999"),
            ("DATA_DIR", "/tmp/images"),
            ("VERSION_RESOLVER", "service"),
            ("DEFAULT_RHCOS_VERSION", "4.7"),
            ("FETCH_MAX_ATTEMPTS", "2"),
            ("FETCH_ATTEMPT_TIMEOUT_SECS", "10"),
            ("RHCOS_VERSIONS", "{}"),
            ("SHUTDOWN_GRACE_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9999);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/images"));
        assert_eq!(config.resolver, ResolverKind::Service);
        assert_eq!(config.default_version, "4.7");
        assert_eq!(config.fetch.max_attempts, 2);
        assert_eq!(config.fetch.attempt_timeout, Duration::from_secs(10));
        assert_eq!(config.versions.as_deref(), Some("{}"));
        assert_eq!(config.shutdown_grace, Duration::ZERO);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config_from(&[("LISTEN_ADDR", "not-an-addr")]),
            Err(ConfigError::InvalidValue { var: "LISTEN_ADDR", .. })
        ));
        assert!(matches!(
            config_from(&[("VERSION_RESOLVER", "magic")]),
            Err(ConfigError::InvalidValue { var: "VERSION_RESOLVER", .. })
        ));
        assert!(matches!(
            config_from(&[("FETCH_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::InvalidValue { var: "FETCH_MAX_ATTEMPTS", .. })
        ));
    }

    #[test]
    fn blank_versions_fall_back_to_defaults() {
        let config = config_from(&[("RHCOS_VERSIONS", "  ")]).unwrap();
        assert!(config.versions.is_none());
    }
}
