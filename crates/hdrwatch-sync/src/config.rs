use std::path::PathBuf;
use std::time::Duration;

use hdrwatch_adapters::ServiceEndpoint;
use hdrwatch_storage::{ProxyConfig, DEFAULT_CHECKPOINT_PATH};
use thiserror::Error;

pub const DEFAULT_CHECK_INTERVAL: &str = "5m";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Immutable runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub radarr: ServiceEndpoint,
    pub sonarr: ServiceEndpoint,
    pub ntfy_url: String,
    pub ntfy_auth: Option<String>,
    pub check_interval: Duration,
    pub debug: bool,
    pub proxy: Option<ProxyConfig>,
    pub checkpoint_path: PathBuf,
    pub http_timeout: Duration,
}

impl WatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let radarr = ServiceEndpoint {
            base_url: required("RADARR_URL")?,
            api_key: required("RADARR_KEY")?,
            expected_profile_id: parse_number("RADARR_HDR_ALLOW_PROFILE", required("RADARR_HDR_ALLOW_PROFILE")?)?,
        };
        let sonarr = ServiceEndpoint {
            base_url: required("SONARR_URL")?,
            api_key: required("SONARR_KEY")?,
            expected_profile_id: parse_number("SONARR_HDR_ALLOW_PROFILE", required("SONARR_HDR_ALLOW_PROFILE")?)?,
        };

        let check_interval = parse_interval(
            &get("CHECK_INTERVAL").unwrap_or_else(|| DEFAULT_CHECK_INTERVAL.to_string()),
        )?;

        let proxy = match (get("HTTP_PROXY_HOST"), get("HTTP_PROXY_PORT")) {
            (Some(host), Some(port)) => Some(ProxyConfig {
                host,
                port: parse_number("HTTP_PROXY_PORT", port)?,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("HTTP_PROXY_PORT")),
            (None, Some(_)) => return Err(ConfigError::Missing("HTTP_PROXY_HOST")),
        };

        let http_timeout = match get("HDRWATCH_HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("HDRWATCH_HTTP_TIMEOUT_SECS", raw)?),
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        Ok(Self {
            radarr,
            sonarr,
            ntfy_url: required("NTFY_URL")?,
            ntfy_auth: get("NTFY_AUTH"),
            check_interval,
            debug: get("DEBUG")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            proxy,
            checkpoint_path: get("HDRWATCH_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH)),
            http_timeout,
        })
    }
}

/// Parses a human-readable interval such as `5m`, `90s` or `1h 30m`.
pub fn parse_interval(raw: &str) -> Result<Duration, ConfigError> {
    let interval = humantime::parse_duration(raw.trim()).map_err(|err| ConfigError::Invalid {
        name: "CHECK_INTERVAL",
        value: raw.to_string(),
        reason: err.to_string(),
    })?;
    if interval.is_zero() {
        return Err(ConfigError::Invalid {
            name: "CHECK_INTERVAL",
            value: raw.to_string(),
            reason: "interval must be greater than zero".into(),
        });
    }
    Ok(interval)
}

fn parse_number<T>(name: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
        name,
        reason: err.to_string(),
        value: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("RADARR_URL", "http://radarr:7878"),
            ("RADARR_KEY", "rk"),
            ("RADARR_HDR_ALLOW_PROFILE", "4"),
            ("SONARR_URL", "http://sonarr:8989"),
            ("SONARR_KEY", "sk"),
            ("SONARR_HDR_ALLOW_PROFILE", "6"),
            ("NTFY_URL", "https://ntfy.sh/hdr"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<WatchConfig, ConfigError> {
        WatchConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let config = load(&base_env()).expect("config");
        assert_eq!(config.radarr.expected_profile_id, 4);
        assert_eq!(config.sonarr.expected_profile_id, 6);
        assert_eq!(config.check_interval, Duration::from_secs(300));
        assert_eq!(config.checkpoint_path, PathBuf::from("lastcheck.txt"));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.ntfy_auth.is_none());
        assert!(config.proxy.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn optional_values_are_read() {
        let mut env = base_env();
        env.insert("CHECK_INTERVAL", "1h 30m");
        env.insert("DEBUG", "true");
        env.insert("NTFY_AUTH", "tk_abc");
        env.insert("HTTP_PROXY_HOST", "192.168.1.208");
        env.insert("HTTP_PROXY_PORT", "8676");
        env.insert("HDRWATCH_CHECKPOINT_PATH", "/data/lastcheck.txt");

        let config = load(&env).expect("config");
        assert_eq!(config.check_interval, Duration::from_secs(5400));
        assert!(config.debug);
        assert_eq!(config.ntfy_auth.as_deref(), Some("tk_abc"));
        assert_eq!(config.proxy.expect("proxy").port, 8676);
        assert_eq!(config.checkpoint_path, PathBuf::from("/data/lastcheck.txt"));
    }

    #[test]
    fn missing_required_value_names_the_variable() {
        let mut env = base_env();
        env.remove("SONARR_KEY");
        let err = load(&env).expect_err("missing");
        assert_eq!(err.to_string(), "SONARR_KEY is not set");

        let mut env = base_env();
        env.insert("NTFY_URL", "   ");
        assert!(matches!(load(&env), Err(ConfigError::Missing("NTFY_URL"))));
    }

    #[test]
    fn non_numeric_profile_is_invalid() {
        let mut env = base_env();
        env.insert("RADARR_HDR_ALLOW_PROFILE", "sdr");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid {
                name: "RADARR_HDR_ALLOW_PROFILE",
                ..
            })
        ));
    }

    #[test]
    fn half_configured_proxy_is_rejected() {
        let mut env = base_env();
        env.insert("HTTP_PROXY_HOST", "proxy");
        assert!(matches!(load(&env), Err(ConfigError::Missing("HTTP_PROXY_PORT"))));
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("10min").unwrap(), Duration::from_secs(600));
        assert!(parse_interval("soon").is_err());
        assert!(parse_interval("0s").is_err());
    }
}
