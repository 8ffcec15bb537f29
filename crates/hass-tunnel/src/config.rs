use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_REMOTE: &str = "https://hass.svc.integrity.app/service/hass/tunnel";
const DEFAULT_PROXY_ENDPOINT: &str = "https://proxy.svc.integrity.app";
const DEFAULT_LOCAL: &str = "http://hassio/homeassistant";
const DEFAULT_LOCAL_HOST: &str = "hassio";
const DEFAULT_KEY: &str = "hass-proxy.pem";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Log output shape, from `LOG_FORMATTER`. Anything other than `json` means
/// plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Errors that make the configuration unusable. All fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SECRET must be set")]
    MissingSecret,

    #[error("SECRET must be a <binding>.<secret> pair")]
    MalformedSecret,
}

/// Runtime configuration, entirely environment-driven.
#[derive(Debug, Clone)]
pub struct Config {
    /// First half of `SECRET`, identifying the controller binding.
    pub binding: String,
    /// Second half of `SECRET`.
    pub secret: String,
    /// Realm controller registration endpoint (`REMOTE`).
    pub remote: String,
    /// Rendezvous proxy base URL (`PROXY_ENDPOINT`).
    pub proxy_endpoint: String,
    /// Local origin base URL (`LOCAL`).
    pub local: String,
    /// Host header override for local calls (`LOCAL_HOST`).
    pub local_host: String,
    /// Local origin bearer, sent as `X-HA-ACCESS` (`HASSIO_TOKEN`).
    pub hassio_token: String,
    /// Identity key file path (`KEY`).
    pub key_path: PathBuf,
    pub log_level: String,
    pub log_formatter: LogFormat,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str, default: &str| {
            lookup(name).unwrap_or_else(|| default.to_string())
        };

        let secret_pair = lookup("SECRET").unwrap_or_default();
        if secret_pair.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        let (binding, secret) = secret_pair
            .split_once('.')
            .ok_or(ConfigError::MalformedSecret)?;

        let log_formatter = match get("LOG_FORMATTER", "text").as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            binding: binding.to_string(),
            secret: secret.to_string(),
            remote: get("REMOTE", DEFAULT_REMOTE),
            proxy_endpoint: get("PROXY_ENDPOINT", DEFAULT_PROXY_ENDPOINT),
            local: get("LOCAL", DEFAULT_LOCAL),
            local_host: get("LOCAL_HOST", DEFAULT_LOCAL_HOST),
            hassio_token: get("HASSIO_TOKEN", ""),
            key_path: PathBuf::from(get("KEY", DEFAULT_KEY)),
            log_level: get("LOG_LEVEL", DEFAULT_LOG_LEVEL),
            log_formatter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn secret_is_required() {
        assert!(matches!(config_from(&[]), Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn secret_splits_on_first_dot() {
        let cfg = config_from(&[("SECRET", "my-binding.s3cr.et")]).unwrap();
        assert_eq!(cfg.binding, "my-binding");
        assert_eq!(cfg.secret, "s3cr.et");
    }

    #[test]
    fn secret_without_dot_is_malformed() {
        assert!(matches!(
            config_from(&[("SECRET", "nodot")]),
            Err(ConfigError::MalformedSecret)
        ));
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = config_from(&[("SECRET", "b.s")]).unwrap();
        assert_eq!(cfg.remote, DEFAULT_REMOTE);
        assert_eq!(cfg.proxy_endpoint, DEFAULT_PROXY_ENDPOINT);
        assert_eq!(cfg.local, "http://hassio/homeassistant");
        assert_eq!(cfg.local_host, "hassio");
        assert_eq!(cfg.hassio_token, "");
        assert_eq!(cfg.key_path, PathBuf::from("hass-proxy.pem"));
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.log_formatter, LogFormat::Text);
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = config_from(&[
            ("SECRET", "b.s"),
            ("LOCAL", "https://192.168.1.10:8123"),
            ("LOCAL_HOST", "homeassistant.local"),
            ("HASSIO_TOKEN", "xyz"),
            ("LOG_FORMATTER", "json"),
        ])
        .unwrap();
        assert_eq!(cfg.local, "https://192.168.1.10:8123");
        assert_eq!(cfg.local_host, "homeassistant.local");
        assert_eq!(cfg.hassio_token, "xyz");
        assert_eq!(cfg.log_formatter, LogFormat::Json);
    }

    #[test]
    fn unknown_formatter_falls_back_to_text() {
        let cfg = config_from(&[("SECRET", "b.s"), ("LOG_FORMATTER", "yaml")]).unwrap();
        assert_eq!(cfg.log_formatter, LogFormat::Text);
    }
}
