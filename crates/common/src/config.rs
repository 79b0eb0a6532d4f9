use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{DEFAULT_WINDOW_HOURS, Policy};

/// Public AniList GraphQL endpoint.
pub const DEFAULT_ANILIST_URL: &str = "https://graphql.anilist.co";

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Discord webhook the notifications are posted to
    pub webhook_url: Option<String>,

    /// AniList GraphQL endpoint
    pub anilist_url: String,

    /// Filtering and verbosity policy
    pub policy: Policy,

    /// Length of each catalog window in hours (default: 24)
    pub window_hours: u64,

    /// Pause before re-querying after a catalog failure (default: 60)
    pub source_cooldown_secs: u64,

    /// Pause before re-querying after a delivery failure (default: 30)
    pub sink_cooldown_secs: u64,

    /// Pause before reopening a window that contained no releases (default: 60)
    pub idle_poll_secs: u64,

    /// Per-request HTTP timeout for both the catalog and the webhook (default: 30)
    pub http_timeout_secs: u64,

    /// Maximum number of catalog pages fetched per window (default: 10)
    pub catalog_max_pages: u32,

    /// Emit JSON log lines instead of human-readable text
    pub log_json: bool,

    /// `.env` file the environment was loaded from, if any. Logged once tracing is up.
    #[serde(skip)]
    pub env_file: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from environment variables (and `.env`, when present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_file = dotenvy::dotenv().ok();

        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.env_file = env_file;
        Ok(config)
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            webhook_url: lookup("DISCORD_WEBHOOK_URL").filter(|url| !url.trim().is_empty()),
            anilist_url: lookup("ANILIST_URL").unwrap_or_else(|| DEFAULT_ANILIST_URL.to_string()),
            policy: Policy {
                allow_all_origins: parse_flag(&lookup, "ALLOW_ALL_ORIGINS")?,
                allow_adult: parse_flag(&lookup, "ALLOW_ADULT")?,
                verbose: parse_flag(&lookup, "VERBOSE")?,
            },
            window_hours: parse_number(&lookup, "WINDOW_HOURS", DEFAULT_WINDOW_HOURS)?,
            source_cooldown_secs: parse_number(&lookup, "SOURCE_COOLDOWN_SECS", 60)?,
            sink_cooldown_secs: parse_number(&lookup, "SINK_COOLDOWN_SECS", 30)?,
            idle_poll_secs: parse_number(&lookup, "IDLE_POLL_SECS", 60)?,
            http_timeout_secs: parse_number(&lookup, "HTTP_TIMEOUT_SECS", 30)?,
            catalog_max_pages: parse_number(&lookup, "CATALOG_MAX_PAGES", 10)?,
            log_json: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                None | Some("") | Some("text") => false,
                Some("json") => true,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        name: "LOG_FORMAT",
                        expected: "\"text\" or \"json\"",
                        value: other.to_string(),
                    });
                }
            },
            env_file: None,
        };

        Ok(config)
    }

    /// Check cross-field constraints once every source (env, CLI) has been applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.webhook_url()?;

        if !is_http_url(&self.anilist_url) {
            return Err(ConfigError::Invalid {
                name: "ANILIST_URL",
                expected: "an http(s) URL",
                value: self.anilist_url.clone(),
            });
        }

        let non_zero = [
            ("WINDOW_HOURS", self.window_hours),
            ("HTTP_TIMEOUT_SECS", self.http_timeout_secs),
            ("CATALOG_MAX_PAGES", u64::from(self.catalog_max_pages)),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    expected: "greater than zero",
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }

    /// The configured webhook, validated as an http(s) URL.
    pub fn webhook_url(&self) -> Result<&str, ConfigError> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or(ConfigError::Missing("DISCORD_WEBHOOK_URL (or the WEBHOOK argument)"))?;

        if !is_http_url(url) {
            return Err(ConfigError::Invalid {
                name: "DISCORD_WEBHOOK_URL",
                expected: "an http(s) URL",
                value: url.to_string(),
            });
        }
        Ok(url)
    }

    pub fn window_length(&self) -> TimeDelta {
        TimeDelta::hours(i64::try_from(self.window_hours).unwrap_or(i64::MAX / 3_600))
    }

    pub fn source_cooldown(&self) -> Duration {
        Duration::from_secs(self.source_cooldown_secs)
    }

    pub fn sink_cooldown(&self) -> Duration {
        Duration::from_secs(self.sink_cooldown_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn is_http_url(url: &str) -> bool {
    let url = url.trim();
    (url.starts_with("https://") && url.len() > "https://".len())
        || (url.starts_with("http://") && url.len() > "http://".len())
}

fn parse_flag<F>(lookup: &F, name: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(false);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a boolean",
            value: raw,
        }),
    }
}

fn parse_number<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected: "a non-negative integer",
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.webhook_url, None);
        assert_eq!(config.anilist_url, DEFAULT_ANILIST_URL);
        assert_eq!(config.policy, Policy::default());
        assert_eq!(config.window_length(), TimeDelta::hours(24));
        assert_eq!(config.source_cooldown(), Duration::from_secs(60));
        assert_eq!(config.sink_cooldown(), Duration::from_secs(30));
        assert_eq!(config.idle_poll(), Duration::from_secs(60));
        assert_eq!(config.catalog_max_pages, 10);
        assert!(!config.log_json);
        assert_eq!(config.env_file, None);
    }

    #[test]
    fn test_policy_flags() {
        let config = config_from(&[
            ("ALLOW_ALL_ORIGINS", "true"),
            ("ALLOW_ADULT", "1"),
            ("VERBOSE", "Yes"),
        ])
        .unwrap();
        assert!(config.policy.allow_all_origins);
        assert!(config.policy.allow_adult);
        assert!(config.policy.verbose);
    }

    #[test]
    fn test_invalid_flag_rejected() {
        let err = config_from(&[("ALLOW_ADULT", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("ALLOW_ADULT"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = config_from(&[("SOURCE_COOLDOWN_SECS", "-5")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "SOURCE_COOLDOWN_SECS",
                ..
            }
        ));
    }

    #[test]
    fn test_webhook_required() {
        let config = config_from(&[]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        let config = config_from(&[("DISCORD_WEBHOOK_URL", "   ")]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_webhook_must_be_http() {
        let config = config_from(&[("DISCORD_WEBHOOK_URL", "discord.com/api/webhooks/1")]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                name: "DISCORD_WEBHOOK_URL",
                ..
            })
        ));

        let config = config_from(&[(
            "DISCORD_WEBHOOK_URL",
            "https://discord.com/api/webhooks/1/token",
        )])
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = config_from(&[
            ("DISCORD_WEBHOOK_URL", "https://discord.com/api/webhooks/1/token"),
            ("WINDOW_HOURS", "0"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format() {
        assert!(config_from(&[("LOG_FORMAT", "json")]).unwrap().log_json);
        assert!(config_from(&[("LOG_FORMAT", "xml")]).is_err());
    }
}
