//! Command-line overlay for [`AppConfig`].
//!
//! Arguments given on the command line take precedence over the environment.

use clap::Parser;

use airwatch_common::config::AppConfig;

/// Posts a Discord notification whenever a new anime episode airs.
///
/// Tracks every release in the next 24 hours on AniList. Adult titles and titles
/// from outside Japan are skipped unless allowed.
#[derive(Debug, Parser)]
#[command(name = "airwatch", version)]
pub struct Cli {
    /// Discord webhook endpoint (overrides DISCORD_WEBHOOK_URL)
    pub webhook: Option<String>,

    /// Allow releases from all countries
    #[arg(short = 'a', long = "all")]
    pub allow_all_origins: bool,

    /// Allow adult releases
    #[arg(short = 'i', long = "adult")]
    pub allow_adult: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply the arguments on top of an environment-derived configuration.
    ///
    /// Flags can only switch a policy on; an absent flag leaves the environment value.
    pub fn apply(self, config: &mut AppConfig) {
        if let Some(webhook) = self.webhook {
            config.webhook_url = Some(webhook);
        }
        config.policy.allow_all_origins |= self.allow_all_origins;
        config.policy.allow_adult |= self.allow_adult;
        config.policy.verbose |= self.verbose;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_config(pairs: &[(&str, &str)]) -> AppConfig {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn test_parse_all_flags() {
        let cli = Cli::try_parse_from([
            "airwatch",
            "https://discord.com/api/webhooks/1/abc",
            "-a",
            "-i",
            "-v",
        ])
        .unwrap();
        assert_eq!(
            cli.webhook.as_deref(),
            Some("https://discord.com/api/webhooks/1/abc")
        );
        assert!(cli.allow_all_origins);
        assert!(cli.allow_adult);
        assert!(cli.verbose);
    }

    #[test]
    fn test_long_flags() {
        let cli = Cli::try_parse_from(["airwatch", "--all", "--adult", "--verbose"]).unwrap();
        assert!(cli.webhook.is_none());
        assert!(cli.allow_all_origins && cli.allow_adult && cli.verbose);
    }

    #[test]
    fn test_cli_webhook_overrides_env() {
        let mut config = env_config(&[("DISCORD_WEBHOOK_URL", "https://example.com/env")]);
        Cli::try_parse_from(["airwatch", "https://example.com/cli"])
            .unwrap()
            .apply(&mut config);
        assert_eq!(config.webhook_url.as_deref(), Some("https://example.com/cli"));
    }

    #[test]
    fn test_absent_flags_keep_env_policy() {
        let mut config = env_config(&[
            ("DISCORD_WEBHOOK_URL", "https://example.com/env"),
            ("ALLOW_ADULT", "true"),
        ]);
        Cli::try_parse_from(["airwatch", "-a"])
            .unwrap()
            .apply(&mut config);

        assert_eq!(config.webhook_url.as_deref(), Some("https://example.com/env"));
        assert!(config.policy.allow_adult);
        assert!(config.policy.allow_all_origins);
        assert!(!config.policy.verbose);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["airwatch", "--everything"]).is_err());
    }
}
