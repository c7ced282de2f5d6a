use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use reqwest::Url;
use thiserror::Error;

use crate::agent::ALL_INTERFACES;
use crate::collector::pusher::token_client;
use crate::collector::{Auth, ClientCredentials, PullerSettings, PusherSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {flag}: {source}")]
    InvalidUrl {
        flag: &'static str,
        source: url::ParseError,
    },
    #[error("--pusher-token-url is required with --pusher-auth oauth")]
    MissingTokenUrl,
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("interval must be above zero")]
    ZeroInterval,
}

#[derive(Debug, Parser)]
#[command(name = "nodestatus", version, about = "Fleet status collector and node agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll node agents and push the aggregated table upstream.
    Collector(CollectorArgs),
    /// Serve this host's status for a collector to poll.
    Agent(AgentArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    Basic,
    Oauth,
}

#[derive(Debug, Args)]
pub struct CollectorArgs {
    /// Path to the node list.
    #[arg(long, default_value = "/etc/nodestatus/nodes.toml")]
    pub config: PathBuf,
    /// Only read this group from the node list.
    #[arg(long)]
    pub group: Option<String>,
    #[arg(long)]
    pub debug: bool,

    /// Interval used to pull metrics.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub puller_interval: Duration,
    /// Accept 503 answers from nodes as a valid status.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub puller_accept_503: bool,

    #[arg(long)]
    pub pusher_enable: bool,
    /// Interval used to push metrics.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub pusher_interval: Duration,
    #[arg(long, default_value = "https://example.com/")]
    pub pusher_url: String,
    #[arg(long, value_enum, default_value_t = AuthMode::Basic)]
    pub pusher_auth: AuthMode,

    #[arg(long, env = "AUTH_USERNAME", default_value = "")]
    pub pusher_username: String,
    #[arg(long, env = "AUTH_PASSWORD", default_value = "", hide_env_values = true)]
    pub pusher_password: String,

    #[arg(long, env = "OAUTH_CLIENT_ID", default_value = "")]
    pub pusher_client_id: String,
    #[arg(long, env = "OAUTH_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub pusher_client_secret: String,
    #[arg(long, env = "OAUTH_TOKEN_URL")]
    pub pusher_token_url: Option<String>,
}

impl CollectorArgs {
    pub fn puller_settings(&self) -> Result<PullerSettings, ConfigError> {
        if self.puller_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(PullerSettings {
            interval: self.puller_interval,
            accept_unavailable: self.puller_accept_503,
            ..Default::default()
        })
    }

    pub fn pusher_settings(&self) -> Result<PusherSettings, ConfigError> {
        if self.pusher_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        let url = parse_url("--pusher-url", &self.pusher_url)?;
        Ok(PusherSettings {
            interval: self.pusher_interval,
            ..PusherSettings::new(url)
        })
    }

    pub fn auth(&self, settings: &PusherSettings) -> Result<Auth, ConfigError> {
        match self.pusher_auth {
            AuthMode::Basic => Ok(Auth::basic(&self.pusher_username, &self.pusher_password)),
            AuthMode::Oauth => {
                let raw = self
                    .pusher_token_url
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .ok_or(ConfigError::MissingTokenUrl)?;
                let token_url = parse_url("--pusher-token-url", raw)?;
                Ok(Auth::OAuth2(ClientCredentials::new(
                    token_client(settings)?,
                    &self.pusher_client_id,
                    &self.pusher_client_secret,
                    token_url,
                )))
            }
        }
    }
}

#[derive(Debug, Args)]
pub struct AgentArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub listen_host: String,
    #[arg(long, default_value_t = 8080)]
    pub listen_port: u16,
    /// Network interface to read stats from, or `all`.
    #[arg(long, default_value = ALL_INTERFACES)]
    pub interface_stats: String,
    /// Data gather interval.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub interval: Duration,
    /// Bit rate at which the node counts as busy.
    #[arg(long, default_value = "1 Gbps")]
    pub net_threshold: String,
    /// Name reported in the status, defaults to the hostname.
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub debug: bool,
}

fn parse_url(flag: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { flag, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(args: &[&str]) -> CollectorArgs {
        let mut argv = vec!["nodestatus", "collector"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Collector(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn collector_defaults() {
        let args = collector(&[]);
        assert_eq!(args.config, PathBuf::from("/etc/nodestatus/nodes.toml"));
        assert_eq!(args.puller_interval, Duration::from_secs(1));
        assert!(args.puller_accept_503);
        assert!(!args.pusher_enable);
        assert_eq!(args.pusher_auth, AuthMode::Basic);

        let pusher = args.pusher_settings().unwrap();
        assert_eq!(pusher.url.as_str(), "https://example.com/");
        assert_eq!(pusher.rate_limit_backoff, Duration::from_secs(15));
    }

    #[test]
    fn poll_and_push_intervals_are_independent() {
        let args = collector(&["--puller-interval", "250ms", "--pusher-interval", "5s"]);
        assert_eq!(args.puller_settings().unwrap().interval, Duration::from_millis(250));
        assert_eq!(args.pusher_settings().unwrap().interval, Duration::from_secs(5));
    }

    #[test]
    fn strict_status_codes_can_be_requested() {
        let args = collector(&["--puller-accept-503", "false"]);
        assert!(!args.puller_settings().unwrap().accept_unavailable);
    }

    #[test]
    fn oauth_needs_a_token_url() {
        let args = collector(&["--pusher-auth", "oauth", "--pusher-token-url", ""]);
        let settings = args.pusher_settings().unwrap();
        assert!(matches!(args.auth(&settings), Err(ConfigError::MissingTokenUrl)));

        let args = collector(&[
            "--pusher-auth",
            "oauth",
            "--pusher-token-url",
            "https://auth.example.com/token",
        ]);
        let settings = args.pusher_settings().unwrap();
        assert!(matches!(args.auth(&settings), Ok(Auth::OAuth2(_))));
    }

    #[test]
    fn bad_push_url_is_rejected() {
        let args = collector(&["--pusher-url", "nope"]);
        assert!(matches!(
            args.pusher_settings(),
            Err(ConfigError::InvalidUrl { flag: "--pusher-url", .. })
        ));
    }

    #[test]
    fn agent_defaults() {
        let cli = Cli::try_parse_from(["nodestatus", "agent", "--interval", "2s"]).unwrap();
        let Command::Agent(args) = cli.command else {
            panic!("expected agent");
        };
        assert_eq!(args.listen_host, "127.0.0.1");
        assert_eq!(args.listen_port, 8080);
        assert_eq!(args.interface_stats, "all");
        assert_eq!(args.interval, Duration::from_secs(2));
        assert_eq!(args.net_threshold, "1 Gbps");
    }
}
