use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::{Auth, AuthError};
use super::jittered;
use super::table::StatusTable;
use crate::node::{to_json_indented, NodeRegistry, NodeStatus};

pub const USER_AGENT: &str = "NodeStatusPusher/1.0.0";

#[derive(Debug, Clone)]
pub struct PusherSettings {
    pub url: Url,
    pub interval: Duration,
    pub jitter: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle: usize,
    /// Pause after upstream answers 429.
    pub rate_limit_backoff: Duration,
}

impl PusherSettings {
    pub fn new(url: Url) -> Self {
        PusherSettings {
            url,
            interval: Duration::from_secs(1),
            jitter: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(12),
            pool_max_idle: 5,
            rate_limit_backoff: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to authenticate: {0}")]
    Auth(#[from] AuthError),
    #[error("failed to reach upstream: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream answered {status}: {body}")]
    Status { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered { bytes: usize },
    RateLimited,
}

/// Periodically sends the whole status table upstream.
pub struct Pusher {
    registry: NodeRegistry,
    table: StatusTable,
    auth: Auth,
    settings: PusherSettings,
    client: reqwest::Client,
}

impl Pusher {
    pub fn new(
        registry: NodeRegistry,
        table: StatusTable,
        auth: Auth,
        settings: PusherSettings,
    ) -> reqwest::Result<Self> {
        let client = build_client(&settings)?;
        Ok(Pusher {
            registry,
            table,
            auth,
            settings,
            client,
        })
    }

    /// Pushes until `cancel` fires. No failure ends the loop.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Pusher started against {}", self.settings.url);
        loop {
            let sleep = jittered(self.settings.interval, self.settings.jitter);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }

            let res = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.push_once() => res,
            };
            match res {
                Ok(PushOutcome::Delivered { .. }) => {}
                Ok(PushOutcome::RateLimited) => {
                    warn!(
                        "Pusher was rate limited. Sleeping for {}",
                        humantime::format_duration(self.settings.rate_limit_backoff)
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.rate_limit_backoff) => {}
                    }
                }
                Err(e) => warn!("Pusher error: {}", e),
            }
        }
        info!("Pusher stopped");
    }

    /// Takes a fresh snapshot and sends it once.
    pub async fn push_once(&self) -> Result<PushOutcome, PushError> {
        let snapshot = self.table.snapshot_ordered(&self.registry);
        let body = encode_snapshot(&snapshot)?;
        debug!("Pusher will send: {}", String::from_utf8_lossy(&body));

        let t0 = Instant::now();
        let bytes = body.len();
        let req = self
            .client
            .post(self.settings.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let req = self.auth.apply(req).await?;
        let res = req.send().await?;

        let status = res.status();
        debug!("Pusher completed with status: {}", status);
        // always drain so the connection can go back to the pool
        let text = res.text().await?;

        match status {
            StatusCode::OK => {
                info!(
                    "Pusher sent {}b in {:.2}s",
                    bytes,
                    t0.elapsed().as_secs_f64()
                );
                Ok(PushOutcome::Delivered { bytes })
            }
            StatusCode::TOO_MANY_REQUESTS => Ok(PushOutcome::RateLimited),
            _ => {
                if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                    self.auth.invalidate();
                }
                Err(PushError::Status { status, body: text })
            }
        }
    }
}

fn build_client(settings: &PusherSettings) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .pool_idle_timeout(settings.pool_idle_timeout)
        .pool_max_idle_per_host(settings.pool_max_idle)
        .tcp_keepalive(settings.pool_idle_timeout)
        .build()
}

/// Client used for token requests, sharing the push timeouts. Redirects
/// are not followed.
pub fn token_client(settings: &PusherSettings) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Serializes a snapshot as a JSON array indented with four spaces.
pub fn encode_snapshot(snapshot: &[NodeStatus]) -> serde_json::Result<Vec<u8>> {
    to_json_indented(snapshot)
}
