use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::stats::{AgentError, Sampler};
use crate::node::{to_json_indented, NodeStatus};

/// Most recent sample, replaced whole on every refresh.
#[derive(Default)]
pub struct Agent {
    current: ArcSwapOption<NodeStatus>,
}

impl Agent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, status: NodeStatus) {
        self.current.store(Some(Arc::new(status)));
    }

    pub fn current(&self) -> Option<Arc<NodeStatus>> {
        self.current.load_full()
    }
}

/// Samples every `interval` until cancelled. A failed sample is logged and
/// the previous one stays published.
pub async fn sample_loop(
    agent: Arc<Agent>,
    mut sampler: Sampler,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match sampler.sample() {
            Ok(status) => agent.publish(status),
            Err(e) => warn!("agent: failed to sample: {}", e),
        }
    }
}

type AppState = State<Arc<Agent>>;

pub struct Api {
    address: String,
    port: u16,
    router: Router,
}

impl Api {
    pub async fn start(self, cancel: CancellationToken) -> Result<(), AgentError> {
        let socket = format!("{}:{}", self.address, self.port);
        let listener = tokio::net::TcpListener::bind(&socket).await?;
        info!("agent: serving status on {}", socket);
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        Ok(())
    }
}

pub fn setup(address: &str, port: u16, agent: Arc<Agent>) -> Api {
    Api {
        address: address.to_string(),
        port,
        router: router(agent),
    }
}

pub fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(agent)
}

async fn get_status(State(agent): AppState) -> Response {
    let Some(status) = agent.current() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no sample yet").into_response();
    };
    let body = match to_json_indented(status.as_ref()) {
        Ok(body) => body,
        Err(e) => {
            warn!("agent: failed to encode status: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "max-age=1"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serve(agent: Arc<Agent>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(agent)).await.unwrap() });
        format!("http://{addr}/status")
    }

    #[tokio::test]
    async fn serves_latest_sample() {
        let agent = Arc::new(Agent::new());
        let url = serve(agent.clone()).await;

        let res = reqwest::get(&url).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        agent.publish(NodeStatus {
            free: true,
            reason: "ok".to_string(),
            load1: 0.75,
            hostname: "h1".to_string(),
            name: "h1".to_string(),
            ..Default::default()
        });
        let res = reqwest::get(&url).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CACHE_CONTROL], "max-age=1");
        let text = res.text().await.unwrap();
        assert!(text.starts_with("{\n    \"free\": true,"));
        let status: NodeStatus = serde_json::from_str(&text).unwrap();
        assert_eq!(status.load1, 0.75);
    }

    #[tokio::test]
    async fn sample_loop_publishes_until_cancelled() {
        let agent = Arc::new(Agent::new());
        let sampler = Sampler::new("n1", crate::agent::ALL_INTERFACES, "1 Gbps").unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sample_loop(
            agent.clone(),
            sampler,
            std::time::Duration::from_millis(10),
            cancel.clone(),
        ));

        let mut published = None;
        for _ in 0..100 {
            if let Some(s) = agent.current() {
                published = Some(s);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        let status = published.expect("no sample published");
        assert_eq!(status.name, "n1");
        assert_eq!(status.net_threshold, "1.0 Gbps");
        assert!(status.timestamp > 0);
    }
}
