use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::jittered;
use super::table::StatusTable;
use crate::node::{NodeConfig, NodeStatus};

pub const USER_AGENT: &str = "NodeStatusPuller/1.0.0";

pub const REASON_CREATE_REQUEST: &str = "Unable to create request";
pub const REASON_CONNECT: &str = "Unable to connect to node";
pub const REASON_READ_BODY: &str = "Unable to read response body";
pub const REASON_DECODE: &str = "Unable to read status";

#[derive(Debug, Clone)]
pub struct PullerSettings {
    pub interval: Duration,
    /// Upper bound of the random delay added to every interval.
    pub jitter: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle: usize,
    /// Treat `503 Service Unavailable` as a reachable node whose body still
    /// carries a status.
    pub accept_unavailable: bool,
}

impl Default for PullerSettings {
    fn default() -> Self {
        PullerSettings {
            interval: Duration::from_secs(1),
            jitter: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(4),
            request_timeout: Duration::from_secs(3),
            pool_idle_timeout: Duration::from_secs(10),
            pool_max_idle: 5,
            accept_unavailable: true,
        }
    }
}

/// Polls a single node and owns that node's entry in the [`StatusTable`].
pub struct Puller {
    node: NodeConfig,
    table: StatusTable,
    settings: PullerSettings,
    client: reqwest::Client,
}

impl Puller {
    pub fn new(
        node: NodeConfig,
        table: StatusTable,
        settings: PullerSettings,
    ) -> reqwest::Result<Self> {
        // Each puller gets its own small pool so one slow node cannot hold
        // connections another node needs.
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .pool_max_idle_per_host(settings.pool_max_idle)
            .tcp_keepalive(settings.pool_idle_timeout)
            .build()?;
        Ok(Puller {
            node,
            table,
            settings,
            client,
        })
    }

    /// Polls until `cancel` fires. Failures never end the loop, they are
    /// recorded in the table like any other reading.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Puller for {} started against {}", self.node.name, self.node.url);
        loop {
            let sleep = jittered(self.settings.interval, self.settings.jitter);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }

            let status = tokio::select! {
                _ = cancel.cancelled() => break,
                status = self.poll_once() => status,
            };
            self.table.set(&self.node.name, status);
        }
        info!("Puller for {} stopped", self.node.name);
    }

    /// Fetches the node's status once. Every failure is mapped to a
    /// cleared status carrying the reason.
    pub async fn poll_once(&self) -> NodeStatus {
        let name = &self.node.name;
        let t0 = Instant::now();

        let req = match self.client.get(self.node.url.clone()).build() {
            Ok(req) => req,
            Err(e) => {
                warn!("Puller for {} error: {}", name, e);
                return NodeStatus::unreachable(name, REASON_CREATE_REQUEST);
            }
        };

        let res = match self.client.execute(req).await {
            Ok(res) => res,
            Err(e) => {
                warn!("Puller for {} error: {}", name, e);
                return NodeStatus::unreachable(name, REASON_CONNECT);
            }
        };

        let code = res.status();
        debug!("Puller for {} completed with status {}", name, code);
        if !self.is_accepted(code) {
            warn!("Puller for {} got invalid response code {}", name, code);
            return NodeStatus::unreachable(name, format!("Invalid response code ({code})"));
        }

        // gzip bodies are inflated by the client while reading
        let body = match res.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Puller for {} error: {}", name, e);
                return NodeStatus::unreachable(name, REASON_READ_BODY);
            }
        };

        info!(
            "Puller for {} fetched {}b in {:.2}s",
            name,
            body.len(),
            t0.elapsed().as_secs_f64()
        );
        debug!("Puller for {} got: {}", name, String::from_utf8_lossy(&body));

        match serde_json::from_slice::<NodeStatus>(&body) {
            Ok(mut status) => {
                status.name = name.clone();
                status
            }
            Err(e) => {
                warn!("Puller for {} error: {}", name, e);
                NodeStatus::unreachable(name, REASON_DECODE)
            }
        }
    }

    fn is_accepted(&self, code: StatusCode) -> bool {
        code == StatusCode::OK
            || (self.settings.accept_unavailable && code == StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap};
    use axum::routing::get;
    use axum::Router;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}/status")
    }

    fn puller(url: &str, settings: PullerSettings) -> Puller {
        let node = NodeConfig::new("n1", url.parse().unwrap());
        Puller::new(node, StatusTable::new(), settings).unwrap()
    }

    fn fast() -> PullerSettings {
        PullerSettings {
            interval: Duration::from_millis(10),
            jitter: Duration::from_millis(5),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn decodes_a_healthy_node() {
        let url = serve(Router::new().route(
            "/status",
            get(|headers: HeaderMap| async move {
                assert_eq!(headers[header::USER_AGENT], USER_AGENT);
                assert_eq!(headers[header::ACCEPT_ENCODING], "gzip");
                r#"{"free":true,"reason":"ok","load1":0.1,"hostname":"h1","name":"other"}"#
            }),
        ))
        .await;

        let status = puller(&url, fast()).poll_once().await;
        assert!(status.free);
        assert_eq!(status.reason, "ok");
        assert_eq!(status.load1, 0.1);
        assert_eq!(status.hostname, "h1");
        // the reported name never overrides the configured one
        assert_eq!(status.name, "n1");
    }

    #[tokio::test]
    async fn bad_json_clears_the_status() {
        let url = serve(Router::new().route("/status", get(|| async { "{not json" }))).await;
        let status = puller(&url, fast()).poll_once().await;
        assert_eq!(status, NodeStatus::unreachable("n1", REASON_DECODE));
    }

    #[tokio::test]
    async fn unexpected_code_names_the_code() {
        let url = serve(Router::new().route(
            "/status",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;
        let status = puller(&url, fast()).poll_once().await;
        assert!(!status.free);
        assert_eq!(status.reason, "Invalid response code (500 Internal Server Error)");
        assert_eq!(status.load1, 0.0);
    }

    #[tokio::test]
    async fn unavailable_is_configurable() {
        let url = serve(Router::new().route(
            "/status",
            get(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"free":false,"reason":"Network saturated","load1":3.5}"#,
                )
            }),
        ))
        .await;

        let status = puller(&url, fast()).poll_once().await;
        assert_eq!(status.reason, "Network saturated");
        assert_eq!(status.load1, 3.5);

        let strict = PullerSettings {
            accept_unavailable: false,
            ..fast()
        };
        let status = puller(&url, strict).poll_once().await;
        assert_eq!(status.reason, "Invalid response code (503 Service Unavailable)");
    }

    #[tokio::test]
    async fn gzip_bodies_are_inflated() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(br#"{"free":true,"reason":"ok","load1":0.7,"hostname":"gz"}"#)
            .unwrap();
        let body = gz.finish().unwrap();
        let url = serve(Router::new().route(
            "/status",
            get(move || async move { ([(header::CONTENT_ENCODING, "gzip")], body) }),
        ))
        .await;

        let status = puller(&url, fast()).poll_once().await;
        assert!(status.free);
        assert_eq!(status.load1, 0.7);
        assert_eq!(status.hostname, "gz");
        assert_eq!(status.name, "n1");
    }

    #[tokio::test]
    async fn corrupt_gzip_is_a_read_failure() {
        let url = serve(Router::new().route(
            "/status",
            get(|| async {
                (
                    [(header::CONTENT_ENCODING, "gzip")],
                    r#"{"free":true,"reason":"ok"}"#,
                )
            }),
        ))
        .await;

        let status = puller(&url, fast()).poll_once().await;
        assert_eq!(status, NodeStatus::unreachable("n1", REASON_READ_BODY));
    }

    #[tokio::test]
    async fn unreachable_node_reports_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let status = puller(&format!("http://{addr}/status"), fast()).poll_once().await;
        assert_eq!(status, NodeStatus::unreachable("n1", REASON_CONNECT));
    }

    #[tokio::test]
    async fn slow_node_times_out() {
        let url = serve(Router::new().route(
            "/status",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        ))
        .await;
        let settings = PullerSettings {
            request_timeout: Duration::from_millis(100),
            ..fast()
        };
        let status = puller(&url, settings).poll_once().await;
        assert_eq!(status.reason, REASON_CONNECT);
    }

    #[tokio::test]
    async fn failure_replaces_an_earlier_reading() {
        let table = StatusTable::new();
        table.set(
            "n1",
            NodeStatus {
                free: true,
                reason: "ok".to_string(),
                load1: 1.5,
                hostname: "h1".to_string(),
                name: "n1".to_string(),
                ..Default::default()
            },
        );
        let url = serve(Router::new().route("/status", get(|| async { "42" }))).await;
        let node = NodeConfig::new("n1", url.parse().unwrap());
        let p = Puller::new(node, table.clone(), fast()).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(p.run(cancel.clone()));
        let mut cleared = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let s = table.get("n1").unwrap();
            if s.reason == REASON_DECODE {
                cleared = Some(s);
                break;
            }
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(cleared, Some(NodeStatus::unreachable("n1", REASON_DECODE)));
    }
}
