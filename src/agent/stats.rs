use std::time::{Duration, Instant};

use sysinfo::{Networks, System};
use thiserror::Error;

use crate::bitrate;
use crate::node::NodeStatus;

pub const REASON_OK: &str = "ok";
pub const REASON_SATURATED: &str = "Network saturated";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("network interface {0:?} not found")]
    UnknownInterface(String),
    #[error("invalid network threshold: {0}")]
    Threshold(#[from] bitrate::BitrateError),
    #[error("network threshold must be above zero")]
    ZeroThreshold,
    #[error("failed to serve status: {0}")]
    Serve(#[from] std::io::Error),
}

/// Interface selector meaning "every interface added together".
pub const ALL_INTERFACES: &str = "all";

/// Byte counters of one interface (or all of them) at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Counters {
    pub transmitted: u64,
    pub received: u64,
}

/// Reads host metrics and turns them into a [`NodeStatus`].
pub struct Sampler {
    name: String,
    interface: String,
    threshold_bps: u64,
    threshold_label: String,
    networks: Networks,
    previous: Option<(Counters, Instant)>,
    started: Instant,
}

impl Sampler {
    pub fn new(name: &str, interface: &str, threshold: &str) -> Result<Self, AgentError> {
        let threshold_bps = bitrate::parse(threshold)?;
        if threshold_bps == 0 {
            return Err(AgentError::ZeroThreshold);
        }
        Ok(Sampler {
            name: name.to_string(),
            interface: interface.to_string(),
            threshold_bps,
            threshold_label: bitrate::humanize(threshold_bps),
            networks: Networks::new_with_refreshed_list(),
            previous: None,
            started: Instant::now(),
        })
    }

    pub fn sample(&mut self) -> Result<NodeStatus, AgentError> {
        self.networks.refresh(true);
        let counters = self.counters()?;
        let now = Instant::now();
        let rate = match self.previous {
            Some((prev, at)) => rate_bps(prev, counters, now.duration_since(at)),
            None => 0,
        };
        self.previous = Some((counters, now));

        let hostname = System::host_name().unwrap_or_default();
        let load = System::load_average();
        let utilization = rate.saturating_mul(100) / self.threshold_bps;
        let (free, reason) = classify(utilization);

        Ok(NodeStatus {
            free,
            reason: reason.to_string(),
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
            net_rate: bitrate::humanize(rate),
            net_threshold: self.threshold_label.clone(),
            net_utilization: utilization,
            timestamp: chrono::Utc::now().timestamp(),
            uptime_secs: self.started.elapsed().as_secs(),
            name: self.name.clone(),
            hostname,
        })
    }

    fn counters(&self) -> Result<Counters, AgentError> {
        let list = self.networks.list();
        if self.interface == ALL_INTERFACES {
            return Ok(list.values().fold(Counters::default(), |acc, data| Counters {
                transmitted: acc.transmitted + data.total_transmitted(),
                received: acc.received + data.total_received(),
            }));
        }
        list.get(&self.interface)
            .map(|data| Counters {
                transmitted: data.total_transmitted(),
                received: data.total_received(),
            })
            .ok_or_else(|| AgentError::UnknownInterface(self.interface.clone()))
    }
}

/// Bits per second in the busier direction between two readings.
/// Counter resets (interface restarted) count as zero traffic.
pub fn rate_bps(prev: Counters, cur: Counters, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis() as u64;
    if millis == 0 {
        return 0;
    }
    let tx = cur.transmitted.saturating_sub(prev.transmitted);
    let rx = cur.received.saturating_sub(prev.received);
    tx.max(rx).saturating_mul(8).saturating_mul(1000) / millis
}

pub fn classify(utilization: u64) -> (bool, &'static str) {
    if utilization < 100 {
        (true, REASON_OK)
    } else {
        (false, REASON_SATURATED)
    }
}
