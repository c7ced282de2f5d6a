use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::puller::{Puller, PullerSettings};
use super::pusher::Pusher;
use super::table::StatusTable;
use crate::node::NodeRegistry;

/// Owns the running pullers and the optional pusher.
///
/// Tasks only ever talk to each other through the [`StatusTable`]; the
/// supervisor just keeps their handles so they can be stopped together.
pub struct Supervisor {
    table: StatusTable,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Spawns one puller per registry node, plus `pusher` when given.
    pub fn start(
        registry: &NodeRegistry,
        table: StatusTable,
        settings: PullerSettings,
        pusher: Option<Pusher>,
    ) -> reqwest::Result<Self> {
        // nothing is spawned unless every client could be built
        let pullers = registry
            .iter()
            .map(|node| Puller::new(node.clone(), table.clone(), settings.clone()))
            .collect::<reqwest::Result<Vec<_>>>()?;

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(pullers.len() + 1);
        for puller in pullers {
            handles.push(tokio::spawn(puller.run(cancel.child_token())));
        }
        info!("Started {} pullers", registry.len());

        if let Some(pusher) = pusher {
            handles.push(tokio::spawn(pusher.run(cancel.child_token())));
            info!("Started pusher");
        }

        Ok(Supervisor {
            table,
            cancel,
            handles,
        })
    }

    pub fn table(&self) -> &StatusTable {
        &self.table
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Stops every task and waits for them to finish.
    pub async fn shutdown(self) {
        info!("Stopping {} tasks", self.handles.len());
        self.cancel.cancel();
        for res in join_all(self.handles).await {
            if let Err(e) = res {
                error!("Task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_stops_every_puller() {
        let registry = NodeRegistry::from_nodes(vec![
            NodeConfig::new("a", "http://127.0.0.1:9/status".parse().unwrap()),
            NodeConfig::new("b", "http://127.0.0.1:9/status".parse().unwrap()),
        ])
        .unwrap();
        let settings = PullerSettings {
            interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let sup = Supervisor::start(&registry, StatusTable::new(), settings, None).unwrap();
        assert_eq!(sup.task_count(), 2);
        assert!(sup.table().is_empty());

        tokio::time::timeout(Duration::from_secs(1), sup.shutdown())
            .await
            .expect("shutdown hung");
    }
}
