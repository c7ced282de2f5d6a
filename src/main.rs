use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use nodestatus::agent;
use nodestatus::collector::{Pusher, StatusTable, Supervisor};
use nodestatus::config::{AgentArgs, Cli, CollectorArgs, Command, ConfigError};
use nodestatus::node::NodeRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let debug = match &cli.command {
        Command::Collector(args) => args.debug,
        Command::Agent(args) => args.debug,
    };
    tracing_subscriber::fmt()
        .with_max_level(if debug { Level::DEBUG } else { Level::INFO })
        .init();

    match cli.command {
        Command::Collector(args) => run_collector(args).await,
        Command::Agent(args) => run_agent(args).await,
    }
}

async fn run_collector(args: CollectorArgs) -> anyhow::Result<()> {
    let registry = NodeRegistry::load(&args.config, args.group.as_deref())
        .context("failed to load node list")?;
    let puller_settings = args.puller_settings()?;

    let table = StatusTable::new();
    let pusher = if args.pusher_enable {
        let settings = args.pusher_settings()?;
        let auth = args.auth(&settings)?;
        Some(Pusher::new(registry.clone(), table.clone(), auth, settings)?)
    } else {
        None
    };

    info!("Starting collector for {} nodes", registry.len());
    let supervisor = Supervisor::start(&registry, table, puller_settings, pusher)?;

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt, shutting down");
    supervisor.shutdown().await;
    Ok(())
}

async fn run_agent(args: AgentArgs) -> anyhow::Result<()> {
    if args.interval.is_zero() {
        return Err(ConfigError::ZeroInterval.into());
    }
    let name = args
        .name
        .clone()
        .or_else(sysinfo::System::host_name)
        .unwrap_or_default();
    let sampler = agent::Sampler::new(&name, &args.interface_stats, &args.net_threshold)?;

    let state = Arc::new(agent::Agent::new());
    let cancel = CancellationToken::new();
    let sampling = tokio::spawn(agent::sample_loop(
        state.clone(),
        sampler,
        args.interval,
        cancel.child_token(),
    ));

    info!(
        "Starting agent {} on {}:{}",
        name, args.listen_host, args.listen_port
    );
    let api = agent::setup(&args.listen_host, args.listen_port, state);
    let mut serving = tokio::spawn(api.start(cancel.child_token()));

    let served = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Received interrupt, shutting down");
            cancel.cancel();
            serving.await?
        }
        // the server only returns early when it failed to bind or accept
        res = &mut serving => {
            cancel.cancel();
            res?
        }
    };
    sampling.await?;
    served?;
    Ok(())
}
