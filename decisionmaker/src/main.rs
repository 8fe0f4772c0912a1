use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use kinetic_common::auth::AuthSecret;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

mod args;
mod auth;
mod cache;
mod cluster;
mod discovery;
mod intents;
mod metrics;
mod resolver;
mod server;

use args::{Cli, Commands, PidsArgs, ServerArgs};
use auth::TokenIssuer;
use cache::StrategyCache;
use discovery::ProcessDiscovery;
use intents::{IntentLabelSource, IntentSet};
use resolver::{PodLabelSource, StrategyResolver};

#[tokio::main]
async fn main() -> Result<()> {
    kinetic_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server(args) => run(args).await,
        Commands::Pids(args) => run_pids(args).await,
    }
}

async fn run(args: ServerArgs) -> Result<()> {
    let node_id = args.node_id.clone().unwrap_or_else(|| args.node_name.clone());
    println!(
        "{}{}",
        "🧭 Starting decision maker • node=".green(),
        node_id.green().dimmed(),
    );

    let cancel = CancellationToken::new();
    kinetic_common::shutdown::cancel_on_signal(cancel.clone());

    kinetic_common::metrics::maybe_spawn_metrics_server();

    let intents = Arc::new(IntentSet::new());
    let discovery = Arc::new(
        ProcessDiscovery::new(&args.proc_root).with_skip_pids([std::process::id() as i32]),
    );
    let cache = Arc::new(StrategyCache::new(Duration::from_secs(
        args.strategy_cache_ttl_secs,
    )));

    let label_source: Box<dyn PodLabelSource> = if args.standalone {
        tracing::warn!("running standalone: pod labels come from intent snapshots");
        Box::new(IntentLabelSource(intents.clone()))
    } else {
        let client = kube::Client::try_default()
            .await
            .context("failed to create kubernetes client (use --standalone to run without)")?;
        tokio::spawn(cluster::run_pod_watcher(
            client.clone(),
            args.node_name.clone(),
            cache.clone(),
            cancel.clone(),
        ));
        Box::new(cluster::KubeLabelSource::new(client, args.node_name.clone()))
    };
    let resolver = Arc::new(StrategyResolver::with_label_ttl(
        label_source,
        Duration::from_secs(args.label_cache_ttl_secs),
    ));

    if args.merkle_refresh_secs > 0 {
        let intents = intents.clone();
        let cancel = cancel.clone();
        let period = Duration::from_secs(args.merkle_refresh_secs);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let root = intents.recompute_root();
                        tracing::debug!(root = %root, "refreshed merkle root");
                    }
                }
            }
        });
    }

    let issuer = Arc::new(TokenIssuer::new(
        args.client_public_key.clone(),
        &args.auth.jwt_secret,
        args.auth.token_ttl_secs,
    ));
    let secret = AuthSecret::new(&args.auth.jwt_secret);

    let state = server::AppState {
        intents,
        discovery,
        resolver,
        cache,
        issuer,
        node_name: args.node_name.clone(),
        node_id,
    };
    server::run_server(cancel, args.port, secret, state).await
}

async fn run_pids(args: PidsArgs) -> Result<()> {
    let discovery = ProcessDiscovery::new(&args.proc_root);
    let pods = discovery.scan()?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "pods": pods
            .values()
            .map(|pod| serde_json::json!({
                "pod_uid": pod.pod_uid,
                "processes": pod
                    .processes
                    .iter()
                    .map(|p| serde_json::json!({
                        "pid": p.pid,
                        "command": p.command,
                        "ppid": p.ppid,
                        "container_id": p.container_id,
                    }))
                    .collect::<Vec<_>>(),
            }))
            .collect::<Vec<_>>(),
    }))?);
    Ok(())
}
