use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use kinetic_common::auth::AuthSecret;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

mod args;
mod cli;
mod client;
mod db;
mod dm;
mod metrics;
mod models;
mod reconciler;
mod server;
mod service;
mod store;
mod topology;

use args::{Cli, Commands, IntentCommands, ServerArgs, StrategyCommands};
use reconciler::Reconciler;
use server::{AppState, OperatorCredentials};
use service::StrategyService;

#[tokio::main]
async fn main() -> Result<()> {
    kinetic_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server(args) => run(args).await,
        Commands::Login(args) => cli::run_login(args).await,
        Commands::Strategy(args) => match args.command {
            StrategyCommands::Create(args) => cli::run_create_strategy(args).await,
            StrategyCommands::List(args) => cli::run_list_strategies(args).await,
            StrategyCommands::Delete(args) => cli::run_delete_strategy(args).await,
        },
        Commands::Intent(args) => match args.command {
            IntentCommands::List(args) => cli::run_list_intents(args).await,
            IntentCommands::Delete(args) => cli::run_delete_intents(args).await,
        },
        Commands::Nodes(args) => cli::run_nodes(args).await,
        Commands::Pids(args) => cli::run_pids(args).await,
        Commands::Health(args) => cli::run_health(args).await,
    }
}

async fn run(args: ServerArgs) -> Result<()> {
    println!("{}", "⚙️ Starting manager...".green());

    let cancel = CancellationToken::new();
    kinetic_common::shutdown::cancel_on_signal(cancel.clone());

    kinetic_common::metrics::maybe_spawn_metrics_server();

    let pool = kinetic_common::postgres::create_pool(&args.postgres)?;
    db::init_schema(&pool)
        .await
        .context("database unreachable or schema init failed")?;
    let store = Arc::new(db::PgStore::new(pool));

    let kube_client = kube::Client::try_default()
        .await
        .context("failed to create kubernetes client")?;
    let topology = Arc::new(topology::KubeTopology::new(kube_client, args.dm_port));

    let dm_client = Arc::new(dm::HttpDmClient::new(
        args.dm_public_key.clone(),
        args.dm_client_id.clone(),
        &args.dm_tls,
    )?);

    let service = Arc::new(StrategyService::new(
        store.clone(),
        topology.clone(),
        dm_client.clone(),
    ));

    let reconciler = Reconciler::new(store, topology, dm_client).with_timing(
        Duration::from_secs(args.reconcile_interval_secs),
        Duration::from_secs(args.reconcile_initial_delay_secs),
    );
    let reconciler_task = tokio::spawn(reconciler.run(cancel.clone()));

    let state = AppState {
        service,
        credentials: OperatorCredentials {
            username: args.operator_username.clone(),
            password: args.operator_password.clone(),
        },
        secret: AuthSecret::new(&args.auth.jwt_secret),
        token_ttl_secs: args.auth.token_ttl_secs,
    };
    let result = server::run_server(cancel.clone(), args.port, state).await;

    cancel.cancel();
    let _ = reconciler_task.await;
    result
}
