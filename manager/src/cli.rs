//! Operator CLI commands, each a thin wrapper over [`ManagerClient`].

use anyhow::{Context, Result, bail};
use kinetic_common::intent::LabelSelector;
use uuid::Uuid;

use crate::args::{
    AuthedArgs, CreateStrategyArgs, DeleteIntentsArgs, DeleteStrategyArgs, EndpointArgs,
    LoginArgs, PidsArgs,
};
use crate::client::ManagerClient;
use crate::models::CreateStrategyRequest;

fn default_endpoint() -> String {
    "http://localhost:8080".to_string()
}

fn client(args: &EndpointArgs) -> ManagerClient {
    let endpoint = args.endpoint.clone().unwrap_or_else(default_endpoint);
    let client = ManagerClient::new(&endpoint);
    match &args.token {
        Some(token) => client.with_token(token),
        None => client,
    }
}

fn parse_selectors(raw: &[String]) -> Result<Vec<LabelSelector>> {
    raw.iter()
        .map(|s| {
            let (key, value) = s
                .split_once('=')
                .with_context(|| format!("selector {:?} is not key=value", s))?;
            Ok(LabelSelector {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

pub async fn run_login(args: LoginArgs) -> Result<()> {
    let token = client(&args.endpoint)
        .login(&args.username, &args.password)
        .await?;
    println!("{}", token);
    Ok(())
}

pub async fn run_create_strategy(args: CreateStrategyArgs) -> Result<()> {
    let req = CreateStrategyRequest {
        namespaces: args.namespaces.clone(),
        label_selectors: parse_selectors(&args.selectors)?,
        command_regex: args.command_regex.clone(),
        priority: args.priority,
        execution_time: args.execution_time,
    };
    let created = client(&args.endpoint).create_strategy(&req).await?;

    println!("Created strategy {}", created.strategy.id);
    for intent in &created.intents {
        println!(
            "  intent {}  pod={}  node={}  state={:?}",
            intent.id, intent.pod_name, intent.node_id, intent.state
        );
    }
    Ok(())
}

pub async fn run_list_strategies(args: AuthedArgs) -> Result<()> {
    let strategies = client(&args.endpoint).list_strategies().await?;
    if strategies.is_empty() {
        println!("No strategies");
        return Ok(());
    }
    for strategy in strategies {
        println!(
            "{}  selectors={}  priority={}  executionTime={}ns",
            strategy.id,
            strategy
                .label_selectors
                .iter()
                .map(|s| format!("{}={}", s.key, s.value))
                .collect::<Vec<_>>()
                .join(","),
            strategy.priority,
            strategy.execution_time,
        );
    }
    Ok(())
}

pub async fn run_delete_strategy(args: DeleteStrategyArgs) -> Result<()> {
    let id: Uuid = args.id.parse().context("invalid strategy id")?;
    client(&args.endpoint).delete_strategy(id).await?;
    println!("Deleted strategy {}", id);
    Ok(())
}

pub async fn run_list_intents(args: AuthedArgs) -> Result<()> {
    let intents = client(&args.endpoint).list_intents().await?;
    if intents.is_empty() {
        println!("No intents");
        return Ok(());
    }
    for intent in intents {
        println!(
            "{}  pod={}  node={}  state={:?}",
            intent.id, intent.pod_name, intent.node_id, intent.state
        );
    }
    Ok(())
}

pub async fn run_delete_intents(args: DeleteIntentsArgs) -> Result<()> {
    if args.ids.is_empty() {
        bail!("at least one --id is required");
    }
    let ids: Vec<Uuid> = args
        .ids
        .iter()
        .map(|s| s.parse().context("invalid intent id"))
        .collect::<Result<_>>()?;
    let count = ids.len();
    client(&args.endpoint).delete_intents(ids).await?;
    println!("Deleted {} intent(s)", count);
    Ok(())
}

pub async fn run_nodes(args: EndpointArgs) -> Result<()> {
    let nodes = client(&args).nodes().await?;
    println!("{}", serde_json::to_string_pretty(&nodes)?);
    Ok(())
}

pub async fn run_pids(args: PidsArgs) -> Result<()> {
    let mapping = client(&args.endpoint).node_pod_pids(&args.node).await?;
    println!("{}", serde_json::to_string_pretty(&mapping)?);
    Ok(())
}

pub async fn run_health(args: EndpointArgs) -> Result<()> {
    client(&args).health().await?;
    println!("OK");
    Ok(())
}
