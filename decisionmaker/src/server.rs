//! HTTP surface of the decision maker.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use kinetic_common::{
    access_log,
    auth::{AuthSecret, AuthSubject},
    error::ApiError,
    intent::IntentSpec,
    pids::{PodPids, PodPidsResponse, ProcessEntry},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    auth::{TokenIssuer, TokenRequest},
    cache::{self, StrategyCache},
    discovery::{PodProcesses, ProcessDiscovery},
    intents::IntentSet,
    metrics,
    resolver::{PodLabelSource, SchedStrategy, StrategyResolver},
};

#[derive(Clone)]
pub struct AppState {
    pub intents: Arc<IntentSet>,
    pub discovery: Arc<ProcessDiscovery>,
    pub resolver: Arc<StrategyResolver<Box<dyn PodLabelSource>>>,
    pub cache: Arc<StrategyCache>,
    pub issuer: Arc<TokenIssuer>,
    pub node_name: String,
    pub node_id: String,
}

pub async fn run_server(
    cancel: CancellationToken,
    port: u16,
    secret: AuthSecret,
    state: AppState,
) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/auth/token", post(issue_token))
        .route("/api/v1/intents", post(put_intents).delete(delete_intents))
        .route("/api/v1/intents/merkle", get(merkle))
        .route("/api/v1/pods/pids", get(pod_pids))
        .route("/api/v1/scheduling/strategies", get(scheduling_strategies))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn(access_log::decision_maker))
        .layer(Extension(secret))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, "starting decision maker HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("decision maker server failed")?;

    tracing::info!("decision maker server stopped gracefully");
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "node_name": state.node_name,
    }))
}

async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = state.issuer.exchange(&req)?;
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
struct IntentsRequest {
    intents: Vec<IntentSpec>,
}

async fn put_intents(
    State(state): State<AppState>,
    _caller: AuthSubject,
    Json(req): Json<IntentsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let count = req.intents.len();
    let root = state.intents.upsert(req.intents);
    metrics::intents_upserted(count);
    tracing::info!(count, root = %root, "upserted intents");
    Ok(Json(serde_json::json!({ "rootHash": root })))
}

#[derive(Debug, Deserialize)]
struct DeleteIntentsRequest {
    #[serde(rename = "podID")]
    pod_id: Option<String>,
    #[serde(rename = "podIDs")]
    pod_ids: Option<Vec<String>>,
    all: Option<bool>,
}

async fn delete_intents(
    State(state): State<AppState>,
    _caller: AuthSubject,
    Json(req): Json<DeleteIntentsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let before = state.intents.len();
    let root = if req.all.unwrap_or(false) {
        state.intents.clear()
    } else {
        let mut pod_ids = req.pod_ids.unwrap_or_default();
        if let Some(pod_id) = req.pod_id {
            pod_ids.push(pod_id);
        }
        if pod_ids.is_empty() {
            return Err(ApiError::Validation(
                "one of podID, podIDs, all is required".to_string(),
            ));
        }
        state.intents.delete_pods(&pod_ids)
    };
    metrics::intents_deleted(before.saturating_sub(state.intents.len()));
    Ok(Json(serde_json::json!({ "rootHash": root })))
}

#[derive(Debug, Deserialize)]
struct MerkleQuery {
    #[serde(rename = "rootHash")]
    root_hash: Option<String>,
    depth: Option<usize>,
}

/// Without `depth`, reports the current root. With `depth` (and an
/// optional `rootHash` naming a subtree), returns a truncated view of
/// the tree, or JSON null when the hash is unknown.
async fn merkle(
    State(state): State<AppState>,
    _caller: AuthSubject,
    Query(query): Query<MerkleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match query.depth {
        None => Ok(Json(serde_json::json!({
            "rootHash": state.intents.merkle_root(),
        }))),
        Some(depth) => {
            let view = state.intents.subtree_view(query.root_hash.as_deref(), depth);
            Ok(Json(serde_json::json!(view)))
        }
    }
}

async fn pod_pids(
    State(state): State<AppState>,
    _caller: AuthSubject,
) -> Result<impl IntoResponse, ApiError> {
    let pods = scan(&state).await?;
    let known = state.intents.known_pod_ids();

    let pods: Vec<PodPids> = pods
        .values()
        .map(|pod| PodPids {
            pod_uid: pod.pod_uid.clone(),
            pod_id: known.contains(&pod.pod_uid).then(|| pod.pod_uid.clone()),
            processes: pod
                .processes
                .iter()
                .map(|p| ProcessEntry {
                    pid: p.pid,
                    command: p.command.clone(),
                    ppid: Some(p.ppid),
                    container_id: (!p.container_id.is_empty()).then(|| p.container_id.clone()),
                })
                .collect(),
        })
        .collect();

    Ok(Json(PodPidsResponse {
        pods,
        timestamp: chrono::Utc::now().timestamp(),
        node_name: state.node_name.clone(),
        node_id: Some(state.node_id.clone()),
    }))
}

/// The node's scheduling agent polls this route for its per-PID rules.
async fn scheduling_strategies(
    State(state): State<AppState>,
    _caller: AuthSubject,
) -> Result<impl IntoResponse, ApiError> {
    let strategies = resolve_strategies(&state).await?;
    Ok(Json(serde_json::json!({ "strategies": strategies })))
}

/// Expand the held intents to live PIDs, memoized per pod-topology
/// epoch and strategy set. A cache hit skips the process-table walk
/// entirely; a miss recomputes and repopulates the cache.
async fn resolve_strategies(state: &AppState) -> Result<Vec<SchedStrategy>, ApiError> {
    let strategies = state.intents.as_sched_strategies();
    if let Some(expansion) = state.cache.get(&strategies) {
        return Ok(expansion);
    }

    let pods = scan(state).await?;
    let expanded = state.resolver.resolve(&strategies, &pods).await;
    metrics::strategies_resolved(expanded.len());
    state.cache.store(
        cache::pod_fingerprint(&pods),
        cache::strategy_fingerprint(&strategies),
        expanded.clone(),
    );
    Ok(expanded)
}

/// One process-table walk on the blocking pool. Feeds the pod
/// fingerprint check so a changed topology invalidates the cache even
/// without a watch event.
async fn scan(state: &AppState) -> Result<BTreeMap<String, PodProcesses>, ApiError> {
    let discovery = state.discovery.clone();
    let pods = tokio::task::spawn_blocking(move || discovery.scan())
        .await
        .context("scan task panicked")
        .map_err(ApiError::Internal)?
        .map_err(|e| {
            metrics::scan_failed();
            ApiError::Internal(e)
        })?;
    metrics::scan_completed(pods.len());
    state.cache.check_pod_fingerprint(&cache::pod_fingerprint(&pods));
    Ok(pods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::TokenIssuer, intents::IntentLabelSource};
    use kinetic_common::intent::IntentSpec;
    use std::fs;

    const POD_UID: &str = "abcd1234-ab12-cd34-ef56-abcdef123456";

    fn fake_procfs() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("100");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("cgroup"),
            "0::/kubepods.slice/kubelet-kubepods-podabcd1234_ab12_cd34_ef56_abcdef123456.slice/\
             cri-containerd-10ec3c89.scope",
        )
        .unwrap();
        fs::write(dir.join("comm"), "upf-main\n").unwrap();
        fs::write(dir.join("stat"), "100 (upf-main) S 1 0 0 0").unwrap();
        tmp
    }

    fn state(proc_root: &std::path::Path) -> AppState {
        let intents = Arc::new(IntentSet::new());
        intents.upsert(vec![IntentSpec {
            pod_name: "upf-0".to_string(),
            pod_id: POD_UID.to_string(),
            node_id: "node-a".to_string(),
            k8s_namespace: "default".to_string(),
            command_regex: String::new(),
            priority: true,
            execution_time: 20_000_000,
            pod_labels: [("nf".to_string(), "upf".to_string())].into_iter().collect(),
        }]);

        let label_source: Box<dyn PodLabelSource> =
            Box::new(IntentLabelSource(intents.clone()));
        AppState {
            intents: intents.clone(),
            discovery: Arc::new(ProcessDiscovery::new(proc_root)),
            resolver: Arc::new(StrategyResolver::new(label_source)),
            cache: Arc::new(StrategyCache::default()),
            issuer: Arc::new(TokenIssuer::new("pk".to_string(), "secret", 600)),
            node_name: "node-a".to_string(),
            node_id: "node-a".to_string(),
        }
    }

    #[tokio::test]
    async fn strategy_resolution_expands_intents_to_pids() {
        let procfs = fake_procfs();
        let state = state(procfs.path());

        let expanded = resolve_strategies(&state).await.unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].pid, 100);
        assert!(expanded[0].priority);
        assert_eq!(expanded[0].execution_time, 20_000_000);
    }

    #[tokio::test]
    async fn second_resolution_is_served_from_the_cache() {
        let procfs = fake_procfs();
        let state = state(procfs.path());

        let first = resolve_strategies(&state).await.unwrap();
        let second = resolve_strategies(&state).await.unwrap();
        assert_eq!(second, first);
        // One miss on the cold call, one hit on the repeat.
        assert_eq!(state.cache.stats(), (1, 1));
    }

    #[tokio::test]
    async fn invalidation_forces_a_recomputation() {
        let procfs = fake_procfs();
        let state = state(procfs.path());

        resolve_strategies(&state).await.unwrap();
        resolve_strategies(&state).await.unwrap();
        state.cache.invalidate();

        let third = resolve_strategies(&state).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(state.cache.stats(), (1, 2));
    }
}
