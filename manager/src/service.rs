//! User-facing strategy operations: create, list, delete, and the
//! fan-out of fresh intents to decision makers.

use std::{collections::BTreeMap, sync::Arc};

use kinetic_common::error::ApiError;
use uuid::Uuid;

use crate::{
    dm::DmApi,
    metrics,
    models::{
        CreateStrategyRequest, Intent, IntentFilter, IntentState, Strategy, StrategyFilter,
        StrategyWithIntents, now_ms,
    },
    store::IntentStore,
    topology::{ClusterTopology, DmEndpoint, DmState, PodQuery, PodSummary},
};

pub struct StrategyService {
    store: Arc<dyn IntentStore>,
    topology: Arc<dyn ClusterTopology>,
    dm: Arc<dyn DmApi>,
}

impl StrategyService {
    pub fn new(
        store: Arc<dyn IntentStore>,
        topology: Arc<dyn ClusterTopology>,
        dm: Arc<dyn DmApi>,
    ) -> Self {
        Self { store, topology, dm }
    }

    /// Create a strategy: match pods, persist strategy + one intent per
    /// pod, then dispatch each node's intents to its decision maker.
    ///
    /// Persistence precedes dispatch; a failed dispatch leaves the
    /// affected intents Initialized for the reconciler to repair.
    pub async fn create_strategy(
        &self,
        caller: &str,
        req: CreateStrategyRequest,
    ) -> Result<StrategyWithIntents, ApiError> {
        if !req.command_regex.is_empty()
            && let Err(e) = regex::Regex::new(&req.command_regex)
        {
            return Err(ApiError::Validation(format!("invalid command regex: {}", e)));
        }

        let strategy = Strategy {
            id: Uuid::nil(),
            created_by: caller.to_string(),
            namespaces: req.namespaces,
            label_selectors: req.label_selectors,
            command_regex: req.command_regex,
            priority: req.priority,
            execution_time: req.execution_time,
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        let pods = self
            .topology
            .query_pods(&PodQuery::from(&strategy))
            .await
            .map_err(|e| ApiError::Upstream(format!("pod query failed: {:#}", e)))?;
        if pods.is_empty() {
            return Err(ApiError::NotFound("no pods match the strategy".to_string()));
        }

        let intents: Vec<Intent> = pods
            .iter()
            .map(|pod| materialize(&strategy, pod, caller))
            .collect();

        let (strategy, mut intents) = self
            .store
            .insert_strategy_and_intents(strategy, intents)
            .await
            .map_err(ApiError::Internal)?;
        metrics::strategy_created(intents.len());

        // Dispatch per node; failures leave the intents Initialized.
        let sent = self.dispatch(&intents).await;
        if !sent.is_empty() {
            self.store
                .batch_update_intents_state(&sent, IntentState::Sent)
                .await
                .map_err(ApiError::Internal)?;
            for intent in &mut intents {
                if sent.contains(&intent.id) {
                    intent.state = IntentState::Sent;
                }
            }
        }

        Ok(StrategyWithIntents { strategy, intents })
    }

    /// Group intents by node, send each group to the node's decision
    /// maker, and return the ids that were acknowledged.
    pub async fn dispatch(&self, intents: &[Intent]) -> Vec<Uuid> {
        let mut by_node: BTreeMap<String, Vec<&Intent>> = BTreeMap::new();
        for intent in intents {
            by_node.entry(intent.node_id.clone()).or_default().push(intent);
        }
        let node_ids: Vec<String> = by_node.keys().cloned().collect();

        let dms = match self.topology.query_decision_makers(Some(&node_ids)).await {
            Ok(dms) => dms,
            Err(e) => {
                tracing::warn!("decision maker lookup failed: {:#}", e);
                return Vec::new();
            }
        };

        let mut sent = Vec::new();
        for (node_id, group) in by_node {
            let Some(dm) = dms.iter().find(|dm| dm.node_id == node_id) else {
                tracing::warn!(node = %node_id, "no decision maker found for node");
                continue;
            };
            if dm.state != DmState::Online {
                tracing::warn!(node = %node_id, state = ?dm.state, "decision maker not online");
                continue;
            }
            let specs: Vec<_> = group.iter().map(|i| i.to_spec()).collect();
            match self.dm.send_intents(dm, &specs).await {
                Ok(()) => {
                    metrics::intents_dispatched(specs.len());
                    sent.extend(group.iter().map(|i| i.id));
                }
                Err(e) => {
                    tracing::warn!(node = %node_id, "intent dispatch failed: {:#}", e);
                }
            }
        }
        sent
    }

    pub async fn list_strategies(&self, caller: &str) -> Result<Vec<Strategy>, ApiError> {
        self.store
            .query_strategies(&StrategyFilter {
                created_by: Some(caller.to_string()),
                ..Default::default()
            })
            .await
            .map_err(ApiError::Internal)
    }

    pub async fn list_intents(&self, caller: &str) -> Result<Vec<Intent>, ApiError> {
        self.store
            .query_intents(&IntentFilter {
                created_by: Some(caller.to_string()),
                ..Default::default()
            })
            .await
            .map_err(ApiError::Internal)
    }

    /// Delete a strategy the caller owns, cascade its intents, and
    /// notify the affected decision makers best-effort.
    pub async fn delete_strategy(&self, caller: &str, id: Uuid) -> Result<(), ApiError> {
        let strategies = self
            .store
            .query_strategies(&StrategyFilter {
                ids: Some(vec![id]),
                ..Default::default()
            })
            .await
            .map_err(ApiError::Internal)?;
        let Some(strategy) = strategies.into_iter().next() else {
            return Err(ApiError::NotFound(format!("strategy {} not found", id)));
        };
        if strategy.created_by != caller {
            return Err(ApiError::Permission(
                "strategy belongs to another user".to_string(),
            ));
        }

        let intents = self
            .store
            .query_intents(&IntentFilter::by_strategy(id))
            .await
            .map_err(ApiError::Internal)?;

        self.store
            .delete_intents_by_strategy(id)
            .await
            .map_err(ApiError::Internal)?;
        self.store.delete_strategy(id).await.map_err(ApiError::Internal)?;
        metrics::strategy_deleted(intents.len());

        self.notify_deletions(&intents).await;
        Ok(())
    }

    /// Delete individual intents. Every requested id must exist and be
    /// owned by the caller, otherwise nothing is deleted.
    pub async fn delete_intents(&self, caller: &str, ids: Vec<Uuid>) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Err(ApiError::Validation("intentIds is required".to_string()));
        }

        let owned = self
            .store
            .query_intents(&IntentFilter {
                ids: Some(ids.clone()),
                created_by: Some(caller.to_string()),
                ..Default::default()
            })
            .await
            .map_err(ApiError::Internal)?;
        if owned.len() != ids.len() {
            return Err(ApiError::Permission(
                "one or more intents are missing or not owned by the caller".to_string(),
            ));
        }

        self.store.delete_intents(&ids).await.map_err(ApiError::Internal)?;
        self.notify_deletions(&owned).await;
        Ok(())
    }

    /// Tell each affected decision maker to drop the deleted pods.
    /// Failures are logged only; the reconciler converges later.
    async fn notify_deletions(&self, intents: &[Intent]) {
        let mut by_node: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for intent in intents {
            by_node
                .entry(intent.node_id.clone())
                .or_default()
                .push(intent.pod_id.clone());
        }
        if by_node.is_empty() {
            return;
        }
        let node_ids: Vec<String> = by_node.keys().cloned().collect();

        let dms = match self.topology.query_decision_makers(Some(&node_ids)).await {
            Ok(dms) => dms,
            Err(e) => {
                tracing::warn!("decision maker lookup failed: {:#}", e);
                return;
            }
        };
        for (node_id, pod_ids) in by_node {
            let Some(dm) = dms.iter().find(|dm| dm.node_id == node_id) else {
                continue;
            };
            if let Err(e) = self.dm.delete_intents(dm, &pod_ids, false).await {
                tracing::warn!(node = %node_id, "intent deletion notify failed: {:#}", e);
            }
        }
    }

    pub async fn nodes(&self) -> Result<Vec<DmEndpoint>, ApiError> {
        self.topology
            .query_decision_makers(None)
            .await
            .map_err(|e| ApiError::Upstream(format!("node query failed: {:#}", e)))
    }

    pub async fn node_pod_pids(
        &self,
        node_id: &str,
    ) -> Result<kinetic_common::pids::PodPidsResponse, ApiError> {
        let node_ids = vec![node_id.to_string()];
        let dms = self
            .topology
            .query_decision_makers(Some(&node_ids))
            .await
            .map_err(|e| ApiError::Upstream(format!("node query failed: {:#}", e)))?;
        let Some(dm) = dms.first() else {
            return Err(ApiError::NotFound(format!(
                "no decision maker on node {}",
                node_id
            )));
        };
        self.dm
            .pod_pids(dm)
            .await
            .map_err(|e| ApiError::Upstream(format!("pod pid query failed: {:#}", e)))
    }
}

/// Project a strategy onto one pod.
fn materialize(strategy: &Strategy, pod: &PodSummary, caller: &str) -> Intent {
    Intent {
        id: Uuid::nil(),
        strategy_id: strategy.id,
        created_by: caller.to_string(),
        pod_name: pod.name.clone(),
        pod_id: pod.pod_id.clone(),
        node_id: pod.node_id.clone(),
        k8s_namespace: pod.namespace.clone(),
        pod_labels: pod.labels.clone(),
        command_regex: strategy.command_regex.clone(),
        priority: strategy.priority,
        execution_time: strategy.execution_time,
        state: IntentState::Initialized,
        created_at: now_ms(),
        updated_at: now_ms(),
    }
}
