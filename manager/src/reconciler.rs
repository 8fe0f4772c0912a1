//! The periodic repair loop.
//!
//! Phase A refreshes intents whose pods were replaced: stale intents are
//! deleted (store first, then the affected decision makers), and pods
//! not yet represented get fresh intents. Phase B compares each online
//! decision maker's Merkle root against the node-scoped root of the
//! persisted intents and resends the node's full set on mismatch.
//!
//! Errors never escape a tick: each strategy and each decision maker is
//! handled independently, and whatever failed is retried next tick.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    dm::DmApi,
    metrics,
    models::{Intent, IntentFilter, IntentState, Strategy, now_ms},
    store::IntentStore,
    topology::{ClusterTopology, DmEndpoint, DmState, PodQuery},
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

pub struct Reconciler {
    store: Arc<dyn IntentStore>,
    topology: Arc<dyn ClusterTopology>,
    dm: Arc<dyn DmApi>,
    interval: Duration,
    initial_delay: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn IntentStore>,
        topology: Arc<dyn ClusterTopology>,
        dm: Arc<dyn DmApi>,
    ) -> Self {
        Self {
            store,
            topology,
            dm,
            interval: DEFAULT_INTERVAL,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }

    pub fn with_timing(mut self, interval: Duration, initial_delay: Duration) -> Self {
        self.interval = interval;
        self.initial_delay = initial_delay;
        self
    }

    /// Drive ticks until cancelled. The warm-up delay lets the HTTP
    /// surface come up before the first reconciliation.
    pub async fn run(self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("reconciler stopping");
                    return;
                }
                _ = tick.tick() => {}
            }
            metrics::reconcile_tick();
            if let Err(e) = self.tick().await {
                tracing::warn!("reconcile tick failed: {:#}", e);
            }
        }
    }

    /// One full reconciliation: Phase A, then Phase B.
    pub async fn tick(&self) -> Result<()> {
        self.refresh_stale_intents().await?;
        self.resync_decision_makers().await?;
        Ok(())
    }

    /// Phase A: re-project every strategy onto the live pod set.
    async fn refresh_stale_intents(&self) -> Result<()> {
        let strategies = self.store.query_strategies(&Default::default()).await?;
        for strategy in &strategies {
            if let Err(e) = self.refresh_strategy(strategy).await {
                tracing::warn!(strategy = %strategy.id, "stale refresh failed: {:#}", e);
            }
        }
        Ok(())
    }

    async fn refresh_strategy(&self, strategy: &Strategy) -> Result<()> {
        let live = self.topology.query_pods(&PodQuery::from(strategy)).await?;
        let live_ids: HashSet<&str> = live.iter().map(|p| p.pod_id.as_str()).collect();

        let stored = self
            .store
            .query_intents(&IntentFilter::by_strategy(strategy.id))
            .await?;

        let (stale, fresh): (Vec<&Intent>, Vec<&Intent>) = stored
            .iter()
            .partition(|i| !live_ids.contains(i.pod_id.as_str()));

        let fresh_pod_ids: HashSet<&str> = fresh.iter().map(|i| i.pod_id.as_str()).collect();
        let unrepresented: Vec<_> = live
            .iter()
            .filter(|p| !fresh_pod_ids.contains(p.pod_id.as_str()))
            .collect();

        if !stale.is_empty() {
            let ids: Vec<Uuid> = stale.iter().map(|i| i.id).collect();
            self.store.delete_intents(&ids).await?;
            metrics::intents_refreshed(ids.len());
            self.notify_stale_deletions(&stale).await;
        }

        if !unrepresented.is_empty() {
            let new_intents: Vec<Intent> = unrepresented
                .iter()
                .map(|pod| Intent {
                    id: Uuid::nil(),
                    strategy_id: strategy.id,
                    created_by: strategy.created_by.clone(),
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
                })
                .collect();
            tracing::info!(
                strategy = %strategy.id,
                count = new_intents.len(),
                "inserting intents for replaced pods"
            );
            self.store.insert_intents(new_intents).await?;
        }
        Ok(())
    }

    /// Tell each affected decision maker to drop pods whose intents went
    /// stale. Best-effort; Phase B converges the remainder.
    async fn notify_stale_deletions(&self, stale: &[&Intent]) {
        let mut by_node: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for intent in stale {
            by_node
                .entry(intent.node_id.clone())
                .or_default()
                .push(intent.pod_id.clone());
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
                tracing::warn!(node = %node_id, "stale deletion notify failed: {:#}", e);
            }
        }
    }

    /// Phase B: resend a node's full intent set when its decision
    /// maker's root differs from the expected node-scoped root.
    async fn resync_decision_makers(&self) -> Result<()> {
        let dms = self.topology.query_decision_makers(None).await?;
        for dm in dms.iter().filter(|dm| dm.state == DmState::Online) {
            if let Err(e) = self.resync_one(dm).await {
                tracing::warn!(node = %dm.node_id, "resync failed: {:#}", e);
            }
        }
        Ok(())
    }

    async fn resync_one(&self, dm: &DmEndpoint) -> Result<()> {
        let intents = self
            .store
            .query_intents(&IntentFilter::by_node(&dm.node_id))
            .await?;
        let specs: Vec<_> = intents.iter().map(|i| i.to_spec()).collect();
        let expected = kinetic_common::intent::merkle_root(&specs);

        let reported = self.dm.merkle_root(dm).await?;
        if reported == expected {
            return Ok(());
        }

        tracing::info!(
            node = %dm.node_id,
            expected = %expected,
            reported = %reported,
            count = specs.len(),
            "merkle drift detected, resending intents"
        );
        self.dm.send_intents(dm, &specs).await?;
        metrics::node_resynced(specs.len());

        let ids: Vec<Uuid> = intents.iter().map(|i| i.id).collect();
        if !ids.is_empty() {
            self.store
                .batch_update_intents_state(&ids, IntentState::Sent)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dm::testing::{DmCall, RecordingDm},
        models::Strategy,
        store::testing::MemStore,
        topology::testing::{FakeTopology, pod},
    };
    use kinetic_common::intent::{LabelSelector, merkle_root};
    use kinetic_common::merkle::empty_root;

    fn strategy(labels: &[(&str, &str)]) -> Strategy {
        Strategy {
            id: Uuid::nil(),
            created_by: "operator".to_string(),
            namespaces: vec![],
            label_selectors: labels
                .iter()
                .map(|(k, v)| LabelSelector {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
            command_regex: String::new(),
            priority: true,
            execution_time: 20_000_000,
            created_at: 0,
            updated_at: 0,
        }
    }

    struct Harness {
        store: Arc<MemStore>,
        topology: Arc<FakeTopology>,
        dm: Arc<RecordingDm>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemStore::new());
        let topology = Arc::new(FakeTopology::new());
        let dm = Arc::new(RecordingDm::new());
        let reconciler = Reconciler::new(store.clone(), topology.clone(), dm.clone());
        Harness {
            store,
            topology,
            dm,
            reconciler,
        }
    }

    /// Seed one strategy materialized onto the given pod.
    async fn seed(h: &Harness, pod_id: &str, node_id: &str) -> (Strategy, Intent) {
        let strategy = strategy(&[("nf", "upf")]);
        let intent = Intent {
            id: Uuid::nil(),
            strategy_id: Uuid::nil(),
            created_by: "operator".to_string(),
            pod_name: format!("{}-0", pod_id),
            pod_id: pod_id.to_string(),
            node_id: node_id.to_string(),
            k8s_namespace: "default".to_string(),
            pod_labels: [("nf".to_string(), "upf".to_string())].into_iter().collect(),
            command_regex: String::new(),
            priority: true,
            execution_time: 20_000_000,
            state: IntentState::Initialized,
            created_at: 0,
            updated_at: 0,
        };
        let (strategy, mut intents) = h
            .store
            .insert_strategy_and_intents(strategy, vec![intent])
            .await
            .unwrap();
        (strategy, intents.remove(0))
    }

    #[tokio::test]
    async fn drift_triggers_exactly_one_resend_and_sent_transition() {
        let h = harness();
        let (_, intent) = seed(&h, "pod-upf", "node-a").await;
        h.topology
            .set_pods(vec![pod("pod-upf-0", "pod-upf", "node-a", &[("nf", "upf")])]);
        h.topology.add_dm("node-a", DmState::Online);
        h.dm.set_root("node-a", "stale-hash");

        h.reconciler.tick().await.unwrap();

        let sends = h.dm.sends();
        assert_eq!(sends.len(), 1);
        let DmCall::Send { node_id, intents } = &sends[0] else {
            unreachable!()
        };
        assert_eq!(node_id, "node-a");
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].pod_id, "pod-upf");

        let stored = h.store.query_intents(&IntentFilter::default()).await.unwrap();
        assert_eq!(stored[0].id, intent.id);
        assert_eq!(stored[0].state, IntentState::Sent);
    }

    #[tokio::test]
    async fn matching_roots_send_nothing_and_write_nothing() {
        let h = harness();
        let (_, intent) = seed(&h, "pod-upf", "node-a").await;
        h.topology
            .set_pods(vec![pod("pod-upf-0", "pod-upf", "node-a", &[("nf", "upf")])]);
        h.topology.add_dm("node-a", DmState::Online);
        h.dm.set_root("node-a", &merkle_root(&[intent.to_spec()]));

        let writes_before = h.store.write_count();
        h.reconciler.tick().await.unwrap();

        assert!(h.dm.sends().is_empty());
        assert!(h.dm.deletes().is_empty());
        assert_eq!(h.store.write_count(), writes_before);
    }

    #[tokio::test]
    async fn replaced_pod_is_refreshed() {
        let h = harness();
        let (strategy, old_intent) = seed(&h, "old-pod-id", "node-a").await;
        // The selector now matches a replacement pod with a new id.
        h.topology
            .set_pods(vec![pod("upf-1", "new-pod-id", "node-a", &[("nf", "upf")])]);
        h.topology.add_dm("node-a", DmState::Online);
        h.dm.set_root("node-a", "whatever");

        h.reconciler.tick().await.unwrap();

        let stored = h.store.query_intents(&IntentFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].pod_id, "new-pod-id");
        assert_eq!(stored[0].strategy_id, strategy.id);
        assert_ne!(stored[0].id, old_intent.id);

        let deletes = h.dm.deletes();
        assert_eq!(deletes.len(), 1);
        let DmCall::Delete { node_id, pod_ids, all } = &deletes[0] else {
            unreachable!()
        };
        assert_eq!(node_id, "node-a");
        assert_eq!(pod_ids, &["old-pod-id".to_string()]);
        assert!(!all);
    }

    #[tokio::test]
    async fn phase_b_sees_phase_a_refreshes_in_the_same_tick() {
        let h = harness();
        seed(&h, "old-pod-id", "node-a").await;
        h.topology
            .set_pods(vec![pod("upf-1", "new-pod-id", "node-a", &[("nf", "upf")])]);
        h.topology.add_dm("node-a", DmState::Online);
        h.dm.set_root("node-a", "stale-hash");

        h.reconciler.tick().await.unwrap();

        // The resend carries the refreshed intent, not the stale one.
        let sends = h.dm.sends();
        assert_eq!(sends.len(), 1);
        let DmCall::Send { intents, .. } = &sends[0] else {
            unreachable!()
        };
        assert_eq!(intents[0].pod_id, "new-pod-id");
    }

    #[tokio::test]
    async fn offline_and_unknown_decision_makers_are_skipped() {
        let h = harness();
        let (_, intent) = seed(&h, "pod-upf", "node-a").await;
        h.topology
            .set_pods(vec![pod("pod-upf-0", "pod-upf", "node-a", &[("nf", "upf")])]);
        h.topology.add_dm("node-a", DmState::Offline);
        h.topology.add_dm("node-b", DmState::Unknown);
        h.dm.set_root("node-a", "stale-hash");

        h.reconciler.tick().await.unwrap();
        assert!(h.dm.sends().is_empty());

        let stored = h.store.query_intents(&IntentFilter::default()).await.unwrap();
        assert_eq!(stored[0].id, intent.id);
        assert_eq!(stored[0].state, IntentState::Initialized);
    }

    #[tokio::test]
    async fn empty_node_expects_the_empty_tree_root() {
        let h = harness();
        h.topology.add_dm("node-empty", DmState::Online);
        h.dm.set_root("node-empty", &empty_root());

        h.reconciler.tick().await.unwrap();
        assert!(h.dm.sends().is_empty());
    }

    #[tokio::test]
    async fn one_failing_decision_maker_does_not_block_others() {
        let h = harness();
        seed(&h, "pod-a", "node-a").await;
        seed(&h, "pod-b", "node-b").await;
        h.topology.set_pods(vec![
            pod("a-0", "pod-a", "node-a", &[("nf", "upf")]),
            pod("b-0", "pod-b", "node-b", &[("nf", "upf")]),
        ]);
        h.topology.add_dm("node-a", DmState::Online);
        h.topology.add_dm("node-b", DmState::Online);
        // node-a has no configured root, so merkle_root errors out.
        h.dm.set_root("node-b", "stale-hash");

        h.reconciler.tick().await.unwrap();

        let sends = h.dm.sends();
        assert_eq!(sends.len(), 1);
        let DmCall::Send { node_id, .. } = &sends[0] else {
            unreachable!()
        };
        assert_eq!(node_id, "node-b");
    }
}
