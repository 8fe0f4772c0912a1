//! The decision maker's in-memory intent set.
//!
//! The manager is the writer; the authoritative key is the pod ID. The
//! Merkle tree over the canonically sorted set is rebuilt under the same
//! mutex that guards the set, so the reported root always corresponds to
//! the intents actually held.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
};

use anyhow::Result;
use async_trait::async_trait;
use kinetic_common::{
    intent::{self, IntentSpec, LabelSelector},
    merkle::{self, MerkleNode},
};

use crate::resolver::{PodLabelSource, SchedStrategy};

struct IntentSetState {
    intents: Vec<IntentSpec>,
    tree: MerkleNode,
}

pub struct IntentSet {
    state: Mutex<IntentSetState>,
}

impl Default for IntentSet {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentSet {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IntentSetState {
                intents: Vec::new(),
                tree: merkle::build(&[]),
            }),
        }
    }

    /// Upsert a batch of intents. An incoming intent replaces any held
    /// intent with the same pod ID. Returns the new root.
    pub fn upsert(&self, batch: Vec<IntentSpec>) -> String {
        let mut state = self.state.lock().expect("intent set lock poisoned");
        for incoming in batch {
            match state
                .intents
                .iter_mut()
                .find(|i| i.pod_id == incoming.pod_id)
            {
                Some(existing) => *existing = incoming,
                None => state.intents.push(incoming),
            }
        }
        rebuild(&mut state)
    }

    /// Remove intents for the given pod IDs. Returns the new root.
    pub fn delete_pods(&self, pod_ids: &[String]) -> String {
        let mut state = self.state.lock().expect("intent set lock poisoned");
        state.intents.retain(|i| !pod_ids.contains(&i.pod_id));
        rebuild(&mut state)
    }

    /// Drop every held intent. Returns the empty-tree root.
    pub fn clear(&self) -> String {
        let mut state = self.state.lock().expect("intent set lock poisoned");
        state.intents.clear();
        rebuild(&mut state)
    }

    pub fn merkle_root(&self) -> String {
        self.state
            .lock()
            .expect("intent set lock poisoned")
            .tree
            .hash
            .clone()
    }

    /// Rebuild the tree from the held set. Used by the optional periodic
    /// refresh; a no-op unless the tree was somehow left behind.
    pub fn recompute_root(&self) -> String {
        let mut state = self.state.lock().expect("intent set lock poisoned");
        rebuild(&mut state)
    }

    pub fn snapshot(&self) -> Vec<IntentSpec> {
        self.state
            .lock()
            .expect("intent set lock poisoned")
            .intents
            .clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("intent set lock poisoned").intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pod IDs named by held intents; used to enrich discovery output.
    pub fn known_pod_ids(&self) -> HashSet<String> {
        self.state
            .lock()
            .expect("intent set lock poisoned")
            .intents
            .iter()
            .map(|i| i.pod_id.clone())
            .collect()
    }

    /// Project the held intents into resolver input. The label snapshot
    /// carried by each intent acts as its selector set, so resolution
    /// keeps working across pod replacement until the manager refreshes.
    pub fn as_sched_strategies(&self) -> Vec<SchedStrategy> {
        self.state
            .lock()
            .expect("intent set lock poisoned")
            .intents
            .iter()
            .map(|i| SchedStrategy {
                selectors: i
                    .pod_labels
                    .iter()
                    .map(|(k, v)| LabelSelector {
                        key: k.clone(),
                        value: v.clone(),
                    })
                    .collect(),
                command_regex: i.command_regex.clone(),
                priority: i.priority,
                execution_time: i.execution_time,
                pid: 0,
            })
            .collect()
    }

    /// Depth-truncated view of the current tree.
    ///
    /// With a root hash, the named subtree becomes the view's root; an
    /// unknown hash yields `None`. Depth 0 keeps only the root hash.
    pub fn subtree_view(&self, root_hash: Option<&str>, depth: usize) -> Option<MerkleNode> {
        let state = self.state.lock().expect("intent set lock poisoned");
        let node = match root_hash {
            Some(hash) => merkle::find(&state.tree, hash)?,
            None => &state.tree,
        };
        Some(merkle::truncate(node, depth))
    }
}

fn rebuild(state: &mut IntentSetState) -> String {
    state.tree = intent::merkle_tree(&state.intents);
    state.tree.hash.clone()
}

/// Label source answering from the held intent snapshots. Used when the
/// agent runs without cluster API access.
pub struct IntentLabelSource(pub std::sync::Arc<IntentSet>);

#[async_trait]
impl PodLabelSource for IntentLabelSource {
    async fn pod_labels(&self, pod_uid: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .0
            .snapshot()
            .into_iter()
            .find(|i| i.pod_id == pod_uid)
            .map(|i| i.pod_labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(pod_id: &str, execution_time: u64) -> IntentSpec {
        IntentSpec {
            pod_name: format!("{}-0", pod_id),
            pod_id: pod_id.to_string(),
            node_id: "node-a".to_string(),
            k8s_namespace: "default".to_string(),
            command_regex: String::new(),
            priority: false,
            execution_time,
            pod_labels: BTreeMap::from([("nf".to_string(), "upf".to_string())]),
        }
    }

    #[test]
    fn starts_at_the_empty_tree_root() {
        let set = IntentSet::new();
        assert_eq!(set.merkle_root(), merkle::empty_root());
        assert!(set.is_empty());
    }

    #[test]
    fn upsert_replaces_by_pod_id() {
        let set = IntentSet::new();
        set.upsert(vec![spec("pod-1", 10), spec("pod-2", 10)]);
        assert_eq!(set.len(), 2);

        set.upsert(vec![spec("pod-1", 99)]);
        assert_eq!(set.len(), 2);
        let held = set.snapshot();
        let pod1 = held.iter().find(|i| i.pod_id == "pod-1").unwrap();
        assert_eq!(pod1.execution_time, 99);
    }

    #[test]
    fn root_matches_manager_side_computation() {
        let set = IntentSet::new();
        let intents = vec![spec("pod-1", 10), spec("pod-2", 20)];
        let root = set.upsert(intents.clone());
        assert_eq!(root, intent::merkle_root(&intents));
        assert_eq!(set.merkle_root(), root);
    }

    #[test]
    fn delete_pods_removes_matching_entries() {
        let set = IntentSet::new();
        set.upsert(vec![spec("pod-1", 10), spec("pod-2", 20)]);

        let root = set.delete_pods(&["pod-1".to_string()]);
        assert_eq!(set.len(), 1);
        assert_eq!(root, intent::merkle_root(&[spec("pod-2", 20)]));

        set.clear();
        assert_eq!(set.merkle_root(), merkle::empty_root());
    }

    #[test]
    fn subtree_view_round_trips_the_root() {
        let set = IntentSet::new();
        set.upsert(vec![spec("pod-1", 10), spec("pod-2", 20), spec("pod-3", 30)]);
        let root = set.merkle_root();

        let view = set.subtree_view(Some(&root), 0).unwrap();
        assert_eq!(view.hash, root);
        assert!(view.left.is_none());

        let deep = set.subtree_view(None, 8).unwrap();
        assert_eq!(deep.hash, root);
        assert!(deep.left.is_some());

        assert!(set.subtree_view(Some("no-such-hash"), 1).is_none());
    }

    #[test]
    fn sched_strategy_projection_uses_label_snapshot() {
        let set = IntentSet::new();
        set.upsert(vec![spec("pod-1", 10)]);
        let strategies = set.as_sched_strategies();
        assert_eq!(strategies.len(), 1);
        assert_eq!(
            strategies[0].selectors,
            vec![LabelSelector {
                key: "nf".to_string(),
                value: "upf".to_string()
            }]
        );
        assert_eq!(strategies[0].pid, 0);
    }
}
