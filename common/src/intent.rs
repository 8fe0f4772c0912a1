//! Intent wire format and its canonical serialization.
//!
//! The JSON shape here is what travels between manager and decision maker.
//! Field order in JSON is irrelevant; drift detection relies on the
//! canonical pipe-joined encoding below, which must stay byte-identical on
//! both sides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{merkle, sha256_hex};

/// One label equality requirement of a strategy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

/// One materialized application of a strategy to a pod, as shipped to a
/// decision maker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSpec {
    pub pod_name: String,
    #[serde(rename = "podID")]
    pub pod_id: String,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub k8s_namespace: String,
    #[serde(default)]
    pub command_regex: String,
    #[serde(with = "int_bool")]
    pub priority: bool,
    pub execution_time: u64,
    #[serde(default)]
    pub pod_labels: BTreeMap<String, String>,
}

impl IntentSpec {
    /// Deterministic encoding used for leaf hashing. Label entries are
    /// emitted in lexicographic key order.
    pub fn canonical_string(&self) -> String {
        let labels = self
            .pod_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "podName={}|podID={}|nodeID={}|k8sNamespace={}|commandRegex={}|priority={}|executionTime={}|podLabels={}",
            self.pod_name,
            self.pod_id,
            self.node_id,
            self.k8s_namespace,
            self.command_regex,
            self.priority as u8,
            self.execution_time,
            labels,
        )
    }

    /// Lowercase hex SHA-256 of the canonical string.
    pub fn leaf_hash(&self) -> String {
        sha256_hex(self.canonical_string().as_bytes())
    }
}

/// Build the full tree over an intent set. Leaves are ordered by canonical
/// string, not by hash.
pub fn merkle_tree(intents: &[IntentSpec]) -> merkle::MerkleNode {
    let mut canonical: Vec<String> = intents.iter().map(|i| i.canonical_string()).collect();
    canonical.sort();
    let leaves: Vec<String> = canonical
        .iter()
        .map(|s| sha256_hex(s.as_bytes()))
        .collect();
    merkle::build(&leaves)
}

/// Root hash over an intent set.
pub fn merkle_root(intents: &[IntentSpec]) -> String {
    merkle_tree(intents).hash
}

/// Root hash over the subset of intents placed on `node_id`.
///
/// A decision maker's root must only ever be compared against this
/// node-scoped root; the global root differs whenever other nodes hold
/// intents.
pub fn node_merkle_root(intents: &[IntentSpec], node_id: &str) -> String {
    let scoped: Vec<IntentSpec> = intents
        .iter()
        .filter(|i| i.node_id == node_id)
        .cloned()
        .collect();
    merkle_root(&scoped)
}

/// The wire encodes the priority flag as 0/1.
mod int_bool {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*v as i32)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(i64::deserialize(deserializer)? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::empty_root;

    fn intent(pod_id: &str, node_id: &str) -> IntentSpec {
        IntentSpec {
            pod_name: format!("{}-name", pod_id),
            pod_id: pod_id.to_string(),
            node_id: node_id.to_string(),
            k8s_namespace: "default".to_string(),
            command_regex: String::new(),
            priority: true,
            execution_time: 20_000_000,
            pod_labels: BTreeMap::from([
                ("nf".to_string(), "upf".to_string()),
                ("app".to_string(), "core".to_string()),
            ]),
        }
    }

    #[test]
    fn canonical_string_sorts_labels_by_key() {
        let i = intent("pod-1", "node-a");
        assert_eq!(
            i.canonical_string(),
            "podName=pod-1-name|podID=pod-1|nodeID=node-a|k8sNamespace=default\
             |commandRegex=|priority=1|executionTime=20000000|podLabels=app=core,nf=upf",
        );
    }

    #[test]
    fn wire_json_uses_camel_case_and_integer_priority() {
        let value = serde_json::to_value(intent("p", "n")).unwrap();
        assert_eq!(value["podID"], "p");
        assert_eq!(value["nodeID"], "n");
        assert_eq!(value["k8sNamespace"], "default");
        assert_eq!(value["priority"], 1);
        assert_eq!(value["executionTime"], 20_000_000u64);

        let back: IntentSpec = serde_json::from_value(value).unwrap();
        assert!(back.priority);
    }

    #[test]
    fn root_is_invariant_under_permutation() {
        let a = intent("pod-a", "node-1");
        let b = intent("pod-b", "node-1");
        let c = intent("pod-c", "node-1");
        let forward = merkle_root(&[a.clone(), b.clone(), c.clone()]);
        let backward = merkle_root(&[c, a, b]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn empty_intent_set_has_empty_tree_root() {
        assert_eq!(merkle_root(&[]), empty_root());
        assert_eq!(node_merkle_root(&[intent("p", "node-a")], "node-b"), empty_root());
    }

    #[test]
    fn node_roots_partition_the_intent_set() {
        let a1 = intent("pod-a1", "node-a");
        let a2 = intent("pod-a2", "node-a");
        let b1 = intent("pod-b1", "node-b");
        let all = vec![a1.clone(), a2.clone(), b1.clone()];

        let root_a = node_merkle_root(&all, "node-a");
        let root_b = node_merkle_root(&all, "node-b");
        let global = merkle_root(&all);

        assert_eq!(root_a, merkle_root(&[a1, a2]));
        assert_eq!(root_b, b1.leaf_hash());
        assert_ne!(root_a, global);
        assert_ne!(root_b, global);
    }
}
