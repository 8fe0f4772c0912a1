//! Wire shape of the per-node pod → process mapping served by decision
//! makers and proxied by the manager.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: i32,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodPids {
    pub pod_uid: String,
    /// Set when the pod is known to the control plane (an intent names it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<String>,
    pub processes: Vec<ProcessEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodPidsResponse {
    pub pods: Vec<PodPids>,
    /// Unix seconds at scan time.
    pub timestamp: i64,
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}
