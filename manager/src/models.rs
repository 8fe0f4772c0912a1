//! Domain records and API bodies for the manager.

use std::collections::BTreeMap;

use kinetic_common::intent::{IntentSpec, LabelSelector};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of an intent. `Sent` is only entered after the
/// targeted decision maker acknowledged the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentState {
    Initialized,
    Sent,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Initialized => "initialized",
            IntentState::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initialized" => Some(IntentState::Initialized),
            "sent" => Some(IntentState::Sent),
            _ => None,
        }
    }
}

/// A user-authored scheduling rule. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub id: Uuid,
    pub created_by: String,
    pub namespaces: Vec<String>,
    pub label_selectors: Vec<LabelSelector>,
    #[serde(default)]
    pub command_regex: String,
    pub priority: bool,
    /// Requested time slice, in nanoseconds.
    pub execution_time: u64,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

/// The projection of one strategy onto one pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub created_by: String,
    pub pod_name: String,
    #[serde(rename = "podID")]
    pub pod_id: String,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub k8s_namespace: String,
    pub pod_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub command_regex: String,
    pub priority: bool,
    pub execution_time: u64,
    pub state: IntentState,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Intent {
    /// The wire descriptor shipped to decision makers; also the input to
    /// the node-scoped Merkle root.
    pub fn to_spec(&self) -> IntentSpec {
        IntentSpec {
            pod_name: self.pod_name.clone(),
            pod_id: self.pod_id.clone(),
            node_id: self.node_id.clone(),
            k8s_namespace: self.k8s_namespace.clone(),
            command_regex: self.command_regex.clone(),
            priority: self.priority,
            execution_time: self.execution_time,
            pod_labels: self.pod_labels.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StrategyFilter {
    pub ids: Option<Vec<Uuid>>,
    pub created_by: Option<String>,
}

impl StrategyFilter {
    pub fn matches(&self, strategy: &Strategy) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&strategy.id)
        {
            return false;
        }
        if let Some(creator) = &self.created_by
            && creator != &strategy.created_by
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntentFilter {
    pub ids: Option<Vec<Uuid>>,
    pub namespaces: Option<Vec<String>>,
    pub strategy_ids: Option<Vec<Uuid>>,
    pub pod_ids: Option<Vec<String>>,
    pub node_ids: Option<Vec<String>>,
    pub states: Option<Vec<IntentState>>,
    pub created_by: Option<String>,
}

impl IntentFilter {
    pub fn by_strategy(strategy_id: Uuid) -> Self {
        Self {
            strategy_ids: Some(vec![strategy_id]),
            ..Default::default()
        }
    }

    pub fn by_node(node_id: &str) -> Self {
        Self {
            node_ids: Some(vec![node_id.to_string()]),
            ..Default::default()
        }
    }

    pub fn matches(&self, intent: &Intent) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&intent.id)
        {
            return false;
        }
        if let Some(namespaces) = &self.namespaces
            && !namespaces.contains(&intent.k8s_namespace)
        {
            return false;
        }
        if let Some(strategy_ids) = &self.strategy_ids
            && !strategy_ids.contains(&intent.strategy_id)
        {
            return false;
        }
        if let Some(pod_ids) = &self.pod_ids
            && !pod_ids.contains(&intent.pod_id)
        {
            return false;
        }
        if let Some(node_ids) = &self.node_ids
            && !node_ids.contains(&intent.node_id)
        {
            return false;
        }
        if let Some(states) = &self.states
            && !states.contains(&intent.state)
        {
            return false;
        }
        if let Some(creator) = &self.created_by
            && creator != &intent.created_by
        {
            return false;
        }
        true
    }
}

// =============================================================================
// API bodies
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStrategyRequest {
    #[serde(default, rename = "namespace")]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub label_selectors: Vec<LabelSelector>,
    #[serde(default)]
    pub command_regex: String,
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub execution_time: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteStrategyRequest {
    #[serde(rename = "strategyId")]
    pub strategy_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteIntentsRequest {
    #[serde(rename = "intentIds")]
    pub intent_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StrategyWithIntents {
    pub strategy: Strategy,
    pub intents: Vec<Intent>,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(pod: &str, node: &str, state: IntentState) -> Intent {
        Intent {
            id: Uuid::new_v4(),
            strategy_id: Uuid::new_v4(),
            created_by: "operator".to_string(),
            pod_name: format!("{}-0", pod),
            pod_id: pod.to_string(),
            node_id: node.to_string(),
            k8s_namespace: "default".to_string(),
            pod_labels: BTreeMap::new(),
            command_regex: String::new(),
            priority: false,
            execution_time: 0,
            state,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn intent_filter_combines_criteria() {
        let i = intent("pod-1", "node-a", IntentState::Initialized);

        assert!(IntentFilter::default().matches(&i));
        assert!(IntentFilter::by_node("node-a").matches(&i));
        assert!(!IntentFilter::by_node("node-b").matches(&i));
        assert!(
            IntentFilter {
                pod_ids: Some(vec!["pod-1".to_string()]),
                states: Some(vec![IntentState::Initialized]),
                ..Default::default()
            }
            .matches(&i)
        );
        assert!(
            !IntentFilter {
                states: Some(vec![IntentState::Sent]),
                ..Default::default()
            }
            .matches(&i)
        );
    }

    #[test]
    fn state_round_trips_through_text() {
        for state in [IntentState::Initialized, IntentState::Sent] {
            assert_eq!(IntentState::parse(state.as_str()), Some(state));
        }
        assert_eq!(IntentState::parse("bogus"), None);
    }
}
