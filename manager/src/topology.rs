//! Cluster topology queries: workload pods matching a strategy and the
//! decision maker endpoints serving each node.

use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, api::ListParams};
use kinetic_common::{DECISION_MAKER_LABEL, intent::LabelSelector};
use serde::Serialize;

use crate::models::Strategy;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pod selection criteria derived from a strategy.
#[derive(Debug, Clone, Default)]
pub struct PodQuery {
    pub namespaces: Vec<String>,
    pub label_selectors: Vec<LabelSelector>,
    pub command_regex: String,
}

impl From<&Strategy> for PodQuery {
    fn from(strategy: &Strategy) -> Self {
        Self {
            namespaces: strategy.namespaces.clone(),
            label_selectors: strategy.label_selectors.clone(),
            command_regex: strategy.command_regex.clone(),
        }
    }
}

/// A workload pod as the manager sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub pod_id: String,
    pub node_id: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DmState {
    Unknown,
    Online,
    Offline,
}

/// A decision maker endpoint discovered from cluster topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DmEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub state: DmState,
}

#[async_trait]
pub trait ClusterTopology: Send + Sync {
    /// Pods matching every label selector, across the query's namespaces
    /// (all namespaces when empty).
    async fn query_pods(&self, query: &PodQuery) -> Result<Vec<PodSummary>>;

    /// Decision maker endpoints, optionally restricted to a node set.
    async fn query_decision_makers(&self, node_ids: Option<&[String]>) -> Result<Vec<DmEndpoint>>;
}

pub struct KubeTopology {
    client: Client,
    dm_port: u16,
}

impl KubeTopology {
    pub fn new(client: Client, dm_port: u16) -> Self {
        Self { client, dm_port }
    }

    async fn list(&self, api: Api<Pod>, params: &ListParams) -> Result<Vec<Pod>> {
        let pods = tokio::time::timeout(QUERY_TIMEOUT, api.list(params))
            .await
            .context("pod list timed out")?
            .context("pod list failed")?;
        Ok(pods.items)
    }
}

fn selector_string(selectors: &[LabelSelector]) -> String {
    selectors
        .iter()
        .map(|s| format!("{}={}", s.key, s.value))
        .collect::<Vec<_>>()
        .join(",")
}

fn summarize(pod: Pod) -> Option<PodSummary> {
    let name = pod.metadata.name.clone()?;
    let pod_id = pod.metadata.uid.clone()?;
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let spec = pod.spec.as_ref()?;
    let node_id = spec.node_name.clone()?;
    Some(PodSummary {
        name,
        pod_id,
        node_id,
        namespace,
        labels: pod.metadata.labels.unwrap_or_default(),
        containers: spec.containers.iter().map(|c| c.name.clone()).collect(),
    })
}

fn endpoint_state(pod: &Pod) -> DmState {
    let Some(status) = pod.status.as_ref() else {
        return DmState::Unknown;
    };
    match status.phase.as_deref() {
        Some("Running") if status.pod_ip.is_some() => DmState::Online,
        Some(_) => DmState::Offline,
        None => DmState::Unknown,
    }
}


#[async_trait]
impl ClusterTopology for KubeTopology {
    async fn query_pods(&self, query: &PodQuery) -> Result<Vec<PodSummary>> {
        let params = ListParams::default().labels(&selector_string(&query.label_selectors));

        let mut pods = Vec::new();
        if query.namespaces.is_empty() {
            pods.extend(self.list(Api::all(self.client.clone()), &params).await?);
        } else {
            for namespace in &query.namespaces {
                pods.extend(
                    self.list(Api::namespaced(self.client.clone(), namespace), &params)
                        .await?,
                );
            }
        }

        Ok(pods.into_iter().filter_map(summarize).collect())
    }

    async fn query_decision_makers(&self, node_ids: Option<&[String]>) -> Result<Vec<DmEndpoint>> {
        let (key, value) = DECISION_MAKER_LABEL;
        let params = ListParams::default().labels(&format!("{}={}", key, value));
        let pods = self.list(Api::all(self.client.clone()), &params).await?;

        let mut endpoints = Vec::new();
        for pod in pods {
            let Some(node_id) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) else {
                continue;
            };
            if let Some(wanted) = node_ids
                && !wanted.contains(&node_id)
            {
                continue;
            }
            let state = endpoint_state(&pod);
            let host = pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .unwrap_or_default();
            endpoints.push(DmEndpoint {
                host,
                port: self.dm_port,
                node_id,
                state,
            });
        }
        Ok(endpoints)
    }
}
