//! Cluster API integration: pod label lookup for the resolver and the
//! node-scoped pod watcher that invalidates the strategy cache.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, api::ListParams, runtime::watcher};
use tokio_util::sync::CancellationToken;

use crate::{cache::StrategyCache, resolver::PodLabelSource};

const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Looks up pod labels by UID among the pods scheduled on this node.
pub struct KubeLabelSource {
    client: Client,
    node_name: String,
}

impl KubeLabelSource {
    pub fn new(client: Client, node_name: String) -> Self {
        Self { client, node_name }
    }
}

#[async_trait]
impl PodLabelSource for KubeLabelSource {
    async fn pod_labels(&self, pod_uid: &str) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params =
            ListParams::default().fields(&format!("spec.nodeName={}", self.node_name));
        let pods = tokio::time::timeout(LIST_TIMEOUT, api.list(&params))
            .await
            .context("pod list timed out")?
            .context("pod list failed")?;

        Ok(pods
            .items
            .into_iter()
            .find(|p| p.metadata.uid.as_deref() == Some(pod_uid))
            .map(|p| p.metadata.labels.unwrap_or_default()))
    }
}

/// Watch pods on this node and invalidate the strategy cache whenever one
/// is added, modified, or deleted. Runs until cancelled; watch errors
/// back off and restart.
pub async fn run_pod_watcher(
    client: Client,
    node_name: String,
    cache: Arc<StrategyCache>,
    cancel: CancellationToken,
) {
    let api: Api<Pod> = Api::all(client);
    let config = watcher::Config {
        field_selector: Some(format!("spec.nodeName={}", node_name)),
        ..Default::default()
    };

    let stream = watcher(api, config);
    tokio::pin!(stream);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("pod watcher stopping");
                return;
            }
            event = stream.next() => {
                match event {
                    Some(Ok(watcher::Event::Apply(pod) | watcher::Event::InitApply(pod))) => {
                        tracing::debug!(pod = pod.metadata.name.as_deref().unwrap_or(""), "pod changed");
                        cache.invalidate();
                    }
                    Some(Ok(watcher::Event::Delete(pod))) => {
                        tracing::debug!(pod = pod.metadata.name.as_deref().unwrap_or(""), "pod deleted");
                        cache.invalidate();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("pod watch error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    None => {
                        tracing::warn!("pod watch stream ended");
                        return;
                    }
                }
            }
        }
    }
}
