//! Resolution of declarative scheduling strategies to live PIDs.
//!
//! A strategy names pods by label equality and processes by command
//! regex; resolution expands it into one entry per matching process,
//! using the most recent process-table scan.

use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use kinetic_common::intent::LabelSelector;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::discovery::PodProcesses;

pub const DEFAULT_LABEL_TTL: Duration = Duration::from_secs(30);

/// A scheduling rule as the decision maker evaluates it. `pid` is zero
/// until resolution pins the rule to a concrete process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedStrategy {
    pub selectors: Vec<LabelSelector>,
    #[serde(default)]
    pub command_regex: String,
    pub priority: bool,
    pub execution_time: u64,
    #[serde(default)]
    pub pid: i32,
}

impl SchedStrategy {
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        self.selectors
            .iter()
            .all(|s| labels.get(&s.key) == Some(&s.value))
    }
}

/// Source of pod label sets, keyed by pod UID.
#[async_trait]
pub trait PodLabelSource: Send + Sync {
    async fn pod_labels(&self, pod_uid: &str) -> Result<Option<BTreeMap<String, String>>>;
}

#[async_trait]
impl<T: PodLabelSource + ?Sized> PodLabelSource for Box<T> {
    async fn pod_labels(&self, pod_uid: &str) -> Result<Option<BTreeMap<String, String>>> {
        (**self).pod_labels(pod_uid).await
    }
}

#[async_trait]
impl<T: PodLabelSource + ?Sized> PodLabelSource for std::sync::Arc<T> {
    async fn pod_labels(&self, pod_uid: &str) -> Result<Option<BTreeMap<String, String>>> {
        (**self).pod_labels(pod_uid).await
    }
}

/// TTL cache in front of a [`PodLabelSource`]. Reads take the read lock;
/// a miss re-queries the source and takes the write lock to fill.
pub struct LabelCache<S> {
    source: S,
    ttl: Duration,
    entries: RwLock<HashMap<String, (Option<BTreeMap<String, String>>, Instant)>>,
}

impl<S: PodLabelSource> LabelCache<S> {
    pub fn new(source: S) -> Self {
        Self::with_ttl(source, DEFAULT_LABEL_TTL)
    }

    pub fn with_ttl(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, pod_uid: &str) -> Result<Option<BTreeMap<String, String>>> {
        {
            let entries = self.entries.read().expect("label cache lock poisoned");
            if let Some((labels, stored_at)) = entries.get(pod_uid)
                && stored_at.elapsed() < self.ttl
            {
                return Ok(labels.clone());
            }
        }

        let labels = self.source.pod_labels(pod_uid).await?;
        self.entries
            .write()
            .expect("label cache lock poisoned")
            .insert(pod_uid.to_string(), (labels.clone(), Instant::now()));
        Ok(labels)
    }
}

pub struct StrategyResolver<S> {
    labels: LabelCache<S>,
}

impl<S: PodLabelSource> StrategyResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            labels: LabelCache::new(source),
        }
    }

    pub fn with_label_ttl(source: S, ttl: Duration) -> Self {
        Self {
            labels: LabelCache::with_ttl(source, ttl),
        }
    }

    /// Expand each strategy into one entry per matching live process.
    ///
    /// Strategies already pinned to a PID pass through unchanged. A
    /// strategy whose regex fails to compile is dropped with a warning;
    /// label lookup failures skip the affected pod only.
    pub async fn resolve(
        &self,
        strategies: &[SchedStrategy],
        pods: &BTreeMap<String, PodProcesses>,
    ) -> Vec<SchedStrategy> {
        let mut expanded = Vec::new();
        for strategy in strategies {
            if strategy.pid != 0 {
                expanded.push(strategy.clone());
                continue;
            }

            let pattern = if strategy.command_regex.is_empty() {
                ".*"
            } else {
                strategy.command_regex.as_str()
            };
            let regex = match Regex::new(pattern) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(pattern, "invalid command regex, skipping strategy: {}", e);
                    continue;
                }
            };

            for pod in pods.values() {
                let labels = match self.labels.get(&pod.pod_uid).await {
                    Ok(Some(labels)) => labels,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(pod_uid = %pod.pod_uid, "label lookup failed: {:#}", e);
                        continue;
                    }
                };
                if !strategy.matches_labels(&labels) {
                    continue;
                }
                for process in &pod.processes {
                    if regex.is_match(&process.command) {
                        expanded.push(SchedStrategy {
                            pid: process.pid,
                            ..strategy.clone()
                        });
                    }
                }
            }
        }
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ProcessRecord;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLabels {
        labels: HashMap<String, BTreeMap<String, String>>,
        calls: AtomicUsize,
    }

    impl FakeLabels {
        fn new(entries: &[(&str, &[(&str, &str)])]) -> Self {
            let labels = entries
                .iter()
                .map(|(uid, kvs)| {
                    (
                        uid.to_string(),
                        kvs.iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    )
                })
                .collect();
            Self {
                labels,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PodLabelSource for FakeLabels {
        async fn pod_labels(&self, pod_uid: &str) -> Result<Option<BTreeMap<String, String>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.labels.get(pod_uid).cloned())
        }
    }

    fn pod(uid: &str, commands: &[&str]) -> (String, PodProcesses) {
        let processes = commands
            .iter()
            .enumerate()
            .map(|(i, c)| ProcessRecord {
                pid: 100 + i as i32,
                command: c.to_string(),
                ppid: 1,
                container_id: String::new(),
            })
            .collect();
        (
            uid.to_string(),
            PodProcesses {
                pod_uid: uid.to_string(),
                processes,
            },
        )
    }

    fn strategy(selectors: &[(&str, &str)], regex: &str) -> SchedStrategy {
        SchedStrategy {
            selectors: selectors
                .iter()
                .map(|(k, v)| LabelSelector {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
            command_regex: regex.to_string(),
            priority: true,
            execution_time: 10_000_000,
            pid: 0,
        }
    }

    #[tokio::test]
    async fn expands_one_entry_per_process_of_matching_pods() {
        let labels = Arc::new(FakeLabels::new(&[
            ("pod-upf", &[("nf", "upf")]),
            ("pod-smf", &[("nf", "smf")]),
        ]));
        let pods: BTreeMap<_, _> = [
            pod("pod-upf", &["upf-main", "upf-worker", "sh"]),
            pod("pod-smf", &["smf-main", "smf-worker", "sh"]),
        ]
        .into_iter()
        .collect();

        let resolver = StrategyResolver::new(labels.clone());
        let expanded = resolver.resolve(&[strategy(&[("nf", "upf")], "")], &pods).await;

        assert_eq!(expanded.len(), 3);
        assert!(expanded.iter().all(|s| s.priority));
        assert!(expanded.iter().all(|s| s.execution_time == 10_000_000));
        let mut pids: Vec<i32> = expanded.iter().map(|s| s.pid).collect();
        pids.sort();
        assert_eq!(pids, vec![100, 101, 102]);
    }

    #[tokio::test]
    async fn command_regex_narrows_processes() {
        let labels = Arc::new(FakeLabels::new(&[("pod-upf", &[("nf", "upf")])]));
        let pods: BTreeMap<_, _> = [pod("pod-upf", &["upf-main", "upf-worker", "sh"])]
            .into_iter()
            .collect();

        let resolver = StrategyResolver::new(labels.clone());
        let expanded = resolver
            .resolve(&[strategy(&[("nf", "upf")], "^upf-")], &pods)
            .await;
        assert_eq!(expanded.len(), 2);
    }

    #[tokio::test]
    async fn every_selector_must_match() {
        let labels = Arc::new(FakeLabels::new(&[("pod-a", &[("nf", "upf"), ("tier", "edge")])]));
        let pods: BTreeMap<_, _> = [pod("pod-a", &["main"])].into_iter().collect();

        let resolver = StrategyResolver::new(labels.clone());
        let hit = resolver
            .resolve(
                &[strategy(&[("nf", "upf"), ("tier", "edge")], "")],
                &pods,
            )
            .await;
        assert_eq!(hit.len(), 1);

        let miss = resolver
            .resolve(
                &[strategy(&[("nf", "upf"), ("tier", "core")], "")],
                &pods,
            )
            .await;
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn invalid_regex_drops_strategy_but_not_batch() {
        let labels = Arc::new(FakeLabels::new(&[("pod-a", &[("nf", "upf")])]));
        let pods: BTreeMap<_, _> = [pod("pod-a", &["main"])].into_iter().collect();

        let resolver = StrategyResolver::new(labels.clone());
        let expanded = resolver
            .resolve(
                &[strategy(&[("nf", "upf")], "(unclosed"), strategy(&[("nf", "upf")], "")],
                &pods,
            )
            .await;
        assert_eq!(expanded.len(), 1);
    }

    #[tokio::test]
    async fn pinned_strategies_pass_through() {
        let labels = Arc::new(FakeLabels::new(&[]));
        let resolver = StrategyResolver::new(labels.clone());
        let mut pinned = strategy(&[], "");
        pinned.pid = 4321;

        let expanded = resolver.resolve(&[pinned.clone()], &BTreeMap::new()).await;
        assert_eq!(expanded, vec![pinned]);
        assert_eq!(labels.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn label_cache_serves_repeat_lookups() {
        let labels = Arc::new(FakeLabels::new(&[("pod-a", &[("nf", "upf")])]));
        let pods: BTreeMap<_, _> = [pod("pod-a", &["main"])].into_iter().collect();

        let resolver = StrategyResolver::new(labels.clone());
        let strategies = vec![strategy(&[("nf", "upf")], ""); 3];
        resolver.resolve(&strategies, &pods).await;
        assert_eq!(labels.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_label_entries_requery_the_source() {
        let labels = Arc::new(FakeLabels::new(&[("pod-a", &[("nf", "upf")])]));
        let pods: BTreeMap<_, _> = [pod("pod-a", &["main"])].into_iter().collect();

        let resolver = StrategyResolver::with_label_ttl(labels.clone(), Duration::ZERO);
        resolver.resolve(&[strategy(&[("nf", "upf")], "")], &pods).await;
        resolver.resolve(&[strategy(&[("nf", "upf")], "")], &pods).await;
        assert_eq!(labels.calls.load(Ordering::SeqCst), 2);
    }
}
