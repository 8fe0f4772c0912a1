//! Memoization of resolved strategy expansions.
//!
//! A resolution is valid for exactly one pod-topology epoch and one
//! strategy set, both identified by fingerprint. The pod watcher and the
//! scan path invalidate on topology change; strategy changes are caught
//! by comparing fingerprints on lookup.

use std::{
    collections::BTreeMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use kinetic_common::{hash_json, intent::LabelSelector};
use serde::Serialize;

use crate::{discovery::PodProcesses, resolver::SchedStrategy};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Canonical shape hashed for the pod fingerprint: pods sorted by UID,
/// processes sorted by PID, commands included, everything else excluded.
#[derive(Serialize)]
struct PodFingerprintEntry<'a> {
    #[serde(rename = "podUID")]
    pod_uid: &'a str,
    processes: Vec<ProcessFingerprintEntry<'a>>,
}

#[derive(Serialize)]
struct ProcessFingerprintEntry<'a> {
    pid: i32,
    command: &'a str,
}

/// Canonical shape hashed for the strategy fingerprint. PIDs are
/// computed, not input, so they are excluded.
#[derive(Serialize)]
struct StrategyFingerprintEntry<'a> {
    selectors: Vec<&'a LabelSelector>,
    priority: bool,
    #[serde(rename = "executionTime")]
    execution_time: u64,
    #[serde(rename = "commandRegex")]
    command_regex: &'a str,
}

pub fn pod_fingerprint(pods: &BTreeMap<String, PodProcesses>) -> String {
    // BTreeMap iteration is already sorted by pod UID.
    let entries: Vec<PodFingerprintEntry> = pods
        .values()
        .map(|pod| {
            let mut processes: Vec<ProcessFingerprintEntry> = pod
                .processes
                .iter()
                .map(|p| ProcessFingerprintEntry {
                    pid: p.pid,
                    command: &p.command,
                })
                .collect();
            processes.sort_by_key(|p| p.pid);
            PodFingerprintEntry {
                pod_uid: &pod.pod_uid,
                processes,
            }
        })
        .collect();
    hash_json(&entries)
}

pub fn strategy_fingerprint(strategies: &[SchedStrategy]) -> String {
    let mut entries: Vec<StrategyFingerprintEntry> = strategies
        .iter()
        .map(|s| {
            let mut selectors: Vec<&LabelSelector> = s.selectors.iter().collect();
            selectors.sort();
            StrategyFingerprintEntry {
                selectors,
                priority: s.priority,
                execution_time: s.execution_time,
                command_regex: &s.command_regex,
            }
        })
        .collect();
    entries.sort_by(|a, b| {
        (a.priority, a.execution_time, a.command_regex)
            .cmp(&(b.priority, b.execution_time, b.command_regex))
    });
    hash_json(&entries)
}

#[derive(Default)]
struct CacheState {
    valid: bool,
    pod_fingerprint: String,
    strategy_fingerprint: String,
    expansion: Vec<SchedStrategy>,
    stored_at: Option<Instant>,
    hits: u64,
    misses: u64,
}

pub struct StrategyCache {
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl Default for StrategyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl StrategyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Return the memoized expansion for the given strategy set, or miss.
    ///
    /// A hit requires: cache marked valid, non-empty stored expansion,
    /// stored within TTL, and a matching strategy fingerprint. Any
    /// fingerprint mismatch invalidates the cache.
    pub fn get(&self, strategies: &[SchedStrategy]) -> Option<Vec<SchedStrategy>> {
        let fingerprint = strategy_fingerprint(strategies);

        {
            let state = self.state.read().expect("strategy cache lock poisoned");
            let fresh = state
                .stored_at
                .map(|at| at.elapsed() < self.ttl)
                .unwrap_or(false);
            if state.valid
                && !state.expansion.is_empty()
                && fresh
                && state.strategy_fingerprint == fingerprint
            {
                let expansion = state.expansion.clone();
                drop(state);
                let mut state = self.state.write().expect("strategy cache lock poisoned");
                state.hits += 1;
                metrics::counter!("dm_strategy_cache_hits_total").increment(1);
                return Some(expansion);
            }
        }

        let mut state = self.state.write().expect("strategy cache lock poisoned");
        state.valid = false;
        state.misses += 1;
        metrics::counter!("dm_strategy_cache_misses_total").increment(1);
        None
    }

    /// Repopulate after a recomputation. All three pieces are replaced
    /// under one write lock.
    pub fn store(
        &self,
        pod_fingerprint: String,
        strategy_fingerprint: String,
        expansion: Vec<SchedStrategy>,
    ) {
        let mut state = self.state.write().expect("strategy cache lock poisoned");
        state.pod_fingerprint = pod_fingerprint;
        state.strategy_fingerprint = strategy_fingerprint;
        state.expansion = expansion;
        state.stored_at = Some(Instant::now());
        state.valid = true;
    }

    /// Compare a freshly computed pod fingerprint against the stored one;
    /// a mismatch invalidates the cache. Returns whether they matched.
    pub fn check_pod_fingerprint(&self, fingerprint: &str) -> bool {
        let matches = {
            let state = self.state.read().expect("strategy cache lock poisoned");
            !state.valid || state.pod_fingerprint == fingerprint
        };
        if !matches {
            self.invalidate();
        }
        matches
    }

    /// External invalidation, driven by the pod watcher.
    pub fn invalidate(&self) {
        let mut state = self.state.write().expect("strategy cache lock poisoned");
        state.valid = false;
    }

    pub fn stats(&self) -> (u64, u64) {
        let state = self.state.read().expect("strategy cache lock poisoned");
        (state.hits, state.misses)
    }
}
