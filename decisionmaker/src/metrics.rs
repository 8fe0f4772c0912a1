//! Counters for the decision maker. Cache hit/miss and token counters
//! are recorded at their call sites; these cover the scan and intent
//! paths.

use metrics::counter;

pub fn scan_completed(pods: usize) {
    counter!("dm_scans_total").increment(1);
    counter!("dm_scanned_pods_total").increment(pods as u64);
}

pub fn scan_failed() {
    counter!("dm_scan_failures_total").increment(1);
}

pub fn intents_upserted(count: usize) {
    counter!("dm_intents_upserted_total").increment(count as u64);
}

pub fn intents_deleted(count: usize) {
    counter!("dm_intents_deleted_total").increment(count as u64);
}

pub fn strategies_resolved(count: usize) {
    counter!("dm_strategies_resolved_total").increment(count as u64);
}
