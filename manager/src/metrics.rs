//! Counters for the manager's strategy and reconciliation paths.

use metrics::counter;

pub fn strategy_created(intents: usize) {
    counter!("manager_strategies_created_total").increment(1);
    counter!("manager_intents_created_total").increment(intents as u64);
}

pub fn strategy_deleted(intents: usize) {
    counter!("manager_strategies_deleted_total").increment(1);
    counter!("manager_intents_deleted_total").increment(intents as u64);
}

pub fn intents_dispatched(count: usize) {
    counter!("manager_intents_dispatched_total").increment(count as u64);
}

pub fn reconcile_tick() {
    counter!("manager_reconcile_ticks_total").increment(1);
}

pub fn intents_refreshed(count: usize) {
    counter!("manager_intents_refreshed_total").increment(count as u64);
}

pub fn node_resynced(intents: usize) {
    counter!("manager_nodes_resynced_total").increment(1);
    counter!("manager_intents_resent_total").increment(intents as u64);
}

pub fn login_succeeded() {
    counter!("manager_logins_total").increment(1);
}
