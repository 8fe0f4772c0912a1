//! Persistence seam for strategies and intents.
//!
//! The production implementation lives in [`crate::db`]; the reconciler
//! and strategy service only see this trait so they can be exercised
//! against an in-memory store.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Intent, IntentFilter, IntentState, Strategy, StrategyFilter};

#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Atomically persist a strategy and its intents. The store assigns
    /// ids and timestamps; intents receive their parent's id.
    async fn insert_strategy_and_intents(
        &self,
        strategy: Strategy,
        intents: Vec<Intent>,
    ) -> Result<(Strategy, Vec<Intent>)>;

    /// Persist additional intents for already-stored strategies.
    async fn insert_intents(&self, intents: Vec<Intent>) -> Result<Vec<Intent>>;

    async fn query_strategies(&self, filter: &StrategyFilter) -> Result<Vec<Strategy>>;

    async fn query_intents(&self, filter: &IntentFilter) -> Result<Vec<Intent>>;

    /// Set the state and bump `updated_at` on every named intent.
    async fn batch_update_intents_state(&self, ids: &[Uuid], state: IntentState) -> Result<()>;

    async fn delete_strategy(&self, id: Uuid) -> Result<()>;

    async fn delete_intents(&self, ids: &[Uuid]) -> Result<()>;

    async fn delete_intents_by_strategy(&self, strategy_id: Uuid) -> Result<()>;
}

#[cfg(test)]
pub mod testing {
    //! In-memory store used by reconciler and service tests. Counts
    //! writes so tests can assert idempotence.

    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::models::now_ms;

    #[derive(Default)]
    pub struct MemStore {
        pub strategies: Mutex<Vec<Strategy>>,
        pub intents: Mutex<Vec<Intent>>,
        pub writes: AtomicUsize,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        fn record_write(&self) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl IntentStore for MemStore {
        async fn insert_strategy_and_intents(
            &self,
            mut strategy: Strategy,
            mut intents: Vec<Intent>,
        ) -> Result<(Strategy, Vec<Intent>)> {
            self.record_write();
            let now = now_ms();
            strategy.id = Uuid::new_v4();
            strategy.created_at = now;
            strategy.updated_at = now;
            for intent in &mut intents {
                intent.id = Uuid::new_v4();
                intent.strategy_id = strategy.id;
                intent.created_at = now;
                intent.updated_at = now;
            }
            self.strategies.lock().unwrap().push(strategy.clone());
            self.intents.lock().unwrap().extend(intents.iter().cloned());
            Ok((strategy, intents))
        }

        async fn insert_intents(&self, mut intents: Vec<Intent>) -> Result<Vec<Intent>> {
            self.record_write();
            let now = now_ms();
            for intent in &mut intents {
                intent.id = Uuid::new_v4();
                intent.created_at = now;
                intent.updated_at = now;
            }
            self.intents.lock().unwrap().extend(intents.iter().cloned());
            Ok(intents)
        }

        async fn query_strategies(&self, filter: &StrategyFilter) -> Result<Vec<Strategy>> {
            Ok(self
                .strategies
                .lock()
                .unwrap()
                .iter()
                .filter(|s| filter.matches(s))
                .cloned()
                .collect())
        }

        async fn query_intents(&self, filter: &IntentFilter) -> Result<Vec<Intent>> {
            Ok(self
                .intents
                .lock()
                .unwrap()
                .iter()
                .filter(|i| filter.matches(i))
                .cloned()
                .collect())
        }

        async fn batch_update_intents_state(
            &self,
            ids: &[Uuid],
            state: IntentState,
        ) -> Result<()> {
            self.record_write();
            let now = now_ms();
            for intent in self.intents.lock().unwrap().iter_mut() {
                if ids.contains(&intent.id) {
                    intent.state = state;
                    intent.updated_at = now;
                }
            }
            Ok(())
        }

        async fn delete_strategy(&self, id: Uuid) -> Result<()> {
            self.record_write();
            self.strategies.lock().unwrap().retain(|s| s.id != id);
            Ok(())
        }

        async fn delete_intents(&self, ids: &[Uuid]) -> Result<()> {
            self.record_write();
            self.intents.lock().unwrap().retain(|i| !ids.contains(&i.id));
            Ok(())
        }

        async fn delete_intents_by_strategy(&self, strategy_id: Uuid) -> Result<()> {
            self.record_write();
            self.intents
                .lock()
                .unwrap()
                .retain(|i| i.strategy_id != strategy_id);
            Ok(())
        }
    }
}
