//! Postgres-backed [`IntentStore`].
//!
//! Queries pull by the selective columns (strategy, node, creator) and
//! apply the remaining filter criteria in process; the filter structs are
//! the single source of truth for matching semantics.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    models::{Intent, IntentFilter, IntentState, Strategy, StrategyFilter, now_ms},
    store::IntentStore,
};

pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

/// Create tables and indexes if they don't exist.
pub async fn init_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id UUID PRIMARY KEY,
                created_by TEXT NOT NULL,
                namespaces JSONB NOT NULL,
                label_selectors JSONB NOT NULL,
                command_regex TEXT NOT NULL DEFAULT '',
                priority BOOLEAN NOT NULL DEFAULT FALSE,
                execution_time BIGINT NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
            &[],
        )
        .await
        .context("failed to create strategies table")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS intents (
                id UUID PRIMARY KEY,
                strategy_id UUID NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                created_by TEXT NOT NULL,
                pod_name TEXT NOT NULL,
                pod_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                k8s_namespace TEXT NOT NULL,
                pod_labels JSONB NOT NULL,
                command_regex TEXT NOT NULL DEFAULT '',
                priority BOOLEAN NOT NULL DEFAULT FALSE,
                execution_time BIGINT NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
            &[],
        )
        .await
        .context("failed to create intents table")?;

    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_intents_node ON intents (node_id)",
            &[],
        )
        .await
        .context("failed to create node index")?;

    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_intents_strategy ON intents (strategy_id)",
            &[],
        )
        .await
        .context("failed to create strategy index")?;

    tracing::info!("database schema initialized");
    Ok(())
}

fn strategy_from_row(row: &Row) -> Result<Strategy> {
    Ok(Strategy {
        id: row.get("id"),
        created_by: row.get("created_by"),
        namespaces: serde_json::from_value(row.get("namespaces"))
            .context("bad namespaces json")?,
        label_selectors: serde_json::from_value(row.get("label_selectors"))
            .context("bad label_selectors json")?,
        command_regex: row.get("command_regex"),
        priority: row.get("priority"),
        execution_time: row.get::<_, i64>("execution_time") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn intent_from_row(row: &Row) -> Result<Intent> {
    let state: String = row.get("state");
    Ok(Intent {
        id: row.get("id"),
        strategy_id: row.get("strategy_id"),
        created_by: row.get("created_by"),
        pod_name: row.get("pod_name"),
        pod_id: row.get("pod_id"),
        node_id: row.get("node_id"),
        k8s_namespace: row.get("k8s_namespace"),
        pod_labels: serde_json::from_value(row.get("pod_labels"))
            .context("bad pod_labels json")?,
        command_regex: row.get("command_regex"),
        priority: row.get("priority"),
        execution_time: row.get::<_, i64>("execution_time") as u64,
        state: IntentState::parse(&state)
            .with_context(|| format!("unknown intent state {:?}", state))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const INSERT_INTENT: &str = r#"
    INSERT INTO intents (
        id, strategy_id, created_by, pod_name, pod_id, node_id,
        k8s_namespace, pod_labels, command_regex, priority,
        execution_time, state, created_at, updated_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
"#;

#[async_trait]
impl IntentStore for PgStore {
    async fn insert_strategy_and_intents(
        &self,
        mut strategy: Strategy,
        mut intents: Vec<Intent>,
    ) -> Result<(Strategy, Vec<Intent>)> {
        let mut client = self.pool.get().await.context("failed to get db connection")?;
        let tx = client
            .transaction()
            .await
            .context("failed to open transaction")?;

        let now = now_ms();
        strategy.id = Uuid::new_v4();
        strategy.created_at = now;
        strategy.updated_at = now;

        tx.execute(
            r#"
            INSERT INTO strategies (
                id, created_by, namespaces, label_selectors, command_regex,
                priority, execution_time, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
            &[
                &strategy.id,
                &strategy.created_by,
                &serde_json::to_value(&strategy.namespaces)?,
                &serde_json::to_value(&strategy.label_selectors)?,
                &strategy.command_regex,
                &strategy.priority,
                &(strategy.execution_time as i64),
                &strategy.created_at,
                &strategy.updated_at,
            ],
        )
        .await
        .context("failed to insert strategy")?;

        for intent in &mut intents {
            intent.id = Uuid::new_v4();
            intent.strategy_id = strategy.id;
            intent.created_at = now;
            intent.updated_at = now;
            tx.execute(
                INSERT_INTENT,
                &[
                    &intent.id,
                    &intent.strategy_id,
                    &intent.created_by,
                    &intent.pod_name,
                    &intent.pod_id,
                    &intent.node_id,
                    &intent.k8s_namespace,
                    &serde_json::to_value(&intent.pod_labels)?,
                    &intent.command_regex,
                    &intent.priority,
                    &(intent.execution_time as i64),
                    &intent.state.as_str().to_string(),
                    &intent.created_at,
                    &intent.updated_at,
                ],
            )
            .await
            .context("failed to insert intent")?;
        }

        tx.commit().await.context("failed to commit")?;
        Ok((strategy, intents))
    }

    async fn insert_intents(&self, mut intents: Vec<Intent>) -> Result<Vec<Intent>> {
        let mut client = self.pool.get().await.context("failed to get db connection")?;
        let tx = client
            .transaction()
            .await
            .context("failed to open transaction")?;

        let now = now_ms();
        for intent in &mut intents {
            intent.id = Uuid::new_v4();
            intent.created_at = now;
            intent.updated_at = now;
            tx.execute(
                INSERT_INTENT,
                &[
                    &intent.id,
                    &intent.strategy_id,
                    &intent.created_by,
                    &intent.pod_name,
                    &intent.pod_id,
                    &intent.node_id,
                    &intent.k8s_namespace,
                    &serde_json::to_value(&intent.pod_labels)?,
                    &intent.command_regex,
                    &intent.priority,
                    &(intent.execution_time as i64),
                    &intent.state.as_str().to_string(),
                    &intent.created_at,
                    &intent.updated_at,
                ],
            )
            .await
            .context("failed to insert intent")?;
        }

        tx.commit().await.context("failed to commit")?;
        Ok(intents)
    }

    async fn query_strategies(&self, filter: &StrategyFilter) -> Result<Vec<Strategy>> {
        let client = self.pool.get().await.context("failed to get db connection")?;
        let rows = match &filter.created_by {
            Some(creator) => {
                client
                    .query(
                        "SELECT * FROM strategies WHERE created_by = $1 ORDER BY created_at",
                        &[creator],
                    )
                    .await
            }
            None => {
                client
                    .query("SELECT * FROM strategies ORDER BY created_at", &[])
                    .await
            }
        }
        .context("failed to query strategies")?;

        let mut strategies = Vec::with_capacity(rows.len());
        for row in &rows {
            let strategy = strategy_from_row(row)?;
            if filter.matches(&strategy) {
                strategies.push(strategy);
            }
        }
        Ok(strategies)
    }

    async fn query_intents(&self, filter: &IntentFilter) -> Result<Vec<Intent>> {
        let client = self.pool.get().await.context("failed to get db connection")?;
        let rows = if let Some(strategy_ids) = &filter.strategy_ids {
            client
                .query(
                    "SELECT * FROM intents WHERE strategy_id = ANY($1) ORDER BY created_at",
                    &[strategy_ids],
                )
                .await
        } else if let Some(node_ids) = &filter.node_ids {
            client
                .query(
                    "SELECT * FROM intents WHERE node_id = ANY($1) ORDER BY created_at",
                    &[node_ids],
                )
                .await
        } else {
            client
                .query("SELECT * FROM intents ORDER BY created_at", &[])
                .await
        }
        .context("failed to query intents")?;

        let mut intents = Vec::with_capacity(rows.len());
        for row in &rows {
            let intent = intent_from_row(row)?;
            if filter.matches(&intent) {
                intents.push(intent);
            }
        }
        Ok(intents)
    }

    async fn batch_update_intents_state(&self, ids: &[Uuid], state: IntentState) -> Result<()> {
        let client = self.pool.get().await.context("failed to get db connection")?;
        client
            .execute(
                "UPDATE intents SET state = $1, updated_at = $2 WHERE id = ANY($3)",
                &[&state.as_str().to_string(), &now_ms(), &ids.to_vec()],
            )
            .await
            .context("failed to update intent states")?;
        Ok(())
    }

    async fn delete_strategy(&self, id: Uuid) -> Result<()> {
        let client = self.pool.get().await.context("failed to get db connection")?;
        client
            .execute("DELETE FROM strategies WHERE id = $1", &[&id])
            .await
            .context("failed to delete strategy")?;
        Ok(())
    }

    async fn delete_intents(&self, ids: &[Uuid]) -> Result<()> {
        let client = self.pool.get().await.context("failed to get db connection")?;
        client
            .execute("DELETE FROM intents WHERE id = ANY($1)", &[&ids.to_vec()])
            .await
            .context("failed to delete intents")?;
        Ok(())
    }

    async fn delete_intents_by_strategy(&self, strategy_id: Uuid) -> Result<()> {
        let client = self.pool.get().await.context("failed to get db connection")?;
        client
            .execute("DELETE FROM intents WHERE strategy_id = $1", &[&strategy_id])
            .await
            .context("failed to delete intents by strategy")?;
        Ok(())
    }
}
