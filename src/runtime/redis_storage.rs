use async_trait::async_trait;
use uuid::Uuid;
use crate::runtime::execution::ExecutionId;
use crate::runtime::instance::ProcessInstance;
use crate::runtime::storage::StateStore;
use anyhow::{Result, Context};
use redis::AsyncCommands;
use std::str::FromStr;

/// Stores every instance as one JSON snapshot.
///
/// Keys (with the default prefix):
/// - `tokenshift:inst:{id}` snapshot
/// - `tokenshift:inst:{id}:execs` set of the instance's execution ids
/// - `tokenshift:exec_index` hash execution id -> instance id
pub struct RedisStateStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStateStore {
    pub fn new(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
        }
    }

    fn instance_key(&self, instance_id: Uuid) -> String {
        format!("{}:inst:{}", self.prefix, instance_id)
    }

    fn executions_key(&self, instance_id: Uuid) -> String {
        format!("{}:inst:{}:execs", self.prefix, instance_id)
    }

    fn index_key(&self) -> String {
        format!("{}:exec_index", self.prefix)
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn load_instance(&self, instance_id: Uuid) -> Result<Option<ProcessInstance>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let snapshot: Option<String> = conn.get(self.instance_key(instance_id)).await?;

        match snapshot {
            Some(json) => {
                let instance = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupted snapshot of process instance {}", instance_id))?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let executions_key = self.executions_key(instance.id);
        let index_key = self.index_key();

        let previous: Vec<String> = conn.smembers(&executions_key).await?;
        let current: Vec<String> = instance.tree.executions()
            .iter()
            .map(|e| e.id.to_string())
            .collect();
        let stale: Vec<&String> = previous.iter()
            .filter(|id| !current.contains(id))
            .collect();

        let snapshot = serde_json::to_string(instance)?;
        let instance_id = instance.id.to_string();

        // Snapshot and index change together.
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(self.instance_key(instance.id), snapshot).ignore();
        pipe.del(&executions_key).ignore();
        if !current.is_empty() {
            pipe.sadd(&executions_key, &current).ignore();
            let pairs: Vec<(&String, &String)> = current.iter().map(|id| (id, &instance_id)).collect();
            pipe.hset_multiple(&index_key, &pairs).ignore();
        }
        if !stale.is_empty() {
            pipe.hdel(&index_key, stale).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn instance_of_execution(&self, execution_id: ExecutionId) -> Result<Option<Uuid>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let owner: Option<String> = conn.hget(self.index_key(), execution_id.to_string()).await?;
        owner.map(|s| Uuid::from_str(&s).context("Corrupted execution index entry"))
            .transpose()
    }
}
