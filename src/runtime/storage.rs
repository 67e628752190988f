use async_trait::async_trait;
use uuid::Uuid;
use crate::runtime::execution::ExecutionId;
use crate::runtime::instance::ProcessInstance;
use anyhow::Result;
use dashmap::DashMap;

// --- Interfaces ---

/// Execution store of the engine. Instances are read and written whole; the
/// engine serializes access per instance, so implementations only need
/// atomic single-instance writes.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_instance(&self, instance_id: Uuid) -> Result<Option<ProcessInstance>>;

    /// Replaces the stored snapshot and refreshes the execution index.
    async fn save_instance(&self, instance: &ProcessInstance) -> Result<()>;

    /// Owning process instance of a live execution.
    async fn instance_of_execution(&self, execution_id: ExecutionId) -> Result<Option<Uuid>>;
}

// --- In-Memory Implementation ---

pub struct InMemoryStateStore {
    instances: DashMap<Uuid, ProcessInstance>,
    // Map<ExecutionID, InstanceID>
    execution_index: DashMap<ExecutionId, Uuid>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            execution_index: DashMap::new(),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_instance(&self, instance_id: Uuid) -> Result<Option<ProcessInstance>> {
        Ok(self.instances.get(&instance_id).map(|i| i.value().clone()))
    }

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<()> {
        // Drop index entries of executions that no longer exist.
        if let Some(previous) = self.instances.get(&instance.id) {
            for execution in previous.tree.executions() {
                if !instance.tree.contains(execution.id) {
                    self.execution_index.remove(&execution.id);
                }
            }
        }

        for execution in instance.tree.executions() {
            self.execution_index.insert(execution.id, instance.id);
        }
        self.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn instance_of_execution(&self, execution_id: ExecutionId) -> Result<Option<Uuid>> {
        Ok(self.execution_index.get(&execution_id).map(|i| *i.value()))
    }
}
