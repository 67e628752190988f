use std::sync::Arc;
use std::collections::HashMap;
use std::time::Duration;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::compiler::core::Compiler;
use crate::config::{EngineConfig, StorageConfig};
use crate::dsl::ProcessDefinition;
use crate::error::{EngineError, MigrationError};
use crate::migration::apply::apply;
use crate::migration::request::ChangeStateRequest;
use crate::runtime::agenda::Agenda;
use crate::runtime::events::{deliver_all, LifecycleEvent, NotificationSink};
use crate::runtime::execution::{Execution, ExecutionId};
use crate::runtime::graph::{ActivityKind, GraphIndex};
use crate::runtime::instance::ProcessInstance;
use crate::runtime::redis_storage::RedisStateStore;
use crate::runtime::storage::{InMemoryStateStore, StateStore};

pub struct Engine {
    // Compiled definitions by id
    definitions: DashMap<String, Arc<GraphIndex>>,
    store: Arc<dyn StateStore>,
    // One lock per process instance; every call holds it from load to save.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    lock_timeout: Duration,
}

impl Engine {
    pub fn new() -> Self {
        Self::new_with_storage(Arc::new(InMemoryStateStore::new()))
    }

    pub fn new_with_storage(store: Arc<dyn StateStore>) -> Self {
        Self {
            definitions: DashMap::new(),
            store,
            locks: DashMap::new(),
            lock_timeout: EngineConfig::default().lock_timeout(),
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn StateStore> = match &config.storage {
            StorageConfig::Memory => Arc::new(InMemoryStateStore::new()),
            StorageConfig::Redis { url, key_prefix } => {
                let client = redis::Client::open(url.as_str())?;
                Arc::new(RedisStateStore::new(client, key_prefix))
            }
        };
        Ok(Self::new_with_storage(store).with_lock_timeout(config.lock_timeout()))
    }

    pub fn register_definition(&self, definition: ProcessDefinition) -> anyhow::Result<()> {
        let graph = Compiler::new().compile(definition)?;
        info!(definition_id = %graph.id, nodes = graph.nodes.len(), "Registered process definition");
        self.definitions.insert(graph.id.clone(), Arc::new(graph));
        Ok(())
    }

    pub fn definition(&self, definition_id: &str) -> Option<Arc<GraphIndex>> {
        self.definitions.get(definition_id).map(|g| g.value().clone())
    }

    /// Starts an instance and runs it until it waits. Definition defaults are
    /// overridden by `variables`.
    pub async fn start_process(&self, definition_id: &str, variables: HashMap<String, Value>) -> Result<Uuid, EngineError> {
        let graph = self.graph(definition_id)?;

        let mut vars = graph.variables.clone();
        vars.extend(variables);
        let mut instance = ProcessInstance::new(definition_id, vars);
        let root = instance.tree.root();
        let first = instance.tree.create_child_execution(root, None, false, true)?;

        let mut agenda = Agenda::new(&graph, &mut instance);
        agenda.enter(first, graph.start_index);
        agenda.run()?;

        self.store.save_instance(&instance).await?;
        info!(instance_id = %instance.id, definition_id = %definition_id, "Process instance started");
        Ok(instance.id)
    }

    /// Completes the task `execution_id` waits in and runs the instance on.
    pub async fn complete(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        let instance_id = self.instance_of(execution_id).await?;
        self.update(instance_id, |graph, instance| {
            let execution = instance.tree.require(execution_id)?;
            if !is_waiting(graph, execution) {
                return Err(EngineError::NotWaiting {
                    execution_id,
                    activity_id: execution.activity_id.clone(),
                });
            }
            let mut agenda = Agenda::new(graph, instance);
            agenda.leave(execution_id);
            agenda.run()
        }).await
    }

    /// Completes the first execution waiting in `activity_id`.
    pub async fn complete_activity(&self, instance_id: Uuid, activity_id: &str) -> Result<(), EngineError> {
        self.update(instance_id, |graph, instance| {
            let waiting = instance.tree.find_by_activity(activity_id)
                .into_iter()
                .find(|id| instance.tree.get(*id).is_some_and(|e| is_waiting(graph, e)))
                .ok_or_else(|| EngineError::NoWaitingExecution(activity_id.to_string()))?;
            let mut agenda = Agenda::new(graph, instance);
            agenda.leave(waiting);
            agenda.run()
        }).await
    }

    /// Validates and applies a change-state request. Events reach `sink` only
    /// after the new state was saved.
    pub async fn change_state(
        &self,
        request: &ChangeStateRequest,
        sink: &dyn NotificationSink,
    ) -> Result<Vec<LifecycleEvent>, EngineError> {
        let instance_id = match request.process_instance_id {
            Some(id) => id,
            None => {
                let execution_id = request.first_execution_id()
                    .ok_or(MigrationError::MissingProcessInstance)?;
                self.instance_of(execution_id).await?
            }
        };

        let events = self.update(instance_id, |graph, instance| apply(graph, instance, request)).await?;
        deliver_all(sink, &events);
        Ok(events)
    }

    pub async fn instance(&self, instance_id: Uuid) -> Result<ProcessInstance, EngineError> {
        self.store.load_instance(instance_id).await?
            .ok_or(EngineError::InstanceNotFound(instance_id))
    }

    /// Executions below the process instance root.
    pub async fn executions(&self, instance_id: Uuid) -> Result<Vec<Execution>, EngineError> {
        let instance = self.instance(instance_id).await?;
        Ok(instance.child_executions().into_iter().cloned().collect())
    }

    /// Active executions waiting in a task.
    pub async fn tasks(&self, instance_id: Uuid) -> Result<Vec<Execution>, EngineError> {
        let instance = self.instance(instance_id).await?;
        let graph = self.graph(&instance.definition_id)?;
        Ok(instance.tasks(&graph).into_iter().cloned().collect())
    }

    pub async fn execution(&self, execution_id: ExecutionId) -> Result<Option<Execution>, EngineError> {
        let Some(instance_id) = self.store.instance_of_execution(execution_id).await? else {
            return Ok(None);
        };
        let instance = self.instance(instance_id).await?;
        Ok(instance.tree.get(execution_id).cloned())
    }

    pub async fn is_ended(&self, instance_id: Uuid) -> Result<bool, EngineError> {
        Ok(self.instance(instance_id).await?.ended)
    }

    pub async fn set_variable_local(&self, execution_id: ExecutionId, name: &str, value: Value) -> Result<(), EngineError> {
        let instance_id = self.instance_of(execution_id).await?;
        self.update(instance_id, |_, instance| instance.tree.set_variable_local(execution_id, name, value)).await
    }

    pub async fn get_variable_local(&self, execution_id: ExecutionId, name: &str) -> Result<Option<Value>, EngineError> {
        let instance = self.instance(self.instance_of(execution_id).await?).await?;
        Ok(instance.tree.require(execution_id)?.variables.get(name).cloned())
    }

    /// Looks `name` up along the scope chain, nearest scope first.
    pub async fn get_variable(&self, execution_id: ExecutionId, name: &str) -> Result<Option<Value>, EngineError> {
        let instance = self.instance(self.instance_of(execution_id).await?).await?;
        instance.tree.require(execution_id)?;
        Ok(instance.tree.visible_variables(execution_id).remove(name))
    }

    fn graph(&self, definition_id: &str) -> Result<Arc<GraphIndex>, EngineError> {
        self.definition(definition_id)
            .ok_or_else(|| EngineError::DefinitionNotFound(definition_id.to_string()))
    }

    async fn instance_of(&self, execution_id: ExecutionId) -> Result<Uuid, EngineError> {
        self.store.instance_of_execution(execution_id).await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    async fn lock(&self, instance_id: Uuid) -> Result<OwnedMutexGuard<()>, EngineError> {
        let lock = self.locks.entry(instance_id).or_default().clone();
        match timeout(self.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                self.release(instance_id);
                warn!(instance_id = %instance_id, "Timed out waiting for process instance lock");
                Err(EngineError::LockTimeout {
                    instance_id,
                    timeout_ms: self.lock_timeout.as_millis() as u64,
                })
            }
        }
    }

    // Drops the lock entry unless another call still holds or awaits it.
    fn release(&self, instance_id: Uuid) {
        self.locks.remove_if(&instance_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Runs `f` on a private copy of a live instance and saves the copy only
    /// when `f` succeeds.
    async fn update<T, F>(&self, instance_id: Uuid, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&GraphIndex, &mut ProcessInstance) -> Result<T, EngineError>,
    {
        let guard = self.lock(instance_id).await?;
        let result = self.update_locked(instance_id, f).await;
        drop(guard);
        self.release(instance_id);
        result
    }

    async fn update_locked<T, F>(&self, instance_id: Uuid, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&GraphIndex, &mut ProcessInstance) -> Result<T, EngineError>,
    {
        let mut instance = self.instance(instance_id).await?;
        if instance.ended {
            return Err(EngineError::InstanceEnded(instance_id));
        }
        let graph = self.graph(&instance.definition_id)?;

        let result = f(&graph, &mut instance)?;
        self.store.save_instance(&instance).await?;
        Ok(result)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn is_waiting(graph: &GraphIndex, execution: &Execution) -> bool {
    execution.is_active
        && execution.activity_id.as_deref()
            .and_then(|a| graph.find(a))
            .is_some_and(|node| node.kind == ActivityKind::Task)
}
