use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::runtime::engine::Engine;
use crate::runtime::events::{LifecycleEvent, NotificationSink};
use crate::runtime::execution::ExecutionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveSource {
    /// Every live execution currently at one of these activities.
    ActivityIds(Vec<String>),
    ExecutionIds(Vec<ExecutionId>),
}

impl MoveSource {
    pub fn is_empty(&self) -> bool {
        match self {
            MoveSource::ActivityIds(ids) => ids.is_empty(),
            MoveSource::ExecutionIds(ids) => ids.is_empty(),
        }
    }
}

/// One source set to target set instruction, N:M.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOperation {
    pub sources: MoveSource,
    pub targets: Vec<String>,
}

/// A batch of move operations, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStateRequest {
    #[serde(default)]
    pub process_instance_id: Option<Uuid>,
    pub operations: Vec<MoveOperation>,
}

impl ChangeStateRequest {
    /// First execution id named by any operation, used to find the instance
    /// when none was given.
    pub fn first_execution_id(&self) -> Option<ExecutionId> {
        self.operations.iter().find_map(|op| match &op.sources {
            MoveSource::ExecutionIds(ids) => ids.first().copied(),
            MoveSource::ActivityIds(_) => None,
        })
    }
}

#[derive(Default)]
pub struct ChangeActivityStateBuilder {
    process_instance_id: Option<Uuid>,
    operations: Vec<MoveOperation>,
}

impl ChangeActivityStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_instance_id(mut self, id: Uuid) -> Self {
        self.process_instance_id = Some(id);
        self
    }

    pub fn move_activity_id_to(self, source: &str, target: &str) -> Self {
        self.push(MoveSource::ActivityIds(vec![source.to_string()]), &[target])
    }

    pub fn move_single_activity_id_to_activity_ids(self, source: &str, targets: &[&str]) -> Self {
        self.push(MoveSource::ActivityIds(vec![source.to_string()]), targets)
    }

    pub fn move_activity_ids_to_single_activity_id(self, sources: &[&str], target: &str) -> Self {
        let sources = sources.iter().map(|s| s.to_string()).collect();
        self.push(MoveSource::ActivityIds(sources), &[target])
    }

    pub fn move_execution_to_activity_id(self, source: ExecutionId, target: &str) -> Self {
        self.push(MoveSource::ExecutionIds(vec![source]), &[target])
    }

    pub fn move_single_execution_to_activity_ids(self, source: ExecutionId, targets: &[&str]) -> Self {
        self.push(MoveSource::ExecutionIds(vec![source]), targets)
    }

    pub fn move_executions_to_single_activity_id(self, sources: &[ExecutionId], target: &str) -> Self {
        self.push(MoveSource::ExecutionIds(sources.to_vec()), &[target])
    }

    fn push(mut self, sources: MoveSource, targets: &[&str]) -> Self {
        self.operations.push(MoveOperation {
            sources,
            targets: targets.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> ChangeStateRequest {
        ChangeStateRequest {
            process_instance_id: self.process_instance_id,
            operations: self.operations,
        }
    }

    /// Validates and applies every queued operation; nothing is changed on error.
    pub async fn change_state(
        self,
        engine: &Engine,
        sink: &dyn NotificationSink,
    ) -> Result<Vec<LifecycleEvent>, EngineError> {
        engine.change_state(&self.build(), sink).await
    }
}
