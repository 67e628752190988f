use thiserror::Error;
use uuid::Uuid;

use crate::runtime::execution::ExecutionId;

/// Validation failures of a change-state request.
///
/// Every variant except `ScopeViolated` is raised before the execution tree is
/// touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Unknown activity id: {0}")]
    UnknownActivityId(String),

    #[error("Execution {execution_id} not found in process instance {process_instance_id}")]
    UnknownExecution {
        execution_id: ExecutionId,
        process_instance_id: Uuid,
    },

    #[error("Move operation #{index} has no source")]
    EmptySourceSet { index: usize },

    #[error("Move operation #{index} has no target")]
    EmptyTargetSet { index: usize },

    #[error("Move operation #{index} crosses a scope boundary: {reason}")]
    CrossScopeMove { index: usize, reason: String },

    #[error("Activity {activity_id} cannot be entered from scope {scope}")]
    ActivityNotReachableFromTargetScope { activity_id: String, scope: String },

    #[error("Execution {execution_id} is claimed by more than one move operation")]
    ConflictingMoves { execution_id: ExecutionId },

    #[error("Root execution {0} cannot be moved")]
    RootNotMovable(ExecutionId),

    #[error("Change-state request does not name a process instance")]
    MissingProcessInstance,

    #[error("Scope execution {0} was modified by a move inside it")]
    ScopeViolated(ExecutionId),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Process definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("Process instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Process instance {0} has already ended")]
    InstanceEnded(Uuid),

    #[error("Execution {execution_id} is not waiting in a task (activity: {activity_id:?})")]
    NotWaiting {
        execution_id: ExecutionId,
        activity_id: Option<String>,
    },

    #[error("No execution is waiting in activity {0}")]
    NoWaitingExecution(String),

    #[error("No outgoing flow could be selected at activity {0}")]
    NoOutgoingFlow(String),

    #[error("Condition '{condition}' failed to evaluate: {message}")]
    Condition { condition: String, message: String },

    #[error("Timed out after {timeout_ms}ms waiting for process instance {instance_id}")]
    LockTimeout { instance_id: Uuid, timeout_ms: u64 },

    #[error("Execution tree is inconsistent: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
