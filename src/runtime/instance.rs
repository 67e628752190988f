use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::runtime::execution::{Execution, ExecutionTree};
use crate::runtime::graph::{ActivityKind, GraphIndex};

/// A running (or finished) process instance and its execution tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: Uuid,
    pub definition_id: String,
    pub tree: ExecutionTree,
    pub ended: bool,
}

impl ProcessInstance {
    pub fn new(definition_id: &str, variables: HashMap<String, Value>) -> Self {
        let id = Uuid::new_v4();
        let variables: BTreeMap<String, Value> = variables.into_iter().collect();
        Self {
            id,
            definition_id: definition_id.to_string(),
            tree: ExecutionTree::new(id, variables),
            ended: false,
        }
    }

    /// Every execution except the root, in creation order.
    pub fn child_executions(&self) -> Vec<&Execution> {
        self.tree.executions()
            .into_iter()
            .filter(|e| e.parent_id.is_some())
            .collect()
    }

    /// Active executions waiting in a task.
    pub fn tasks(&self, graph: &GraphIndex) -> Vec<&Execution> {
        self.child_executions()
            .into_iter()
            .filter(|e| e.is_active)
            .filter(|e| {
                e.activity_id.as_deref()
                    .and_then(|a| graph.find(a))
                    .is_some_and(|node| node.kind == ActivityKind::Task)
            })
            .collect()
    }
}
