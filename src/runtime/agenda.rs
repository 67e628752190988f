use std::collections::{HashMap, VecDeque};

use evalexpr::{build_operator_tree, ContextWithMutableVariables, DefaultNumericTypes, HashMapContext};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::runtime::execution::ExecutionId;
use crate::runtime::graph::{ActivityKind, GraphIndex, NodeIndex};
use crate::runtime::instance::ProcessInstance;
use crate::runtime::join::{JoinOutcome, JoinTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Enter { execution: ExecutionId, node: NodeIndex },
    Leave { execution: ExecutionId },
}

/// Synchronous token interpreter. Runs until every execution waits in a task,
/// is parked at a join or has ended.
pub struct Agenda<'a> {
    graph: &'a GraphIndex,
    instance: &'a mut ProcessInstance,
    steps: VecDeque<Step>,
}

impl<'a> Agenda<'a> {
    pub fn new(graph: &'a GraphIndex, instance: &'a mut ProcessInstance) -> Self {
        Self {
            graph,
            instance,
            steps: VecDeque::new(),
        }
    }

    pub fn enter(&mut self, execution: ExecutionId, node: NodeIndex) {
        self.steps.push_back(Step::Enter { execution, node });
    }

    pub fn leave(&mut self, execution: ExecutionId) {
        self.steps.push_back(Step::Leave { execution });
    }

    pub fn run(&mut self) -> Result<(), EngineError> {
        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Enter { execution, node } => self.on_enter(execution, node)?,
                Step::Leave { execution } => self.on_leave(execution)?,
            }
        }
        Ok(())
    }

    fn on_enter(&mut self, execution: ExecutionId, node: NodeIndex) -> Result<(), EngineError> {
        let graph = self.graph;
        let tree = &mut self.instance.tree;
        if !tree.contains(execution) {
            debug!(execution_id = %execution, "Skipping step of a removed execution");
            return Ok(());
        }

        let activity = graph.node(node);
        {
            let e = tree.require_mut(execution)?;
            e.activity_id = Some(activity.id.clone());
            e.is_active = true;
        }

        match activity.kind {
            ActivityKind::Start | ActivityKind::ParallelFork | ActivityKind::InclusiveFork => {
                self.leave(execution);
            }
            ActivityKind::Task => {
                debug!(execution_id = %execution, activity_id = %activity.id, "Waiting in task");
            }
            ActivityKind::ParallelJoin | ActivityKind::InclusiveJoin => {
                tree.require_mut(execution)?.is_active = false;
                if let JoinOutcome::Fired { survivor, .. } = JoinTracker::new(graph).arrive(tree, execution)? {
                    self.leave(survivor);
                }
            }
            ActivityKind::SubProcess => {
                let start = activity.start
                    .ok_or_else(|| EngineError::Corrupted(format!("sub-process {} has no start", activity.id)))?;
                let scope = tree.require_mut(execution)?;
                scope.is_scope = true;
                scope.variables.clear();
                let child = tree.create_child_execution(execution, None, false, true)?;
                self.enter(child, start);
            }
            ActivityKind::End => self.end(execution)?,
        }
        Ok(())
    }

    fn on_leave(&mut self, execution: ExecutionId) -> Result<(), EngineError> {
        let Some(current) = self.instance.tree.get(execution) else {
            return Ok(());
        };
        let activity_id = current.activity_id.clone()
            .ok_or_else(|| EngineError::Corrupted(format!("execution {} has no activity to leave", execution)))?;
        let graph = self.graph;
        let idx = graph.index_of(&activity_id)
            .ok_or_else(|| EngineError::Corrupted(format!("unknown activity {}", activity_id)))?;
        let node = graph.node(idx);

        if node.kind == ActivityKind::SubProcess {
            let scope = self.instance.tree.require_mut(execution)?;
            scope.is_scope = false;
            scope.variables.clear();
        }

        if node.outgoing.is_empty() {
            return self.end(execution);
        }

        let targets = self.select_flows(execution, idx)?;
        match targets.as_slice() {
            [] => Err(EngineError::NoOutgoingFlow(activity_id)),
            [single] => {
                if node.kind == ActivityKind::InclusiveFork {
                    let tree = &mut self.instance.tree;
                    if let Some(parent) = tree.require(execution)?.parent_id {
                        tree.register_running_branches(parent)?;
                    }
                }
                self.enter(execution, *single);
                Ok(())
            }
            _ => self.fork(execution, idx, targets),
        }
    }

    fn select_flows(&self, execution: ExecutionId, idx: NodeIndex) -> Result<Vec<NodeIndex>, EngineError> {
        let node = self.graph.node(idx);
        if matches!(node.kind, ActivityKind::ParallelFork | ActivityKind::ParallelJoin) {
            return Ok(node.outgoing.iter().map(|f| f.target).collect());
        }

        let vars = self.instance.tree.visible_variables(execution);
        let mut selected = Vec::new();
        for flow in &node.outgoing {
            let taken = match &flow.condition {
                Some(condition) => evaluate_condition(condition, &vars)?,
                None => true,
            };
            if taken {
                selected.push(flow.target);
            }
        }
        Ok(selected)
    }

    /// Replaces `execution` with one concurrent sibling per target.
    fn fork(&mut self, execution: ExecutionId, idx: NodeIndex, targets: Vec<NodeIndex>) -> Result<(), EngineError> {
        let graph = self.graph;
        let node = graph.node(idx);
        let tree = &mut self.instance.tree;
        let parent = tree.require(execution)?.parent_id
            .ok_or_else(|| EngineError::Corrupted(format!("execution {} has no parent", execution)))?;

        let inherited = tree.require(parent)?.inclusive_branches.contains(&execution);
        let register = node.kind == ActivityKind::InclusiveFork || inherited;

        tree.remove_subtree(execution)?;
        for target in &targets {
            let branch = tree.create_child_execution(parent, Some(node.id.clone()), true, true)?;
            if register {
                tree.register_inclusive_branch(parent, branch)?;
            }
            self.steps.push_back(Step::Enter { execution: branch, node: *target });
        }
        if node.kind == ActivityKind::InclusiveFork {
            tree.register_running_branches(parent)?;
        }

        debug!(activity_id = %node.id, branches = targets.len(), "Forked");
        Ok(())
    }

    fn end(&mut self, execution: ExecutionId) -> Result<(), EngineError> {
        let graph = self.graph;
        let tree = &mut self.instance.tree;
        let parent = tree.require(execution)?.parent_id
            .ok_or_else(|| EngineError::Corrupted(format!("execution {} has no parent", execution)))?;
        tree.remove_subtree(execution)?;

        if tree.children(parent).is_empty() {
            if parent == tree.root() {
                self.instance.ended = true;
                info!(instance_id = %self.instance.id, "Process instance completed");
                return Ok(());
            }
            let owner = tree.require(parent)?;
            if owner.is_scope && owner.activity_id.is_some() {
                self.leave(parent);
                return Ok(());
            }
            return self.end(parent);
        }

        for survivor in JoinTracker::new(graph).reevaluate(tree, parent)? {
            self.steps.push_back(Step::Leave { execution: survivor });
        }
        if tree.contains(parent) {
            tree.collapse_concurrency_root(parent)?;
        }
        Ok(())
    }
}

/// Evaluates a flow condition against the visible variables. `${...}` wrappers are optional.
pub fn evaluate_condition(raw: &str, vars: &HashMap<String, Value>) -> Result<bool, EngineError> {
    let expression = raw.trim();
    let expression = expression.strip_prefix("${")
        .and_then(|e| e.strip_suffix('}'))
        .unwrap_or(expression);

    let condition_error = |message: String| EngineError::Condition {
        condition: raw.to_string(),
        message,
    };

    let mut eval_ctx = HashMapContext::<DefaultNumericTypes>::new();
    for (k, v) in vars {
        let eval_val = match v {
            Value::String(s) => Some(evalexpr::Value::String(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() { Some(evalexpr::Value::Int(i)) }
                else if let Some(f) = n.as_f64() { Some(evalexpr::Value::Float(f)) }
                else { None }
            },
            Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
            _ => None,
        };
        if let Some(ev) = eval_val {
            eval_ctx.set_value(k.clone(), ev).map_err(|e| condition_error(e.to_string()))?;
        }
    }

    let compiled = build_operator_tree::<DefaultNumericTypes>(expression)
        .map_err(|e| condition_error(e.to_string()))?;
    compiled.eval_boolean_with_context(&eval_ctx)
        .map_err(|e| condition_error(e.to_string()))
}
