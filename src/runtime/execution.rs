use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, MigrationError};
use crate::runtime::events::Notifier;

pub type ExecutionId = Uuid;

/// A live token of a process instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: ExecutionId,
    pub process_instance_id: Uuid,
    pub parent_id: Option<ExecutionId>,
    /// `None` only for executions that anchor scope or concurrency structure.
    pub activity_id: Option<String>,
    pub is_active: bool,
    pub is_concurrent: bool,
    pub is_concurrent_root: bool,
    pub is_scope: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Children activated by an inclusive fork while this execution was their concurrency root.
    #[serde(default)]
    pub inclusive_branches: BTreeSet<ExecutionId>,
    seq: u64,
}

/// Arena of executions indexed by id. Parent links live in the records, the
/// ordered children index is maintained alongside every edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TreeRecord", into = "TreeRecord")]
pub struct ExecutionTree {
    root: ExecutionId,
    next_seq: u64,
    executions: HashMap<ExecutionId, Execution>,
    children: HashMap<ExecutionId, Vec<ExecutionId>>,
}

#[derive(Serialize, Deserialize)]
struct TreeRecord {
    root: ExecutionId,
    next_seq: u64,
    executions: Vec<Execution>,
}

impl From<TreeRecord> for ExecutionTree {
    fn from(mut record: TreeRecord) -> Self {
        record.executions.sort_by_key(|e| e.seq);
        let mut children: HashMap<ExecutionId, Vec<ExecutionId>> = HashMap::new();
        for execution in &record.executions {
            if let Some(parent) = execution.parent_id {
                children.entry(parent).or_default().push(execution.id);
            }
        }
        let executions = record.executions.into_iter().map(|e| (e.id, e)).collect();
        Self {
            root: record.root,
            next_seq: record.next_seq,
            executions,
            children,
        }
    }
}

impl From<ExecutionTree> for TreeRecord {
    fn from(tree: ExecutionTree) -> Self {
        let mut executions: Vec<Execution> = tree.executions.into_values().collect();
        executions.sort_by_key(|e| e.seq);
        TreeRecord {
            root: tree.root,
            next_seq: tree.next_seq,
            executions,
        }
    }
}

/// State of a scope execution captured before a migration touches its descendants.
#[derive(Debug, Clone)]
pub struct ScopeSnapshot {
    id: ExecutionId,
    parent_id: Option<ExecutionId>,
    activity_id: Option<String>,
    variables: BTreeMap<String, Value>,
}

impl ScopeSnapshot {
    pub fn verify(&self, tree: &ExecutionTree) -> Result<(), MigrationError> {
        match tree.get(self.id) {
            Some(current)
                if current.is_scope
                    && current.parent_id == self.parent_id
                    && current.activity_id == self.activity_id
                    && current.variables == self.variables => Ok(()),
            _ => Err(MigrationError::ScopeViolated(self.id)),
        }
    }
}

impl ExecutionTree {
    /// Creates the root execution; its id is the process instance id.
    pub fn new(process_instance_id: Uuid, variables: BTreeMap<String, Value>) -> Self {
        let root = Execution {
            id: process_instance_id,
            process_instance_id,
            parent_id: None,
            activity_id: None,
            is_active: true,
            is_concurrent: false,
            is_concurrent_root: false,
            is_scope: true,
            variables,
            inclusive_branches: BTreeSet::new(),
            seq: 0,
        };
        Self {
            root: process_instance_id,
            next_seq: 1,
            executions: HashMap::from([(process_instance_id, root)]),
            children: HashMap::new(),
        }
    }

    pub fn root(&self) -> ExecutionId {
        self.root
    }

    pub fn process_instance_id(&self) -> Uuid {
        self.root
    }

    pub fn get(&self, id: ExecutionId) -> Option<&Execution> {
        self.executions.get(&id)
    }

    pub fn get_mut(&mut self, id: ExecutionId) -> Option<&mut Execution> {
        self.executions.get_mut(&id)
    }

    pub fn contains(&self, id: ExecutionId) -> bool {
        self.executions.contains_key(&id)
    }

    pub(crate) fn require(&self, id: ExecutionId) -> Result<&Execution, EngineError> {
        self.executions.get(&id).ok_or(EngineError::ExecutionNotFound(id))
    }

    pub(crate) fn require_mut(&mut self, id: ExecutionId) -> Result<&mut Execution, EngineError> {
        self.executions.get_mut(&id).ok_or(EngineError::ExecutionNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn children(&self, id: ExecutionId) -> &[ExecutionId] {
        self.children.get(&id).map(|c| c.as_slice()).unwrap_or(&[])
    }

    /// All executions in creation order.
    pub fn executions(&self) -> Vec<&Execution> {
        let mut all: Vec<&Execution> = self.executions.values().collect();
        all.sort_by_key(|e| e.seq);
        all
    }

    pub fn find_by_activity(&self, activity_id: &str) -> Vec<ExecutionId> {
        self.executions()
            .into_iter()
            .filter(|e| e.activity_id.as_deref() == Some(activity_id))
            .map(|e| e.id)
            .collect()
    }

    /// `id` and everything below it, parents before children.
    pub fn subtree(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Proper ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|e| e.parent_id);
        while let Some(parent) = current {
            out.push(parent);
            current = self.get(parent).and_then(|e| e.parent_id);
        }
        out
    }

    pub fn is_ancestor(&self, ancestor: ExecutionId, id: ExecutionId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Nearest enclosing scope execution; the root is its own scope.
    pub fn scope_of(&self, id: ExecutionId) -> ExecutionId {
        self.ancestors(id)
            .into_iter()
            .find(|a| self.get(*a).is_some_and(|e| e.is_scope))
            .unwrap_or(self.root)
    }

    /// Variables visible from `id`; the nearest scope wins on name clashes.
    pub fn visible_variables(&self, id: ExecutionId) -> HashMap<String, Value> {
        let mut chain = self.ancestors(id);
        chain.insert(0, id);
        let mut vars = HashMap::new();
        for execution_id in chain.into_iter().rev() {
            if let Some(execution) = self.get(execution_id) {
                for (k, v) in &execution.variables {
                    vars.insert(k.clone(), v.clone());
                }
            }
        }
        vars
    }

    pub fn set_variable_local(&mut self, id: ExecutionId, name: &str, value: Value) -> Result<(), EngineError> {
        self.require_mut(id)?.variables.insert(name.to_string(), value);
        Ok(())
    }

    // --- Mutation primitives ---

    /// Inserts a new child of `parent`. A concurrent child turns `parent` into a
    /// concurrency root and marks its existing children as concurrent branches.
    pub fn create_child_execution(
        &mut self,
        parent: ExecutionId,
        activity_id: Option<String>,
        concurrent: bool,
        active: bool,
    ) -> Result<ExecutionId, EngineError> {
        let process_instance_id = self.require(parent)?.process_instance_id;

        if concurrent {
            self.require_mut(parent)?.is_concurrent_root = true;
            for sibling in self.children(parent).to_vec() {
                if let Some(e) = self.executions.get_mut(&sibling) {
                    e.is_concurrent = true;
                }
            }
        }

        let id = Uuid::new_v4();
        let execution = Execution {
            id,
            process_instance_id,
            parent_id: Some(parent),
            activity_id,
            is_active: active,
            is_concurrent: concurrent,
            is_concurrent_root: false,
            is_scope: false,
            variables: BTreeMap::new(),
            inclusive_branches: BTreeSet::new(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.executions.insert(id, execution);
        self.children.entry(parent).or_default().push(id);
        Ok(id)
    }

    /// User-visible cancellation: one notification for the subtree root, then
    /// the whole subtree and its local variables are dropped.
    pub fn cancel_subtree(&mut self, id: ExecutionId, notifier: &mut Notifier) -> Result<Vec<Execution>, EngineError> {
        if let Some(activity_id) = self.require(id)?.activity_id.clone() {
            notifier.activity_cancelled(id, &activity_id);
        }
        self.remove_subtree(id)
    }

    /// Silent deletion, used for consumed join arrivals, completed branches and released scopes.
    pub fn remove_subtree(&mut self, id: ExecutionId) -> Result<Vec<Execution>, EngineError> {
        let parent = self.require(id)?.parent_id
            .ok_or_else(|| EngineError::Corrupted(format!("cannot remove root execution {}", id)))?;

        let doomed = self.subtree(id);
        let mut removed = Vec::with_capacity(doomed.len());
        for execution_id in doomed {
            self.children.remove(&execution_id);
            if let Some(execution) = self.executions.remove(&execution_id) {
                removed.push(execution);
            }
        }

        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.retain(|c| *c != id);
        }
        if let Some(parent) = self.executions.get_mut(&parent) {
            parent.inclusive_branches.remove(&id);
        }
        Ok(removed)
    }

    /// Drops degenerate concurrency below `root` once it has at most one child.
    ///
    /// The root keeps its identity and variables and only loses the concurrency
    /// flags. Returns the child that now carries the remaining branch.
    pub fn collapse_concurrency_root(&mut self, root: ExecutionId) -> Result<Option<ExecutionId>, EngineError> {
        let kids = self.children(root).to_vec();
        if kids.len() > 1 {
            return Ok(None);
        }

        let r = self.require_mut(root)?;
        r.is_concurrent_root = false;
        let Some(&child) = kids.first() else {
            r.inclusive_branches.clear();
            return Ok(None);
        };
        self.require_mut(child)?.is_concurrent = false;
        Ok(Some(child))
    }

    /// Re-derives the concurrency flags below `parent` after children were
    /// added or removed in bulk.
    pub fn normalize_concurrency(&mut self, parent: ExecutionId) -> Result<Option<ExecutionId>, EngineError> {
        let kids = self.children(parent).to_vec();
        if kids.len() <= 1 {
            return self.collapse_concurrency_root(parent);
        }
        self.require_mut(parent)?.is_concurrent_root = true;
        for child in kids {
            self.require_mut(child)?.is_concurrent = true;
        }
        Ok(None)
    }

    /// Captures `scope` so the caller can prove a migration left it untouched.
    pub fn preserve_scope(&self, scope: ExecutionId) -> Result<ScopeSnapshot, EngineError> {
        let execution = self.require(scope)?;
        Ok(ScopeSnapshot {
            id: execution.id,
            parent_id: execution.parent_id,
            activity_id: execution.activity_id.clone(),
            variables: execution.variables.clone(),
        })
    }

    pub fn register_inclusive_branch(&mut self, root: ExecutionId, branch: ExecutionId) -> Result<(), EngineError> {
        self.require_mut(root)?.inclusive_branches.insert(branch);
        Ok(())
    }

    /// Branches already running under `root` when an inclusive fork passes
    /// belong to its activation too.
    pub fn register_running_branches(&mut self, root: ExecutionId) -> Result<(), EngineError> {
        let kids = self.children(root).to_vec();
        self.require_mut(root)?.inclusive_branches.extend(kids);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> ExecutionTree {
        ExecutionTree::new(Uuid::new_v4(), BTreeMap::new())
    }

    #[test]
    fn concurrent_child_promotes_parent_and_siblings() {
        let mut tree = tree();
        let root = tree.root();
        let first = tree.create_child_execution(root, Some("task1".into()), false, true).unwrap();
        assert!(!tree.get(root).unwrap().is_concurrent_root);

        let second = tree.create_child_execution(root, Some("task2".into()), true, true).unwrap();
        assert!(tree.get(root).unwrap().is_concurrent_root);
        assert!(tree.get(first).unwrap().is_concurrent);
        assert!(tree.get(second).unwrap().is_concurrent);
        assert_eq!(tree.children(root), &[first, second]);
    }

    #[test]
    fn cancel_subtree_notifies_once_and_drops_descendants() {
        let mut tree = tree();
        let root = tree.root();
        let sub = tree.create_child_execution(root, Some("subProcess1".into()), false, true).unwrap();
        tree.get_mut(sub).unwrap().is_scope = true;
        tree.set_variable_local(sub, "x", json!(1)).unwrap();
        let inner = tree.create_child_execution(sub, Some("subtask".into()), false, true).unwrap();

        let mut notifier = Notifier::new(root);
        let removed = tree.cancel_subtree(sub, &mut notifier).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!tree.contains(sub));
        assert!(!tree.contains(inner));
        assert!(tree.children(root).is_empty());
        let events = notifier.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].activity_id, "subProcess1");
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut tree = tree();
        let root = tree.root();
        assert!(tree.remove_subtree(root).is_err());
    }

    #[test]
    fn collapsing_a_scope_root_keeps_the_remaining_child() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree.create_child_execution(root, Some("task1".into()), true, true).unwrap();
        let b = tree.create_child_execution(root, Some("task2".into()), true, true).unwrap();
        tree.remove_subtree(a).unwrap();

        let survivor = tree.collapse_concurrency_root(root).unwrap();
        assert_eq!(survivor, Some(b));
        assert!(!tree.get(root).unwrap().is_concurrent_root);
        assert!(!tree.get(b).unwrap().is_concurrent);
    }

    #[test]
    fn running_branches_join_the_inclusive_activation() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree.create_child_execution(root, Some("task1".into()), true, true).unwrap();
        let b = tree.create_child_execution(root, Some("task2".into()), true, true).unwrap();
        tree.register_running_branches(root).unwrap();

        let members = &tree.get(root).unwrap().inclusive_branches;
        assert!(members.contains(&a) && members.contains(&b));

        tree.remove_subtree(a).unwrap();
        assert!(!tree.get(root).unwrap().inclusive_branches.contains(&a));
    }

    #[test]
    fn collapse_leaves_real_concurrency_alone() {
        let mut tree = tree();
        let root = tree.root();
        tree.create_child_execution(root, Some("task1".into()), true, true).unwrap();
        tree.create_child_execution(root, Some("task2".into()), true, true).unwrap();
        assert_eq!(tree.collapse_concurrency_root(root).unwrap(), None);
        assert!(tree.get(root).unwrap().is_concurrent_root);
    }

    #[test]
    fn scope_snapshot_detects_variable_changes() {
        let mut tree = tree();
        let root = tree.root();
        let snapshot = tree.preserve_scope(root).unwrap();
        assert!(snapshot.verify(&tree).is_ok());

        tree.set_variable_local(root, "x", json!("changed")).unwrap();
        assert_eq!(snapshot.verify(&tree), Err(MigrationError::ScopeViolated(root)));
    }

    #[test]
    fn children_order_survives_serialization() {
        let mut tree = tree();
        let root = tree.root();
        let ids: Vec<_> = (0..5)
            .map(|i| tree.create_child_execution(root, Some(format!("t{}", i)), true, true).unwrap())
            .collect();

        let json = serde_json::to_string(&tree).unwrap();
        let restored: ExecutionTree = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.children(root), ids.as_slice());
        assert_eq!(restored, tree);
    }

    #[test]
    fn nearer_scope_variables_shadow_outer_ones() {
        let mut tree = ExecutionTree::new(Uuid::new_v4(), BTreeMap::from([("x".to_string(), json!(1))]));
        let root = tree.root();
        let sub = tree.create_child_execution(root, Some("sp".into()), false, true).unwrap();
        tree.get_mut(sub).unwrap().is_scope = true;
        tree.set_variable_local(sub, "x", json!(2)).unwrap();
        let leaf = tree.create_child_execution(sub, Some("t".into()), false, true).unwrap();

        assert_eq!(tree.visible_variables(leaf).get("x"), Some(&json!(2)));
        assert_eq!(tree.scope_of(leaf), sub);
        assert_eq!(tree.scope_of(sub), root);
    }
}
