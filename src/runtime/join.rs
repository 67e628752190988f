use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::debug;

use crate::error::EngineError;
use crate::runtime::execution::{Execution, ExecutionId, ExecutionTree};
use crate::runtime::graph::{ActivityKind, GraphIndex, NodeIndex};

/// Arrival state of one join gateway under one concurrency root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOccurrence {
    pub join: NodeIndex,
    pub concurrency_root: ExecutionId,
    /// Inactive executions parked at the join, in creation order.
    pub arrived: Vec<ExecutionId>,
    pub expected: usize,
}

impl GatewayOccurrence {
    pub fn is_complete(&self) -> bool {
        self.arrived.len() >= self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Parked(GatewayOccurrence),
    /// `survivor` is active again and must leave the join.
    Fired {
        survivor: ExecutionId,
        consumed: Vec<ExecutionId>,
    },
}

#[derive(Default)]
struct Reach {
    direct: bool,
    joins: BTreeSet<NodeIndex>,
}

/// Decides when a join gateway fires. Holds no state of its own: the expected
/// set is derived from the execution tree every time an execution arrives.
pub struct JoinTracker<'a> {
    graph: &'a GraphIndex,
}

impl<'a> JoinTracker<'a> {
    pub fn new(graph: &'a GraphIndex) -> Self {
        Self { graph }
    }

    pub fn occurrence(&self, tree: &ExecutionTree, execution: ExecutionId) -> Result<GatewayOccurrence, EngineError> {
        let parked = tree.require(execution)?;
        let join = self.join_of(parked)?;
        let kind = self.graph.node(join).kind;
        let root = parked.parent_id
            .ok_or_else(|| EngineError::Corrupted(format!("join execution {} has no parent", execution)))?;

        let members = &tree.require(root)?.inclusive_branches;
        let filter_members = kind == ActivityKind::InclusiveJoin && !members.is_empty();

        let mut arrived = Vec::new();
        let mut direct = 0;
        let mut pending = BTreeSet::new();

        for &child in tree.children(root) {
            let sibling = tree.require(child)?;
            if self.is_parked_at(sibling, join) {
                arrived.push(child);
                continue;
            }
            if filter_members && !members.contains(&child) {
                continue;
            }

            let mut reach = Reach::default();
            for position in self.positions(tree, child) {
                let holder = tree.require(position)?;
                let Some(idx) = holder.activity_id.as_deref().and_then(|a| self.graph.index_of(a)) else {
                    continue;
                };
                if self.graph.node(idx).kind.is_join() && !holder.is_active {
                    reach.joins.insert(idx);
                } else {
                    let walked = self.walk(idx, join, kind);
                    reach.direct |= walked.direct;
                    reach.joins.extend(walked.joins);
                }
            }

            if reach.direct {
                direct += 1;
            } else {
                pending.extend(reach.joins);
            }
        }

        let funnelling = pending.iter()
            .filter(|j| self.funnels(**j, join, kind, &pending, &mut HashSet::new()))
            .count();

        Ok(GatewayOccurrence {
            join,
            concurrency_root: root,
            expected: arrived.len() + direct + funnelling,
            arrived,
        })
    }

    /// Registers `execution` as arrived (it must already be parked) and fires
    /// the join when every expected branch is present.
    pub fn arrive(&self, tree: &mut ExecutionTree, execution: ExecutionId) -> Result<JoinOutcome, EngineError> {
        let occurrence = self.occurrence(tree, execution)?;
        let join_id = &self.graph.node(occurrence.join).id;

        if !occurrence.is_complete() {
            debug!(
                join = %join_id,
                arrived = occurrence.arrived.len(),
                expected = occurrence.expected,
                "Execution parked at join"
            );
            return Ok(JoinOutcome::Parked(occurrence));
        }

        let root = occurrence.concurrency_root;
        let consumed: Vec<ExecutionId> = occurrence.arrived.iter()
            .copied()
            .filter(|id| *id != execution)
            .collect();
        for id in &consumed {
            tree.remove_subtree(*id)?;
        }

        tree.collapse_concurrency_root(root)?;
        let survivor = execution;
        tree.require_mut(survivor)?.is_active = true;

        debug!(join = %join_id, survivor = %survivor, consumed = consumed.len(), "Join fired");
        Ok(JoinOutcome::Fired { survivor, consumed })
    }

    /// Re-checks every join parked under `root`, used after a branch vanished
    /// and can no longer arrive. Returns the survivors of the joins that fired.
    pub fn reevaluate(&self, tree: &mut ExecutionTree, root: ExecutionId) -> Result<Vec<ExecutionId>, EngineError> {
        let mut seen = HashSet::new();
        let candidates: Vec<ExecutionId> = tree.children(root).iter()
            .copied()
            .filter(|id| {
                tree.get(*id)
                    .and_then(|e| self.join_of(e).ok().filter(|_| !e.is_active))
                    .is_some_and(|join| seen.insert(join))
            })
            .collect();

        let mut survivors = Vec::new();
        for candidate in candidates {
            if !tree.contains(candidate) {
                continue;
            }
            if let JoinOutcome::Fired { survivor, .. } = self.arrive(tree, candidate)? {
                survivors.push(survivor);
            }
        }
        Ok(survivors)
    }

    fn join_of(&self, execution: &Execution) -> Result<NodeIndex, EngineError> {
        let activity = execution.activity_id.as_deref()
            .ok_or_else(|| EngineError::Corrupted(format!("execution {} is not at an activity", execution.id)))?;
        let idx = self.graph.index_of(activity)
            .ok_or_else(|| EngineError::Corrupted(format!("activity {} is not in the definition", activity)))?;
        if !self.graph.node(idx).kind.is_join() {
            return Err(EngineError::Corrupted(format!("activity {} is not a join", activity)));
        }
        Ok(idx)
    }

    fn is_parked_at(&self, execution: &Execution, join: NodeIndex) -> bool {
        !execution.is_active
            && execution.activity_id.as_deref() == Some(self.graph.node(join).id.as_str())
    }

    /// Executions that carry the position of `child`: the child itself, or the
    /// activity holders below a structural execution without an activity.
    fn positions(&self, tree: &ExecutionTree, child: ExecutionId) -> Vec<ExecutionId> {
        let has_activity = tree.get(child).is_some_and(|e| e.activity_id.is_some());
        if has_activity {
            return vec![child];
        }
        tree.subtree(child)
            .into_iter()
            .filter(|id| tree.get(*id).is_some_and(|e| e.activity_id.is_some() && !e.is_scope))
            .collect()
    }

    /// Follows outgoing flows from `from` until `join`, another join, or a dead end.
    fn walk(&self, from: NodeIndex, join: NodeIndex, kind: ActivityKind) -> Reach {
        let join_scope = self.graph.node(join).scope;
        let mut reach = Reach::default();
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(idx) = queue.pop_front() {
            let node = self.graph.node(idx);
            let mut next: Vec<NodeIndex> = node.outgoing.iter().map(|f| f.target).collect();
            if next.is_empty() && node.scope != join_scope {
                next.extend(node.scope);
            }

            for target in next {
                let target_kind = self.graph.node(target).kind;
                if target == join {
                    reach.direct = true;
                } else if target_kind.is_join() {
                    reach.joins.insert(target);
                } else if target_kind.is_fork() && kind == ActivityKind::ParallelJoin {
                    continue;
                } else if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        reach
    }

    /// A join `from` delivers one token into `join` if its continuation reaches
    /// `join` without being absorbed by another join that already counts.
    fn funnels(
        &self,
        from: NodeIndex,
        join: NodeIndex,
        kind: ActivityKind,
        counted: &BTreeSet<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        if !visited.insert(from) {
            return false;
        }
        let reach = self.walk(from, join, kind);
        if reach.direct {
            return true;
        }
        reach.joins.iter()
            .filter(|j| !counted.contains(j))
            .any(|j| self.funnels(*j, join, kind, counted, visited))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    use crate::compiler::core::Compiler;
    use crate::dsl::builder::ProcessBuilder;

    fn parallel_graph() -> GraphIndex {
        let def = ProcessBuilder::new("parallelTask")
            .start("theStart")
            .task("taskBefore")
            .parallel_gateway("fork")
            .task("task1")
            .task("task2")
            .task("task3")
            .parallel_gateway("parallelJoin")
            .task("taskAfter")
            .end("theEnd")
            .connect("theStart", "taskBefore")
            .connect("taskBefore", "fork")
            .connect("fork", "task1")
            .connect("fork", "task2")
            .connect("fork", "task3")
            .connect("task1", "parallelJoin")
            .connect("task2", "parallelJoin")
            .connect("task3", "parallelJoin")
            .connect("parallelJoin", "taskAfter")
            .connect("taskAfter", "theEnd")
            .build();
        Compiler::new().compile(def).unwrap()
    }

    fn branch(tree: &mut ExecutionTree, activity: &str, active: bool) -> ExecutionId {
        let root = tree.root();
        tree.create_child_execution(root, Some(activity.to_string()), true, active).unwrap()
    }

    #[test]
    fn parallel_join_waits_for_every_branch() {
        let graph = parallel_graph();
        let tracker = JoinTracker::new(&graph);
        let mut tree = ExecutionTree::new(Uuid::new_v4(), BTreeMap::new());
        let first = branch(&mut tree, "parallelJoin", false);
        let _second = branch(&mut tree, "task2", true);
        let third = branch(&mut tree, "parallelJoin", false);

        match tracker.arrive(&mut tree, third).unwrap() {
            JoinOutcome::Parked(occurrence) => {
                assert_eq!(occurrence.arrived, vec![first, third]);
                assert_eq!(occurrence.expected, 3);
            }
            other => panic!("join fired early: {:?}", other),
        }
        assert_eq!(tree.children(tree.root()).len(), 3);
    }

    #[test]
    fn last_arrival_fires_and_survives() {
        let graph = parallel_graph();
        let tracker = JoinTracker::new(&graph);
        let mut tree = ExecutionTree::new(Uuid::new_v4(), BTreeMap::new());
        let first = branch(&mut tree, "parallelJoin", false);
        let last = branch(&mut tree, "parallelJoin", false);

        let outcome = tracker.arrive(&mut tree, last).unwrap();
        assert_eq!(outcome, JoinOutcome::Fired { survivor: last, consumed: vec![first] });

        let root = tree.root();
        assert_eq!(tree.children(root), &[last]);
        assert!(!tree.get(root).unwrap().is_concurrent_root);
        let survivor = tree.get(last).unwrap();
        assert!(survivor.is_active);
        assert!(!survivor.is_concurrent);
    }

    #[test]
    fn branches_beyond_the_join_are_not_expected() {
        let graph = parallel_graph();
        let tracker = JoinTracker::new(&graph);
        let mut tree = ExecutionTree::new(Uuid::new_v4(), BTreeMap::new());
        let parked = branch(&mut tree, "parallelJoin", false);
        branch(&mut tree, "taskAfter", true);

        let occurrence = tracker.occurrence(&tree, parked).unwrap();
        assert_eq!(occurrence.expected, 1);
        assert!(occurrence.is_complete());
    }

    #[test]
    fn inclusive_join_counts_only_activated_branches() {
        let def = ProcessBuilder::new("inclusive")
            .start("theStart")
            .inclusive_gateway("gwFork")
            .task("task1")
            .task("task2")
            .task("task3")
            .inclusive_gateway("gwJoin")
            .end("theEnd")
            .connect("theStart", "gwFork")
            .connect("gwFork", "task1")
            .connect("gwFork", "task2")
            .connect("gwFork", "task3")
            .connect("task1", "gwJoin")
            .connect("task2", "gwJoin")
            .connect("task3", "gwJoin")
            .connect("gwJoin", "theEnd")
            .build();
        let graph = Compiler::new().compile(def).unwrap();
        let tracker = JoinTracker::new(&graph);

        let mut tree = ExecutionTree::new(Uuid::new_v4(), BTreeMap::new());
        let root = tree.root();
        let parked = branch(&mut tree, "gwJoin", false);
        let active = branch(&mut tree, "task2", true);
        let _outsider = branch(&mut tree, "task3", true);
        tree.register_inclusive_branch(root, parked).unwrap();
        tree.register_inclusive_branch(root, active).unwrap();

        let occurrence = tracker.occurrence(&tree, parked).unwrap();
        assert_eq!(occurrence.expected, 2);

        tree.remove_subtree(active).unwrap();
        let survivors = tracker.reevaluate(&mut tree, root).unwrap();
        assert_eq!(survivors, vec![parked]);
    }

    #[test]
    fn parked_nested_join_counts_once() {
        let def = ProcessBuilder::new("nested")
            .start("theStart")
            .parallel_gateway("outerFork")
            .parallel_gateway("innerFork")
            .task("a")
            .task("b")
            .task("c")
            .parallel_gateway("innerJoin")
            .parallel_gateway("outerJoin")
            .end("theEnd")
            .connect("theStart", "outerFork")
            .connect("outerFork", "innerFork")
            .connect("outerFork", "c")
            .connect("innerFork", "a")
            .connect("innerFork", "b")
            .connect("a", "innerJoin")
            .connect("b", "innerJoin")
            .connect("innerJoin", "outerJoin")
            .connect("c", "outerJoin")
            .connect("outerJoin", "theEnd")
            .build();
        let graph = Compiler::new().compile(def).unwrap();
        let tracker = JoinTracker::new(&graph);

        let mut tree = ExecutionTree::new(Uuid::new_v4(), BTreeMap::new());
        let _a = branch(&mut tree, "a", true);
        let _b_parked = branch(&mut tree, "innerJoin", false);
        let c_parked = branch(&mut tree, "outerJoin", false);

        let occurrence = tracker.occurrence(&tree, c_parked).unwrap();
        // c is here, innerJoin still owes one token.
        assert_eq!(occurrence.expected, 2);
        assert!(!occurrence.is_complete());
    }
}
