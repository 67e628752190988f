use std::collections::HashSet;

use crate::error::MigrationError;
use crate::migration::request::{MoveOperation, MoveSource};
use crate::runtime::execution::{ExecutionId, ExecutionTree};
use crate::runtime::graph::{GraphIndex, NodeIndex};

/// A move operation bound to live executions and graph nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMove {
    pub index: usize,
    /// Source executions in the order they were supplied.
    pub sources: Vec<ExecutionId>,
    pub targets: Vec<NodeIndex>,
    /// Nearest scope execution enclosing every source.
    pub source_scope: ExecutionId,
    /// Scope execution the targets are created under, `source_scope` or one of its ancestors.
    pub target_scope: ExecutionId,
    /// Scope executions between the sources and `target_scope`, emptied by the move.
    pub released: Vec<ExecutionId>,
}

pub struct ScopeResolver<'a> {
    graph: &'a GraphIndex,
    tree: &'a ExecutionTree,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(graph: &'a GraphIndex, tree: &'a ExecutionTree) -> Self {
        Self { graph, tree }
    }

    pub fn resolve(&self, operations: &[MoveOperation]) -> Result<Vec<ResolvedMove>, MigrationError> {
        let mut moves = Vec::with_capacity(operations.len());
        for (index, operation) in operations.iter().enumerate() {
            if operation.sources.is_empty() {
                return Err(MigrationError::EmptySourceSet { index });
            }
            if operation.targets.is_empty() {
                return Err(MigrationError::EmptyTargetSet { index });
            }

            let sources = self.resolve_sources(&operation.sources)?;
            let targets = operation.targets.iter()
                .map(|t| self.graph.index_of(t).ok_or_else(|| MigrationError::UnknownActivityId(t.clone())))
                .collect::<Result<Vec<_>, _>>()?;

            let source_scope = self.common_scope(&sources);
            let target_scope = self.target_scope(source_scope, &targets);
            let released = self.intermediate_scopes(&sources, target_scope);

            moves.push(ResolvedMove {
                index,
                sources,
                targets,
                source_scope,
                target_scope,
                released,
            });
        }

        // A scope may only be left behind once nothing outside the batch still runs in it.
        let moved: HashSet<ExecutionId> = moves.iter()
            .flat_map(|m| m.sources.iter().copied())
            .collect();
        for resolved in &moves {
            for scope in &resolved.released {
                self.ensure_emptied(resolved.index, *scope, &moved)?;
            }
        }

        Ok(moves)
    }

    /// Sub-process node owning the variables of `scope`, `None` for the process level.
    pub fn static_scope(&self, scope: ExecutionId) -> Option<NodeIndex> {
        if scope == self.tree.root() {
            return None;
        }
        self.tree.get(scope)
            .and_then(|e| e.activity_id.as_deref())
            .and_then(|a| self.graph.index_of(a))
    }

    fn resolve_sources(&self, sources: &MoveSource) -> Result<Vec<ExecutionId>, MigrationError> {
        let mut resolved = Vec::new();
        match sources {
            MoveSource::ActivityIds(activity_ids) => {
                for activity_id in activity_ids {
                    if self.graph.find(activity_id).is_none() {
                        return Err(MigrationError::UnknownActivityId(activity_id.clone()));
                    }
                    let live: Vec<ExecutionId> = self.tree.find_by_activity(activity_id)
                        .into_iter()
                        .filter(|id| *id != self.tree.root())
                        .collect();
                    if live.is_empty() {
                        return Err(MigrationError::UnknownActivityId(activity_id.clone()));
                    }
                    resolved.extend(live);
                }
            }
            MoveSource::ExecutionIds(execution_ids) => {
                for execution_id in execution_ids {
                    if !self.tree.contains(*execution_id) {
                        return Err(MigrationError::UnknownExecution {
                            execution_id: *execution_id,
                            process_instance_id: self.tree.process_instance_id(),
                        });
                    }
                    if *execution_id == self.tree.root() {
                        return Err(MigrationError::RootNotMovable(*execution_id));
                    }
                    resolved.push(*execution_id);
                }
            }
        }
        Ok(resolved)
    }

    /// Scope executions from `scope` up to the root, nearest first.
    fn scope_chain(&self, scope: ExecutionId) -> Vec<ExecutionId> {
        let mut chain = vec![scope];
        chain.extend(
            self.tree.ancestors(scope)
                .into_iter()
                .filter(|a| *a == self.tree.root() || self.tree.get(*a).is_some_and(|e| e.is_scope)),
        );
        chain
    }

    fn common_scope(&self, sources: &[ExecutionId]) -> ExecutionId {
        let mut scopes = sources.iter().map(|s| self.tree.scope_of(*s));
        let Some(first) = scopes.next() else {
            return self.tree.root();
        };

        let others: Vec<HashSet<ExecutionId>> = scopes
            .map(|s| self.scope_chain(s).into_iter().collect())
            .collect();
        self.scope_chain(first)
            .into_iter()
            .find(|candidate| others.iter().all(|chain| chain.contains(candidate)))
            .unwrap_or(self.tree.root())
    }

    /// Deepest scope at or above `source_scope` whose sub-process contains every target.
    fn target_scope(&self, source_scope: ExecutionId, targets: &[NodeIndex]) -> ExecutionId {
        self.scope_chain(source_scope)
            .into_iter()
            .find(|candidate| {
                let outer = self.static_scope(*candidate);
                targets.iter().all(|t| self.graph.encloses(outer, self.graph.node(*t).scope))
            })
            .unwrap_or(self.tree.root())
    }

    fn intermediate_scopes(&self, sources: &[ExecutionId], target_scope: ExecutionId) -> Vec<ExecutionId> {
        let mut released = Vec::new();
        for source in sources {
            for ancestor in self.tree.ancestors(*source) {
                if ancestor == target_scope {
                    break;
                }
                let is_scope = self.tree.get(ancestor).is_some_and(|e| e.is_scope);
                if is_scope && !released.contains(&ancestor) {
                    released.push(ancestor);
                }
            }
        }
        released
    }

    fn ensure_emptied(
        &self,
        index: usize,
        scope: ExecutionId,
        moved: &HashSet<ExecutionId>,
    ) -> Result<(), MigrationError> {
        for execution_id in self.tree.subtree(scope) {
            let Some(execution) = self.tree.get(execution_id) else {
                continue;
            };
            if execution.is_scope || execution.activity_id.is_none() {
                continue;
            }
            let covered = moved.contains(&execution_id)
                || self.tree.ancestors(execution_id)
                    .into_iter()
                    .take_while(|a| *a != scope)
                    .any(|a| moved.contains(&a));
            if !covered {
                let label = self.tree.get(scope)
                    .and_then(|s| s.activity_id.clone())
                    .unwrap_or_else(|| scope.to_string());
                return Err(MigrationError::CrossScopeMove {
                    index,
                    reason: format!(
                        "{} still has an execution at {} that is not part of the move",
                        label,
                        execution.activity_id.as_deref().unwrap_or_default()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    use crate::compiler::core::Compiler;
    use crate::dsl::builder::ProcessBuilder;

    fn graph() -> GraphIndex {
        let def = ProcessBuilder::new("subProcesses")
            .start("theStart")
            .task("taskBefore")
            .parallel_gateway("fork")
            .sub_process("subProcess1")
                .start("subStart")
                .task("subtask")
                .task("subtask2")
                .end("subEnd")
                .connect("subStart", "subtask")
                .connect("subtask", "subtask2")
                .connect("subtask2", "subEnd")
                .done()
            .sub_process("subProcess2")
                .start("subStart2")
                .task("subtask3")
                .end("subEnd2")
                .connect("subStart2", "subtask3")
                .connect("subtask3", "subEnd2")
                .done()
            .parallel_gateway("parallelJoin")
            .task("taskAfter")
            .end("theEnd")
            .connect("theStart", "taskBefore")
            .connect("taskBefore", "fork")
            .connect("fork", "subProcess1")
            .connect("fork", "subProcess2")
            .connect("subProcess1", "parallelJoin")
            .connect("subProcess2", "parallelJoin")
            .connect("parallelJoin", "taskAfter")
            .connect("taskAfter", "theEnd")
            .build();
        Compiler::new().compile(def).unwrap()
    }

    struct Fixture {
        tree: ExecutionTree,
        sp1: ExecutionId,
        subtask: ExecutionId,
        subtask3: ExecutionId,
    }

    fn fixture() -> Fixture {
        let mut tree = ExecutionTree::new(Uuid::new_v4(), BTreeMap::new());
        let root = tree.root();
        let sp1 = tree.create_child_execution(root, Some("subProcess1".into()), true, true).unwrap();
        tree.get_mut(sp1).unwrap().is_scope = true;
        let subtask = tree.create_child_execution(sp1, Some("subtask".into()), false, true).unwrap();
        let sp2 = tree.create_child_execution(root, Some("subProcess2".into()), true, true).unwrap();
        tree.get_mut(sp2).unwrap().is_scope = true;
        let subtask3 = tree.create_child_execution(sp2, Some("subtask3".into()), false, true).unwrap();
        Fixture { tree, sp1, subtask, subtask3 }
    }

    fn op(sources: &[&str], targets: &[&str]) -> MoveOperation {
        MoveOperation {
            sources: MoveSource::ActivityIds(sources.iter().map(|s| s.to_string()).collect()),
            targets: targets.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn move_inside_a_sub_process_keeps_its_scope() {
        let graph = graph();
        let f = fixture();
        let moves = ScopeResolver::new(&graph, &f.tree)
            .resolve(&[op(&["subtask"], &["subtask2"])])
            .unwrap();

        assert_eq!(moves[0].sources, vec![f.subtask]);
        assert_eq!(moves[0].source_scope, f.sp1);
        assert_eq!(moves[0].target_scope, f.sp1);
        assert!(moves[0].released.is_empty());
    }

    #[test]
    fn leaving_emptied_sub_processes_releases_them() {
        let graph = graph();
        let f = fixture();
        let moves = ScopeResolver::new(&graph, &f.tree)
            .resolve(&[op(&["subtask", "subtask3"], &["taskAfter"])])
            .unwrap();

        assert_eq!(moves[0].sources, vec![f.subtask, f.subtask3]);
        assert_eq!(moves[0].source_scope, f.tree.root());
        assert_eq!(moves[0].target_scope, f.tree.root());
        assert_eq!(moves[0].released.len(), 2);
        assert!(moves[0].released.contains(&f.sp1));
    }

    #[test]
    fn leaving_a_busy_sub_process_is_rejected() {
        let graph = graph();
        let mut f = fixture();
        f.tree.create_child_execution(f.sp1, Some("subtask2".into()), true, true).unwrap();

        let err = ScopeResolver::new(&graph, &f.tree)
            .resolve(&[op(&["subtask"], &["taskAfter"])])
            .unwrap_err();
        assert!(matches!(err, MigrationError::CrossScopeMove { index: 0, .. }));
    }

    #[test]
    fn identity_errors() {
        let graph = graph();
        let f = fixture();
        let resolver = ScopeResolver::new(&graph, &f.tree);

        assert_eq!(
            resolver.resolve(&[op(&["taskBefore"], &["task1"])]).unwrap_err(),
            MigrationError::UnknownActivityId("taskBefore".to_string())
        );
        assert_eq!(
            resolver.resolve(&[op(&["subtask"], &["nowhere"])]).unwrap_err(),
            MigrationError::UnknownActivityId("nowhere".to_string())
        );
        assert_eq!(
            resolver.resolve(&[op(&[], &["taskAfter"])]).unwrap_err(),
            MigrationError::EmptySourceSet { index: 0 }
        );

        let root = f.tree.root();
        let by_root = MoveOperation {
            sources: MoveSource::ExecutionIds(vec![root]),
            targets: vec!["taskAfter".to_string()],
        };
        assert_eq!(resolver.resolve(&[by_root]).unwrap_err(), MigrationError::RootNotMovable(root));

        let stranger = Uuid::new_v4();
        let by_stranger = MoveOperation {
            sources: MoveSource::ExecutionIds(vec![stranger]),
            targets: vec!["taskAfter".to_string()],
        };
        assert!(matches!(
            resolver.resolve(&[by_stranger]).unwrap_err(),
            MigrationError::UnknownExecution { execution_id, .. } if execution_id == stranger
        ));
    }
}
