use std::collections::{HashMap, HashSet};

use crate::error::MigrationError;
use crate::migration::resolver::ResolvedMove;
use crate::runtime::execution::{ExecutionId, ExecutionTree};
use crate::runtime::graph::{GraphIndex, NodeIndex};

/// One execution to create at a target activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCreation {
    pub operation: usize,
    /// Existing execution that will own the new branch.
    pub anchor: ExecutionId,
    /// Sub-processes entered below `anchor`, outermost first.
    pub scopes: Vec<NodeIndex>,
    pub target: NodeIndex,
}

/// Primitive edits of a whole request, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovePlan {
    /// User-visible cancellations, in the order sources were supplied.
    pub cancellations: Vec<ExecutionId>,
    /// Emptied scope executions, removed without notification.
    pub releases: Vec<ExecutionId>,
    /// In the order targets were supplied.
    pub creations: Vec<PlannedCreation>,
    /// Scope executions that must come out of the call unchanged.
    pub preserved: Vec<ExecutionId>,
}

pub struct MovePlanner<'a> {
    graph: &'a GraphIndex,
    tree: &'a ExecutionTree,
}

impl<'a> MovePlanner<'a> {
    pub fn new(graph: &'a GraphIndex, tree: &'a ExecutionTree) -> Self {
        Self { graph, tree }
    }

    pub fn plan(&self, moves: &[ResolvedMove]) -> Result<MovePlan, MigrationError> {
        let mut plan = MovePlan::default();

        let mut reachable: HashMap<Option<NodeIndex>, HashSet<NodeIndex>> = HashMap::new();
        for resolved in moves {
            let scope = self.static_scope(resolved.target_scope);
            let nodes = reachable.entry(scope)
                .or_insert_with(|| self.graph.reachable_in_scope(scope));
            for target in &resolved.targets {
                if !nodes.contains(target) {
                    return Err(MigrationError::ActivityNotReachableFromTargetScope {
                        activity_id: self.graph.node(*target).id.clone(),
                        scope: self.graph.scope_label(scope),
                    });
                }
            }
        }

        let mut claimed = HashSet::new();
        for source in moves.iter().flat_map(|m| m.sources.iter().copied()) {
            if !claimed.insert(source) {
                return Err(MigrationError::ConflictingMoves { execution_id: source });
            }
            plan.cancellations.push(source);
        }
        if let Some(nested) = plan.cancellations.iter().find(|s| self.has_ancestor_in(**s, &claimed)) {
            return Err(MigrationError::ConflictingMoves { execution_id: *nested });
        }

        let mut released = HashSet::new();
        for scope in moves.iter().flat_map(|m| m.released.iter().copied()) {
            if released.insert(scope) {
                plan.releases.push(scope);
            }
        }
        // Only the outermost scope of a released chain needs removing.
        plan.releases.retain(|s| !self.has_ancestor_in(*s, &released) && !self.has_ancestor_in(*s, &claimed));

        let doomed: HashSet<ExecutionId> = claimed.union(&released).copied().collect();
        let is_doomed = |id: ExecutionId| doomed.contains(&id) || self.has_ancestor_in(id, &doomed);

        let mut preserved = Vec::new();
        for resolved in moves {
            if is_doomed(resolved.target_scope) {
                return Err(MigrationError::ConflictingMoves { execution_id: resolved.target_scope });
            }

            for target in &resolved.targets {
                let (anchor, scopes) = self.anchor(resolved.target_scope, *target, &is_doomed);
                for id in std::iter::once(anchor).chain(self.tree.ancestors(anchor)) {
                    let is_scope = id == self.tree.root() || self.tree.get(id).is_some_and(|e| e.is_scope);
                    if is_scope && !preserved.contains(&id) {
                        preserved.push(id);
                    }
                }
                plan.creations.push(PlannedCreation {
                    operation: resolved.index,
                    anchor,
                    scopes,
                    target: *target,
                });
            }
        }
        plan.preserved = preserved;

        Ok(plan)
    }

    fn static_scope(&self, scope: ExecutionId) -> Option<NodeIndex> {
        if scope == self.tree.root() {
            return None;
        }
        self.tree.get(scope)
            .and_then(|e| e.activity_id.as_deref())
            .and_then(|a| self.graph.index_of(a))
    }

    fn has_ancestor_in(&self, id: ExecutionId, set: &HashSet<ExecutionId>) -> bool {
        self.tree.ancestors(id).iter().any(|a| set.contains(a))
    }

    /// Descends from `target_scope` through live sub-process executions that
    /// already enclose `target`; the remaining sub-processes must be entered.
    fn anchor(
        &self,
        target_scope: ExecutionId,
        target: NodeIndex,
        is_doomed: &impl Fn(ExecutionId) -> bool,
    ) -> (ExecutionId, Vec<NodeIndex>) {
        let outer = self.static_scope(target_scope);
        let chain = self.graph.scope_chain(target);
        let mut remaining: Vec<NodeIndex> = match outer {
            Some(sp) => chain.iter()
                .position(|c| *c == sp)
                .map(|pos| chain[pos + 1..].to_vec())
                .unwrap_or_default(),
            None => chain,
        };

        let mut anchor = target_scope;
        while let Some(&sp) = remaining.first() {
            let sp_id = &self.graph.node(sp).id;
            let existing = self.tree.children(anchor).iter().copied().find(|c| {
                self.tree.get(*c).is_some_and(|e| e.is_scope && e.activity_id.as_deref() == Some(sp_id.as_str()))
                    && !is_doomed(*c)
            });
            match existing {
                Some(scope) => {
                    anchor = scope;
                    remaining.remove(0);
                }
                None => break,
            }
        }
        (anchor, remaining)
    }
}
