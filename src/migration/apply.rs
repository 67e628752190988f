use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::EngineError;
use crate::migration::planner::{MovePlan, MovePlanner};
use crate::migration::request::ChangeStateRequest;
use crate::migration::resolver::ScopeResolver;
use crate::runtime::agenda::Agenda;
use crate::runtime::events::{LifecycleEvent, Notifier};
use crate::runtime::execution::{ExecutionId, ExecutionTree};
use crate::runtime::graph::{GraphIndex, NodeIndex};
use crate::runtime::instance::ProcessInstance;

/// Applies `request` to `instance` and returns the lifecycle events in
/// delivery order.
///
/// Validation happens before the first edit. The instance is left in an
/// unspecified state when an error is returned, so callers pass a copy and
/// keep it only on success.
pub fn apply(
    graph: &GraphIndex,
    instance: &mut ProcessInstance,
    request: &ChangeStateRequest,
) -> Result<Vec<LifecycleEvent>, EngineError> {
    let moves = ScopeResolver::new(graph, &instance.tree).resolve(&request.operations)?;
    let plan = MovePlanner::new(graph, &instance.tree).plan(&moves)?;
    debug!(
        instance_id = %instance.id,
        cancellations = plan.cancellations.len(),
        releases = plan.releases.len(),
        creations = plan.creations.len(),
        "Planned change state"
    );

    let snapshots = plan.preserved.iter()
        .map(|scope| instance.tree.preserve_scope(*scope))
        .collect::<Result<Vec<_>, _>>()?;

    let mut notifier = Notifier::new(instance.id);
    let created = mutate(graph, &mut instance.tree, &plan, &mut notifier)?;

    for snapshot in &snapshots {
        snapshot.verify(&instance.tree)?;
    }

    let mut agenda = Agenda::new(graph, instance);
    for (execution, node) in &created {
        agenda.enter(*execution, *node);
    }
    agenda.run()?;

    let events = notifier.into_events();
    info!(
        instance_id = %instance.id,
        events = events.len(),
        ended = instance.ended,
        "Change state applied"
    );
    Ok(events)
}

/// Cancels, releases and creates; returns the target executions to run.
fn mutate(
    graph: &GraphIndex,
    tree: &mut ExecutionTree,
    plan: &MovePlan,
    notifier: &mut Notifier,
) -> Result<Vec<(ExecutionId, NodeIndex)>, EngineError> {
    let mut touched = Vec::new();

    for source in &plan.cancellations {
        let parent = tree.require(*source)?.parent_id;
        tree.cancel_subtree(*source, notifier)?;
        touched.extend(parent);
    }

    for scope in &plan.releases {
        if !tree.contains(*scope) {
            continue;
        }
        let parent = tree.require(*scope)?.parent_id;
        tree.remove_subtree(*scope)?;
        touched.extend(parent);
    }

    // One new scope execution per operation, parent and sub-process.
    let mut entered: HashMap<(usize, ExecutionId, NodeIndex), ExecutionId> = HashMap::new();
    let mut created = Vec::with_capacity(plan.creations.len());

    for creation in &plan.creations {
        let mut parent = creation.anchor;
        for sp in &creation.scopes {
            let key = (creation.operation, parent, *sp);
            let scope = match entered.get(&key) {
                Some(existing) => *existing,
                None => {
                    let scope = spawn(tree, parent, &graph.node(*sp).id, true)?;
                    tree.require_mut(scope)?.is_scope = true;
                    entered.insert(key, scope);
                    touched.push(parent);
                    scope
                }
            };
            parent = scope;
        }

        let target = graph.node(creation.target);
        let execution = spawn(tree, parent, &target.id, !target.kind.is_join())?;
        notifier.activity_started(execution, &target.id);
        touched.push(parent);
        created.push((execution, creation.target));
    }

    let mut seen = Vec::new();
    for parent in touched {
        if seen.contains(&parent) || !tree.contains(parent) {
            continue;
        }
        seen.push(parent);
        tree.normalize_concurrency(parent)?;
    }

    Ok(created)
}

/// Creates an execution at `activity_id`, joining the parent's inclusive
/// activation set when that set is in use.
fn spawn(tree: &mut ExecutionTree, parent: ExecutionId, activity_id: &str, active: bool) -> Result<ExecutionId, EngineError> {
    let execution = tree.create_child_execution(parent, Some(activity_id.to_string()), false, active)?;
    if !tree.require(parent)?.inclusive_branches.is_empty() {
        tree.register_inclusive_branch(parent, execution)?;
    }
    Ok(execution)
}
