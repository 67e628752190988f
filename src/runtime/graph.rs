use std::collections::{HashMap, HashSet, VecDeque};
use serde::{Serialize, Deserialize};
use serde_json::Value;

pub type NodeIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Start,
    End,
    Task,
    ParallelFork,
    ParallelJoin,
    InclusiveFork,
    InclusiveJoin,
    SubProcess,
}

impl ActivityKind {
    pub fn is_join(self) -> bool {
        matches!(self, ActivityKind::ParallelJoin | ActivityKind::InclusiveJoin)
    }

    pub fn is_fork(self) -> bool {
        matches!(self, ActivityKind::ParallelFork | ActivityKind::InclusiveFork)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    pub target: NodeIndex,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityNode {
    pub id: String,
    pub kind: ActivityKind,
    pub outgoing: Vec<Flow>,
    pub incoming: Vec<NodeIndex>,
    /// Enclosing sub-process, `None` at process level.
    pub scope: Option<NodeIndex>,
    /// Start node of the body, only set for sub-processes.
    pub start: Option<NodeIndex>,
}

/// Compiled, read-only view of a process definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphIndex {
    pub id: String,
    pub name: String,
    pub variables: HashMap<String, Value>,
    pub nodes: Vec<ActivityNode>,
    pub start_index: NodeIndex,
    index: HashMap<String, NodeIndex>,
}

impl GraphIndex {
    pub fn new(
        id: String,
        name: String,
        variables: HashMap<String, Value>,
        nodes: Vec<ActivityNode>,
        start_index: NodeIndex,
    ) -> Self {
        let index = nodes.iter()
            .enumerate()
            .map(|(idx, node)| (node.id.clone(), idx))
            .collect();
        Self { id, name, variables, nodes, start_index, index }
    }

    pub fn node(&self, idx: NodeIndex) -> &ActivityNode {
        &self.nodes[idx]
    }

    pub fn index_of(&self, activity_id: &str) -> Option<NodeIndex> {
        self.index.get(activity_id).copied()
    }

    pub fn find(&self, activity_id: &str) -> Option<&ActivityNode> {
        self.index_of(activity_id).map(|idx| &self.nodes[idx])
    }

    /// Sub-processes enclosing `idx`, outermost first.
    pub fn scope_chain(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut chain = Vec::new();
        let mut current = self.nodes[idx].scope;
        while let Some(sp) = current {
            chain.push(sp);
            current = self.nodes[sp].scope;
        }
        chain.reverse();
        chain
    }

    /// True when `outer` is `inner` or one of its enclosing scopes.
    pub fn encloses(&self, outer: Option<NodeIndex>, inner: Option<NodeIndex>) -> bool {
        let Some(outer) = outer else {
            return true;
        };
        let mut current = inner;
        while let Some(sp) = current {
            if sp == outer {
                return true;
            }
            current = self.nodes[sp].scope;
        }
        false
    }

    pub fn scope_start(&self, scope: Option<NodeIndex>) -> NodeIndex {
        match scope {
            Some(sp) => self.nodes[sp].start.unwrap_or(sp),
            None => self.start_index,
        }
    }

    pub fn scope_label(&self, scope: Option<NodeIndex>) -> String {
        match scope {
            Some(sp) => self.nodes[sp].id.clone(),
            None => self.id.clone(),
        }
    }

    /// Nodes that a token entering `scope` at its start can ever occupy,
    /// including the bodies of nested sub-processes.
    pub fn reachable_in_scope(&self, scope: Option<NodeIndex>) -> HashSet<NodeIndex> {
        let start = self.scope_start(scope);
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(idx) = queue.pop_front() {
            let node = &self.nodes[idx];
            let body_start = if node.kind == ActivityKind::SubProcess { node.start } else { None };
            let next = node.outgoing.iter().map(|f| f.target).chain(body_start);
            for target in next {
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::core::Compiler;
    use crate::dsl::builder::ProcessBuilder;

    // outer -> inner -> leaf, plus a sibling sub-process
    fn nested_graph() -> GraphIndex {
        let def = ProcessBuilder::new("nested")
            .start("start")
            .sub_process("outer")
                .start("outerStart")
                .task("outerTask")
                .end("outerEnd")
                .connect("outerStart", "outerTask")
                .connect("outerTask", "outerEnd")
                .done()
            .sub_process("sibling")
                .start("siblingStart")
                .task("siblingTask")
                .connect("siblingStart", "siblingTask")
                .done()
            .end("end")
            .connect("start", "outer")
            .connect("outer", "end")
            .build();
        Compiler::new().compile(def).unwrap()
    }

    #[test]
    fn scope_chain_is_outermost_first() {
        let graph = nested_graph();
        let outer = graph.index_of("outer").unwrap();
        let task = graph.index_of("outerTask").unwrap();

        assert_eq!(graph.scope_chain(task), vec![outer]);
        assert!(graph.scope_chain(outer).is_empty());
        assert_eq!(graph.scope_start(Some(outer)), graph.index_of("outerStart").unwrap());
        assert_eq!(graph.scope_start(None), graph.start_index);
        assert_eq!(graph.scope_label(None), "nested");
    }

    #[test]
    fn encloses_follows_nesting() {
        let graph = nested_graph();
        let outer = graph.index_of("outer");
        let sibling = graph.index_of("sibling");

        assert!(graph.encloses(None, outer));
        assert!(graph.encloses(outer, outer));
        assert!(!graph.encloses(outer, sibling));
        assert!(!graph.encloses(outer, None));
    }

    #[test]
    fn reachability_enters_sub_process_bodies() {
        let graph = nested_graph();
        let from_top = graph.reachable_in_scope(None);

        assert!(from_top.contains(&graph.index_of("outerTask").unwrap()));
        assert!(from_top.contains(&graph.index_of("end").unwrap()));
        // Never connected from the process start
        assert!(!from_top.contains(&graph.index_of("sibling").unwrap()));
        assert!(!from_top.contains(&graph.index_of("siblingTask").unwrap()));

        let from_sibling = graph.reachable_in_scope(graph.index_of("sibling"));
        assert!(from_sibling.contains(&graph.index_of("siblingTask").unwrap()));
        assert!(!from_sibling.contains(&graph.index_of("outerTask").unwrap()));
    }
}
