use crate::dsl::{ProcessDefinition, Node, NodeType, Edge};
use crate::runtime::graph::{ActivityKind, ActivityNode, Flow, GraphIndex, NodeIndex};
use crate::compiler::expander::Expander;
use std::collections::HashMap;
use anyhow::{Result, anyhow};
use tracing::debug;

/// Turns a (possibly nested) process definition into a flat `GraphIndex`.
pub struct Compiler {
    id_map: HashMap<String, NodeIndex>,
    nodes: Vec<ActivityNode>,
    // Gateways keep their DSL type until incoming flows are known.
    gateways: HashMap<NodeIndex, NodeType>,
    scoped_edges: Vec<(Option<NodeIndex>, Edge)>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            id_map: HashMap::new(),
            nodes: Vec::new(),
            gateways: HashMap::new(),
            scoped_edges: Vec::new(),
        }
    }

    pub fn compile(&mut self, raw_definition: ProcessDefinition) -> Result<GraphIndex> {
        self.id_map.clear();
        self.nodes.clear();
        self.gateways.clear();
        self.scoped_edges.clear();

        // 0. Expand authoring shorthands
        let definition = Expander::new().expand(raw_definition)?;

        // 1. Flatten scopes and index nodes
        self.index_scope(definition.nodes, definition.edges, None)?;

        // 2. Wire flows
        for (scope, edge) in std::mem::take(&mut self.scoped_edges) {
            let source = self.resolve(&edge.source)?;
            let target = self.resolve(&edge.target)?;
            if self.nodes[source].scope != scope || self.nodes[target].scope != scope {
                return Err(anyhow!(
                    "Edge {} -> {} crosses a sub-process boundary",
                    edge.source, edge.target
                ));
            }
            self.nodes[source].outgoing.push(Flow { target, condition: edge.condition });
            self.nodes[target].incoming.push(source);
        }

        // 3. Classify gateways
        for (idx, gateway) in &self.gateways {
            let joins = self.nodes[*idx].incoming.len() > 1;
            self.nodes[*idx].kind = match (gateway, joins) {
                (NodeType::ParallelGateway, true) => ActivityKind::ParallelJoin,
                (NodeType::ParallelGateway, false) => ActivityKind::ParallelFork,
                (_, true) => ActivityKind::InclusiveJoin,
                (_, false) => ActivityKind::InclusiveFork,
            };
        }

        // 4. Start nodes, one per scope
        let start_index = self.start_of(None, &definition.id)?;
        let sub_processes: Vec<NodeIndex> = (0..self.nodes.len())
            .filter(|idx| self.nodes[*idx].kind == ActivityKind::SubProcess)
            .collect();
        for sp in sub_processes {
            let label = self.nodes[sp].id.clone();
            self.nodes[sp].start = Some(self.start_of(Some(sp), &label)?);
        }

        debug!(process = %definition.id, nodes = self.nodes.len(), "Compiled process definition");

        Ok(GraphIndex::new(
            definition.id,
            definition.name,
            definition.variables,
            std::mem::take(&mut self.nodes),
            start_index,
        ))
    }

    fn index_scope(&mut self, nodes: Vec<Node>, edges: Vec<Edge>, scope: Option<NodeIndex>) -> Result<()> {
        self.scoped_edges.extend(edges.into_iter().map(|e| (scope, e)));

        for node in nodes {
            let idx = self.nodes.len();
            if self.id_map.insert(node.id.clone(), idx).is_some() {
                return Err(anyhow!("Duplicate activity ID: {}", node.id));
            }

            let kind = match &node.kind {
                NodeType::Start => ActivityKind::Start,
                NodeType::End => ActivityKind::End,
                NodeType::Task { .. } => ActivityKind::Task,
                NodeType::SubProcess { .. } => ActivityKind::SubProcess,
                NodeType::ParallelGateway => ActivityKind::ParallelFork,
                NodeType::InclusiveGateway => ActivityKind::InclusiveFork,
                NodeType::Parallel { .. } => {
                    return Err(anyhow!("Parallel block '{}' should have been expanded", node.id));
                }
            };

            self.nodes.push(ActivityNode {
                id: node.id,
                kind,
                outgoing: Vec::new(),
                incoming: Vec::new(),
                scope,
                start: None,
            });

            match node.kind {
                NodeType::SubProcess { nodes, edges } => self.index_scope(nodes, edges, Some(idx))?,
                gateway @ (NodeType::ParallelGateway | NodeType::InclusiveGateway) => {
                    self.gateways.insert(idx, gateway);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn start_of(&self, scope: Option<NodeIndex>, label: &str) -> Result<NodeIndex> {
        let starts: Vec<NodeIndex> = self.nodes.iter()
            .enumerate()
            .filter(|(_, n)| n.scope == scope && n.kind == ActivityKind::Start)
            .map(|(idx, _)| idx)
            .collect();

        match starts.as_slice() {
            [single] => Ok(*single),
            [] => Err(anyhow!("Start node not found in scope {}", label)),
            _ => Err(anyhow!("Scope {} has {} start nodes", label, starts.len())),
        }
    }

    fn resolve(&self, activity_id: &str) -> Result<NodeIndex> {
        self.id_map.get(activity_id)
            .cloned()
            .ok_or_else(|| anyhow!("Target node not found: {}", activity_id))
    }
}
