use crate::dsl::{ProcessDefinition, Node, NodeType, Edge, Branch};
use anyhow::{Result, anyhow};

/// 将 `Parallel` 块展开为显式的网关对
pub struct Expander;

impl Expander {
    pub fn new() -> Self {
        Self
    }

    pub fn expand(&self, definition: ProcessDefinition) -> Result<ProcessDefinition> {
        let (nodes, edges) = self.expand_scope(definition.nodes, definition.edges)?;
        Ok(ProcessDefinition {
            nodes,
            edges,
            ..definition
        })
    }

    fn expand_scope(&self, nodes: Vec<Node>, edges: Vec<Edge>) -> Result<(Vec<Node>, Vec<Edge>)> {
        let mut new_nodes = Vec::with_capacity(nodes.len());
        let mut new_edges = edges;

        for node in nodes {
            match node.kind {
                NodeType::Parallel { branches } => {
                    self.expand_parallel(node.id, branches, &mut new_nodes, &mut new_edges)?;
                }
                NodeType::SubProcess { nodes, edges } => {
                    let (nodes, edges) = self.expand_scope(nodes, edges)?;
                    new_nodes.push(Node {
                        id: node.id,
                        kind: NodeType::SubProcess { nodes, edges },
                    });
                }
                kind => new_nodes.push(Node { id: node.id, kind }),
            }
        }

        Ok((new_nodes, new_edges))
    }

    fn expand_parallel(
        &self,
        parallel_id: String,
        branches: Vec<Branch>,
        new_nodes: &mut Vec<Node>,
        new_edges: &mut Vec<Edge>,
    ) -> Result<()> {
        let fork_id = format!("{}_fork", parallel_id);
        let join_id = format!("{}_join", parallel_id);

        let mut branch_count = 0;
        for branch in branches {
            let (Some(head), Some(tail)) = (branch.nodes.first(), branch.nodes.last()) else {
                continue;
            };
            let head_id = head.id.clone();
            let tail_id = tail.id.clone();

            // 分支内部按顺序连接
            for pair in branch.nodes.windows(2) {
                new_edges.push(plain_edge(&pair[0].id, &pair[1].id));
            }
            for node in branch.nodes {
                if matches!(node.kind, NodeType::Parallel { .. }) {
                    return Err(anyhow!("Nested parallel block '{}' inside '{}'", node.id, parallel_id));
                }
                new_nodes.push(node);
            }

            // 连接 Fork -> 分支头，分支尾 -> Join
            new_edges.push(plain_edge(&fork_id, &head_id));
            new_edges.push(plain_edge(&tail_id, &join_id));
            branch_count += 1;
        }

        if branch_count == 0 {
            return Err(anyhow!("Parallel block '{}' has no branches", parallel_id));
        }

        new_nodes.push(Node { id: fork_id.clone(), kind: NodeType::ParallelGateway });
        new_nodes.push(Node { id: join_id.clone(), kind: NodeType::ParallelGateway });

        // 修正外部边：指向 Parallel 的改为指向 Fork，从 Parallel 出发的改为从 Join 出发
        for edge in new_edges.iter_mut() {
            if edge.target == parallel_id {
                edge.target = fork_id.clone();
            }
            if edge.source == parallel_id {
                edge.source = join_id.clone();
            }
        }

        Ok(())
    }
}

fn plain_edge(source: &str, target: &str) -> Edge {
    Edge {
        source: source.to_string(),
        target: target.to_string(),
        condition: None,
    }
}
