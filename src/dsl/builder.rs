use crate::dsl::{ProcessDefinition, Node, Edge, NodeType, Branch};
use std::collections::HashMap;
use serde_json::Value;

pub struct ProcessBuilder {
    id: String,
    name: String,
    variables: HashMap<String, Value>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl ProcessBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            variables: HashMap::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    pub fn start(mut self, id: &str) -> Self {
        self.nodes.push(Node { id: id.to_string(), kind: NodeType::Start });
        self
    }

    pub fn end(mut self, id: &str) -> Self {
        self.nodes.push(Node { id: id.to_string(), kind: NodeType::End });
        self
    }

    pub fn task(mut self, id: &str) -> Self {
        self.nodes.push(Node::task(id));
        self
    }

    pub fn parallel_gateway(mut self, id: &str) -> Self {
        self.nodes.push(Node { id: id.to_string(), kind: NodeType::ParallelGateway });
        self
    }

    pub fn inclusive_gateway(mut self, id: &str) -> Self {
        self.nodes.push(Node { id: id.to_string(), kind: NodeType::InclusiveGateway });
        self
    }

    /// 添加并行块，每个分支是一条线性节点链
    pub fn parallel(mut self, id: &str, branches: Vec<Vec<Node>>) -> Self {
        let branches = branches.into_iter()
            .map(|nodes| Branch { nodes })
            .collect();

        self.nodes.push(Node {
            id: id.to_string(),
            kind: NodeType::Parallel { branches },
        });
        self
    }

    pub fn sub_process(self, id: &str) -> SubProcessBuilder {
        SubProcessBuilder {
            process_builder: self,
            id: id.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.edges.push(edge(source, target, None));
        self
    }

    pub fn connect_if(mut self, source: &str, target: &str, condition: &str) -> Self {
        self.edges.push(edge(source, target, Some(condition)));
        self
    }

    pub fn build(self) -> ProcessDefinition {
        ProcessDefinition {
            id: self.id,
            name: self.name,
            variables: self.variables,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

/// 收集子流程内部的节点，`done()` 返回外层 builder
pub struct SubProcessBuilder {
    process_builder: ProcessBuilder,
    id: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl SubProcessBuilder {
    pub fn start(mut self, id: &str) -> Self {
        self.nodes.push(Node { id: id.to_string(), kind: NodeType::Start });
        self
    }

    pub fn end(mut self, id: &str) -> Self {
        self.nodes.push(Node { id: id.to_string(), kind: NodeType::End });
        self
    }

    pub fn task(mut self, id: &str) -> Self {
        self.nodes.push(Node::task(id));
        self
    }

    pub fn parallel_gateway(mut self, id: &str) -> Self {
        self.nodes.push(Node { id: id.to_string(), kind: NodeType::ParallelGateway });
        self
    }

    pub fn inclusive_gateway(mut self, id: &str) -> Self {
        self.nodes.push(Node { id: id.to_string(), kind: NodeType::InclusiveGateway });
        self
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.edges.push(edge(source, target, None));
        self
    }

    pub fn connect_if(mut self, source: &str, target: &str, condition: &str) -> Self {
        self.edges.push(edge(source, target, Some(condition)));
        self
    }

    pub fn done(mut self) -> ProcessBuilder {
        self.process_builder.nodes.push(Node {
            id: self.id,
            kind: NodeType::SubProcess {
                nodes: self.nodes,
                edges: self.edges,
            },
        });
        self.process_builder
    }
}

fn edge(source: &str, target: &str, condition: Option<&str>) -> Edge {
    Edge {
        source: source.to_string(),
        target: target.to_string(),
        condition: condition.map(|c| c.to_string()),
    }
}
