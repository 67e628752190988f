pub mod builder;

use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// 原始 DSL 定义的流程 (YAML 或 builder)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// DSL 中的节点类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NodeType {
    Start,
    End,
    /// 等待状态，由引擎外部完成
    Task {
        #[serde(default)]
        name: Option<String>,
    },
    /// Fork 还是 Join 由编译器根据入边数量决定
    ParallelGateway,
    InclusiveGateway,
    SubProcess {
        nodes: Vec<Node>,
        #[serde(default)]
        edges: Vec<Edge>,
    },

    // --- 语法糖 (由 Expander 展开为 fork、分支链和 join) ---
    Parallel {
        branches: Vec<Branch>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    /// 按顺序线性连接
    pub nodes: Vec<Node>,
}

/// DSL 中的节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeType,
}

/// DSL 中的边
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub condition: Option<String>,
}

impl Node {
    pub fn task(id: &str) -> Self {
        Node { id: id.to_string(), kind: NodeType::Task { name: None } }
    }
}
