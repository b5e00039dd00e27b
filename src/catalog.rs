use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::node::{Node, NodeType};

/// What the host needs to list a node class and build fresh instances.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub display_name: String,
    pub category: String,
    prototype: Node,
}

/// Listing row for `list_nodes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub class: String,
    pub display_name: String,
    pub category: String,
}

// Global registry: class name -> prototype instance.
static CATALOG: Lazy<DashMap<String, NodeEntry>> = Lazy::new(DashMap::new);

/// Registers `prototype` under its `type_name()`, replacing any earlier entry.
pub fn register_node(prototype: Box<dyn NodeType>) {
    let class = prototype.type_name();
    let entry = NodeEntry {
        display_name: prototype.display_name(),
        category: prototype.category().to_string(),
        prototype: Node(prototype),
    };
    CATALOG.insert(class, entry);
}

pub fn unregister_node(class: &str) -> bool {
    CATALOG.remove(class).is_some()
}

/// A fresh instance of `class`, with empty history and no loaded handles.
pub fn create_node(class: &str) -> Option<Node> {
    CATALOG.get(class).map(|entry| entry.value().prototype.clone())
}

/// Every registered class, sorted by category then class name.
pub fn list_nodes() -> Vec<NodeInfo> {
    let mut nodes: Vec<NodeInfo> = CATALOG
        .iter()
        .map(|entry| NodeInfo {
            class: entry.key().clone(),
            display_name: entry.value().display_name.clone(),
            category: entry.value().category.clone(),
        })
        .collect();
    nodes.sort_by(|a, b| (&a.category, &a.class).cmp(&(&b.category, &b.class)));
    nodes
}

/// Register every node shipped with the crate.
pub fn register_builtin_nodes() {
    for node in crate::nodes::builtin() {
        register_node(node);
    }
}
