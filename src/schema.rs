// src/schema.rs

use std::{fs, path::Path};

use anyhow::{Context, Error};
use serde_json::{Value, json};

use crate::catalog::{create_node, list_nodes};
use crate::node::NodeType;

/// Input schema and output slots of one node class, as a single document.
pub fn node_schema(node: &dyn NodeType) -> Value {
    let mut inputs = node.schema().to_value();
    if let Value::Object(map) = &mut inputs {
        map.remove("$schema");
    }

    let mut root = serde_json::Map::new();
    root.insert("$schema".into(), json!("https://json-schema.org/draft/2020-12/schema"));
    root.insert("title".into(), json!(node.type_name()));
    root.insert("description".into(), json!(node.display_name()));
    root.insert("category".into(), json!(node.category()));
    root.insert("inputs".into(), inputs);
    root.insert("outputs".into(), json!(node.outputs()));
    Value::Object(root)
}

/// Writes `node-<class>.schema.json` for every registered class plus a
/// `catalog.json` index into `out_dir`. Returns the number of node files.
pub fn write_schema(out_dir: &Path) -> Result<usize, Error> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("could not create {}", out_dir.display()))?;

    let nodes = list_nodes();
    for info in &nodes {
        // `class` came from `list_nodes`, but registration may race
        let Some(node) = create_node(&info.class) else {
            continue;
        };
        let text = serde_json::to_string_pretty(&node_schema(node.0.as_ref()))?;
        let filename = format!("node-{}.schema.json", info.class);
        fs::write(out_dir.join(&filename), text)
            .with_context(|| format!("could not write {filename}"))?;
    }

    fs::write(out_dir.join("catalog.json"), serde_json::to_string_pretty(&nodes)?)
        .context("could not write catalog.json")?;
    Ok(nodes.len())
}
