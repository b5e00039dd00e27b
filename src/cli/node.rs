use anyhow::{Context, anyhow};
use clap::Args;
use serde_json::{Map, Value};

use super::CliContext;
use crate::catalog::create_node;
use crate::executor::Executor;
use crate::message::Message;

#[derive(Args, Debug)]
pub struct NodeArgs {
    /// Node class, as shown by `promptnodes list`
    pub class: String,

    /// Inputs as inline JSON, or `@path` to read them from a file
    #[arg(long, default_value = "{}")]
    pub inputs: String,
}

/// Inline JSON or `@file` contents.
pub fn read_inputs_arg(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading inputs from {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("inputs are not valid JSON")
}

pub async fn execute(args: NodeArgs, context: &CliContext) -> anyhow::Result<()> {
    let mut node = create_node(&args.class)
        .ok_or_else(|| anyhow!("unknown node class `{}`; see `promptnodes list`", args.class))?;
    let inputs = read_inputs_arg(&args.inputs)?;

    let mut executor = Executor::default();
    let mut ctx = context.node_context().await;
    executor.begin_run(&mut ctx);
    let out = executor
        .run_node(&args.class, &mut node, Message::inputs(inputs), &mut ctx)
        .await;
    executor.end_run();
    node.unload();

    let named: Map<String, Value> = node
        .outputs()
        .into_iter()
        .zip(out.into_values())
        .map(|(slot, value)| Ok((slot.name, serde_json::to_value(value)?)))
        .collect::<Result<_, serde_json::Error>>()?;
    println!("{}", serde_json::to_string_pretty(&named)?);
    Ok(())
}
