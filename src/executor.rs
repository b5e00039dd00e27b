use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::hooks::HookRegistry;
use crate::logger::NodeMetrics;
use crate::message::Message;
use crate::node::{Node, NodeContext, NodeError, NodeOut};

/// Checks `payload` against a node's input schema and returns every
/// violation, each prefixed with the offending instance path.
pub fn validate_inputs(schema: &schemars::Schema, payload: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::validator_for(schema.as_value())
        .map_err(|e| vec![format!("input schema does not compile: {e}")])?;
    let empty = json!({});
    let instance = if payload.is_null() { &empty } else { payload };

    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{path}: {e}")
            }
        })
        .collect();
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[derive(Debug)]
struct ActiveRun {
    id: String,
    started: Instant,
}

/// Runs nodes on behalf of the host. Whatever a node does, the caller gets
/// back an output tuple of the node's declared arity.
#[derive(Debug)]
pub struct Executor {
    hooks: HookRegistry,
    metrics: NodeMetrics,
    run: Option<ActiveRun>,
}

impl Executor {
    pub fn new(hooks: HookRegistry) -> Self {
        Self {
            hooks,
            metrics: NodeMetrics::new(),
            run: None,
        }
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Start a prompt run and point the context's run clock at it.
    pub fn begin_run(&mut self, ctx: &mut NodeContext) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        ctx.mark_run_start(started);
        self.hooks.run_start(&id);
        debug!(run_id = %id, "run started");
        self.run = Some(ActiveRun {
            id: id.clone(),
            started,
        });
        id
    }

    /// Close the current run. `None` when no run was open.
    pub fn end_run(&mut self) -> Option<Duration> {
        let run = self.run.take()?;
        let total = run.started.elapsed();
        self.hooks.run_complete(&run.id, total);
        Some(total)
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run.as_ref().map(|r| r.id.as_str())
    }

    pub async fn run_node(&self, node_id: &str, node: &mut Node, message: Message, ctx: &mut NodeContext) -> NodeOut {
        let class = node.type_name();
        let slots = node.outputs();
        ctx.set_node_id(node_id);

        self.hooks.before_node(node_id, &class);
        self.metrics.started(&class);
        let started = Instant::now();

        let result = match validate_inputs(&node.schema(), message.payload_ref()) {
            Err(violations) => Err(NodeError::InvalidInput(violations.join("; ")).into()),
            Ok(()) => node.process(message, ctx).await,
        };

        let (out, failure) = match result {
            Ok(out) if out.matches(&slots) => (out, None),
            Ok(out) => {
                let err = NodeError::Internal(format!(
                    "{class} returned {} values for {} output slots",
                    out.len(),
                    slots.len()
                ));
                warn!(node_id, %class, "{err}");
                (NodeOut::error_for(&slots, &err.to_string()), Some(err.to_string()))
            }
            Err(err) => {
                let (error, fallback) = err.into_parts();
                let text = error.to_string();
                warn!(node_id, %class, error = %text, "node failed");
                let out = match fallback {
                    Some(out) if out.matches(&slots) => out,
                    _ => NodeOut::error_for(&slots, &text),
                };
                (out, Some(text))
            }
        };

        let elapsed = started.elapsed();
        self.metrics
            .finished(&class, node_id, elapsed.as_secs_f64() * 1000.0, failure.as_deref());
        self.hooks.after_node(node_id, &class, elapsed, failure.is_some());
        out
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(HookRegistry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::TimingHook;
    use crate::node::PortValue;
    use crate::nodes::{ExecutionTime, GroqChatNode, PromptExtractorNode};

    #[test]
    fn debug_output_names_metrics_and_run() {
        let rendered = format!("{:?}", Executor::default());
        assert!(rendered.contains("NodeMetrics"));
        assert!(rendered.contains("run: None"));
    }

    #[tokio::test]
    async fn invalid_inputs_become_error_outputs() {
        let executor = Executor::default();
        let mut node = Node(Box::new(GroqChatNode::default()));
        let mut ctx = NodeContext::dummy();
        let out = executor
            .run_node("1", &mut node, Message::inputs(json!({"temperature": 7.5, "max_tokens": 0})), &mut ctx)
            .await;
        assert_eq!(out.len(), 1);
        let text = out.text_at(0);
        assert!(text.starts_with("Invalid input:"), "{text}");
        assert!(text.contains("/temperature"), "{text}");
        assert!(text.contains("/max_tokens"), "{text}");
    }

    #[tokio::test]
    async fn missing_key_fills_first_slot() {
        let executor = Executor::default();
        let mut node = Node(Box::new(GroqChatNode::default()));
        let mut ctx = NodeContext::dummy();
        let out = executor
            .run_node("2", &mut node, Message::inputs(json!({"prompt": "hi"})), &mut ctx)
            .await;
        assert_eq!(
            out.values(),
            &[PortValue::Text(
                "Error: GROQ_API_KEY not set or invalid. Please check your secrets .env file.".into()
            )]
        );
    }

    #[tokio::test]
    async fn run_lifecycle_drives_timing_hook() {
        let timing = TimingHook::new();
        let mut hooks = HookRegistry::new();
        hooks.register(timing.clone());
        let mut executor = Executor::new(hooks);
        let mut ctx = NodeContext::dummy();

        assert!(executor.end_run().is_none());
        executor.begin_run(&mut ctx);
        let mut extractor = Node(Box::new(PromptExtractorNode::default()));
        let out = executor
            .run_node(
                "7",
                &mut extractor,
                Message::inputs(json!({"input_text": "**Positive Prompt:** a fox\n**Negative Prompt:** blur"})),
                &mut ctx,
            )
            .await;
        assert_eq!(out.text_at(0), "a fox");

        let mut timer = Node(Box::new(ExecutionTime::default()));
        let out = executor.run_node("8", &mut timer, Message::inputs(Value::Null), &mut ctx).await;
        assert!(out.text_at(0).ends_with('s'));

        let total = executor.end_run().unwrap();
        assert_eq!(timing.last_total(), Some(total));
        assert!(timing.node_ms("7").is_some());
        assert!(timing.node_ms("8").is_some());
    }

    #[test]
    fn validation_reports_every_violation() {
        let schema = schemars::json_schema!({
            "type": "object",
            "properties": {
                "a": {"type": "integer", "minimum": 1},
                "b": {"type": "string"}
            }
        });
        let errors = validate_inputs(&schema, &json!({"a": 0, "b": 3})).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(validate_inputs(&schema, &Value::Null).is_ok());
    }
}
