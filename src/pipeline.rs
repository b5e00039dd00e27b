//! Sequential job runner standing in for a host editor.
//!
//! A job file lists steps `{id, class, inputs}`. String inputs may reference
//! earlier outputs as `{{steps.<id>.<slot>}}`; they are rendered with
//! handlebars right before the step runs. Node instances live as long as the
//! [`Pipeline`], so repeated runs keep conversation history.

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::catalog::create_node;
use crate::executor::Executor;
use crate::message::Message;
use crate::node::{Node, NodeContext, NodeOut, PortValue};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not read job file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse job file: {0}")]
    Parse(String),
    #[error("unsupported job file extension `{0}` (expected .yaml, .yml or .json)")]
    Extension(String),
    #[error("step `{0}` is defined more than once")]
    DuplicateStep(String),
    #[error("step `{step}` uses unknown node class `{class}`")]
    UnknownClass { step: String, class: String },
    #[error("step `{step}`: template error: {message}")]
    Template { step: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    pub id: String,
    pub class: String,
    #[serde(default)]
    pub inputs: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

impl Job {
    pub fn from_yaml_str(text: &str) -> Result<Self, PipelineError> {
        serde_yaml_bw::from_str(text).map_err(|e| PipelineError::Parse(format!("YAML parse error: {e}")))
    }

    pub fn from_json_str(text: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(text).map_err(|e| PipelineError::Parse(format!("JSON parse error: {e}")))
    }

    /// Load by extension: `.yaml`/`.yml` or `.json`.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path).map_err(|source| PipelineError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|os| os.to_str())
            .unwrap_or_default()
            .to_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&contents),
            "json" => Self::from_json_str(&contents),
            other => Err(PipelineError::Extension(other.to_string())),
        }
    }
}

/// Outputs of one step, keyed by slot name in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub id: String,
    pub class: String,
    pub outputs: Vec<(String, PortValue)>,
}

impl StepReport {
    pub fn get(&self, slot: &str) -> Option<&PortValue> {
        self.outputs.iter().find(|(name, _)| name == slot).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
    pub total: Duration,
}

impl RunReport {
    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.id == id)
    }
}

struct Stage {
    step: Step,
    node: Node,
}

pub struct Pipeline {
    stages: Vec<Stage>,
    executor: Executor,
    registry: Handlebars<'static>,
}

impl Pipeline {
    /// Instantiate every step's node from the catalog.
    pub fn new(job: Job, executor: Executor) -> Result<Self, PipelineError> {
        let mut seen = HashSet::new();
        let mut stages = Vec::with_capacity(job.steps.len());
        for step in job.steps {
            if !seen.insert(step.id.clone()) {
                return Err(PipelineError::DuplicateStep(step.id));
            }
            let node = create_node(&step.class).ok_or_else(|| PipelineError::UnknownClass {
                step: step.id.clone(),
                class: step.class.clone(),
            })?;
            stages.push(Stage { step, node });
        }

        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        Ok(Self {
            stages,
            executor,
            registry,
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run every step once, in file order.
    pub async fn run(&mut self, ctx: &mut NodeContext) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let run_id = self.executor.begin_run(ctx);
        let mut scope = Map::new();
        let mut steps = Vec::with_capacity(self.stages.len());

        for stage in &mut self.stages {
            let data = json!({ "steps": scope });
            let inputs = render_value(&self.registry, &stage.step.inputs, &data).map_err(|message| {
                PipelineError::Template {
                    step: stage.step.id.clone(),
                    message,
                }
            })?;

            let message = Message::new(&uuid::Uuid::new_v4().to_string(), inputs, Some(run_id.clone()));
            let out = self
                .executor
                .run_node(&stage.step.id, &mut stage.node, message, ctx)
                .await;

            let report = step_report(&stage.step, &stage.node, out);
            scope.insert(
                report.id.clone(),
                Value::Object(
                    report
                        .outputs
                        .iter()
                        .map(|(name, value)| (name.clone(), json!(value)))
                        .collect(),
                ),
            );
            steps.push(report);
        }

        let total = self.executor.end_run().unwrap_or_default();
        info!(%run_id, steps = steps.len(), "pipeline run finished");
        Ok(RunReport {
            run_id,
            started_at,
            steps,
            total,
        })
    }

    /// Release every node's cached model handle.
    pub fn unload(&mut self) {
        for stage in &mut self.stages {
            stage.node.unload();
        }
    }
}

fn step_report(step: &Step, node: &Node, out: NodeOut) -> StepReport {
    let outputs = node
        .outputs()
        .into_iter()
        .map(|slot| slot.name)
        .zip(out.into_values())
        .collect();
    StepReport {
        id: step.id.clone(),
        class: step.class.clone(),
        outputs,
    }
}

/// Render every string in `value` that contains a template expression.
fn render_value(registry: &Handlebars<'_>, value: &Value, data: &Value) -> Result<Value, String> {
    Ok(match value {
        Value::String(s) if s.contains("{{") => {
            Value::String(registry.render_template(s, data).map_err(|e| e.to_string())?)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(registry, v, data))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(registry, v, data)?)))
                .collect::<Result<_, String>>()?,
        ),
        other => other.clone(),
    })
}
