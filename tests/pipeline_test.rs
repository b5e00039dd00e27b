use std::sync::Arc;

use promptnodes::catalog::register_builtin_nodes;
use promptnodes::config::{ConfigManager, MapConfigManager};
use promptnodes::executor::Executor;
use promptnodes::hooks::{HookRegistry, TimingHook};
use promptnodes::node::{NodeContext, PortValue};
use promptnodes::pipeline::{Job, Pipeline, PipelineError};
use promptnodes::provider::{Provider, ProviderError, ScriptedInvoker};
use promptnodes::secret::{EmptySecretsManager, MemorySecretsManager, SecretsManager};
use tempfile::TempDir;

fn moonshot_context(script: &Arc<ScriptedInvoker>) -> NodeContext {
    NodeContext::new(
        ConfigManager(MapConfigManager::new()),
        SecretsManager(MemorySecretsManager::with(&[("MOONSHOT_API_KEY", "ms")])),
    )
    .with_invoker(Provider::Moonshot, script.clone())
}

fn text<'a>(value: Option<&'a PortValue>) -> &'a str {
    value.and_then(PortValue::as_text).unwrap_or_default()
}

#[tokio::test]
async fn job_file_chains_extractors() {
    register_builtin_nodes();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("split.yaml");
    std::fs::write(
        &path,
        r#"
steps:
  - id: split
    class: PromptExtractorNode
    inputs:
      input_text: |
        **Positive Prompt:** a lighthouse at dusk
        **Negative Prompt:** blurry, low quality
  - id: tags
    class: StructuredExtractorNode
    inputs:
      text: "Subject: {{steps.split.positive_prompt}}\nAvoid: {{steps.split.negative_prompt}}"
      markers: ["Avoid:"]
"#,
    )
    .unwrap();

    let job = Job::load(&path).unwrap();
    let mut pipeline = Pipeline::new(job, Executor::default()).unwrap();
    let report = pipeline.run(&mut NodeContext::dummy()).await.unwrap();

    let split = report.step("split").unwrap();
    assert_eq!(text(split.get("positive_prompt")), "a lighthouse at dusk");
    assert_eq!(text(split.get("negative_prompt")), "blurry, low quality");
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[1].class, "StructuredExtractorNode");
}

#[tokio::test]
async fn repeated_runs_keep_chat_history() {
    register_builtin_nodes();
    let job = Job::from_json_str(
        r#"{"name": "chat", "steps": [
            {"id": "chat", "class": "MoonshotMultiChatNode", "inputs": {"prompt": "继续"}}
        ]}"#,
    )
    .unwrap();
    let timing = TimingHook::new();
    let mut hooks = HookRegistry::new();
    hooks.register(timing.clone());
    let mut pipeline = Pipeline::new(job, Executor::new(hooks)).unwrap();

    let script = ScriptedInvoker::replying(&["第一", "第二"]);
    let mut ctx = moonshot_context(&script);
    let first = pipeline.run(&mut ctx).await.unwrap();
    let second = pipeline.run(&mut ctx).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    let transcript = text(second.step("chat").unwrap().get("chat_history"));
    assert_eq!(transcript.matches("user: 继续").count(), 2);
    assert!(transcript.contains("assistant: 第一"));
    assert!(transcript.contains("assistant: 第二"));
    // The second call carried the first exchange.
    assert_eq!(script.last_request().unwrap().messages.len(), 3);
    assert!(timing.node_ms("chat").is_some());
    assert!(timing.last_total().is_some());
}

#[tokio::test]
async fn failures_become_step_outputs() {
    register_builtin_nodes();
    let job = Job::from_yaml_str(
        r#"
steps:
  - id: ask
    class: MoonshotSingleChatNode
    inputs:
      prompt: hi
  - id: echo
    class: StructuredExtractorNode
    inputs:
      text: "Said: {{steps.ask.response}}"
      markers: ["Said:"]
"#,
    )
    .unwrap();
    let mut pipeline = Pipeline::new(job.clone(), Executor::default()).unwrap();

    let script = ScriptedInvoker::new();
    script.push_err(ProviderError::Status {
        provider: Provider::Moonshot,
        status: 500,
        body: "boom".into(),
    });
    let report = pipeline.run(&mut moonshot_context(&script)).await.unwrap();
    assert_eq!(
        text(report.step("ask").unwrap().get("response")),
        "Error: moonshot returned HTTP 500: boom"
    );

    // A fresh instance resolves its client again and finds no key.
    let mut pipeline = Pipeline::new(job, Executor::default()).unwrap();
    let mut keyless = NodeContext::new(
        ConfigManager(MapConfigManager::new()),
        SecretsManager(EmptySecretsManager::new()),
    );
    let report = pipeline.run(&mut keyless).await.unwrap();
    assert_eq!(
        text(report.step("ask").unwrap().get("response")),
        "Error: MOONSHOT_API_KEY not set or invalid. Please check your secrets .env file."
    );
}

#[test]
fn job_files_need_a_known_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("job.toml");
    std::fs::write(&path, "steps = []").unwrap();
    assert!(matches!(Job::load(&path), Err(PipelineError::Extension(ext)) if ext == "toml"));
    assert!(matches!(
        Job::load(&dir.path().join("missing.yaml")),
        Err(PipelineError::Read { .. })
    ));
}
