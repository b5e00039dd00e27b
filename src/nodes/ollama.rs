//! Nodes backed by the local Ollama server. None of them needs an API key.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::sd_presets::SdPromptType;
use super::{InvokerSlot, cached_invoker, image_base64, pick_model, read_inputs};
use crate::history::ChatMessage;
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeError, NodeOut, NodeType, OutputSlot};
use crate::provider::{GenerationParams, InvokeRequest, KeepAlive, Provider};

const DEFAULT_SD_SYSTEM: &str = "You are creating a prompt for Stable Diffusion to generate an image. First step: understand the input and generate a text prompt for the input. Second step: only respond in English with the prompt itself in phrase, but embellish it as needed but keep it under 200 tokens.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LocalPromptType {
    #[default]
    Sdxl,
    Kolors,
}

impl From<LocalPromptType> for SdPromptType {
    fn from(t: LocalPromptType) -> Self {
        match t {
            LocalPromptType::Sdxl => SdPromptType::Sdxl,
            LocalPromptType::Kolors => SdPromptType::Kolors,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OllamaPromptExtractorInputs {
    pub model: String,
    /// Overrides `model` unless `none`.
    pub extra_model: String,
    pub theme: String,
    #[schemars(range(min = 1, max = 32768))]
    pub max_tokens: u32,
    #[schemars(range(min = 0.0, max = 2.0))]
    pub temperature: f32,
    pub prompt_type: LocalPromptType,
    /// Log the endpoint, prompt and raw answer at info level.
    pub debug: bool,
}

impl Default for OllamaPromptExtractorInputs {
    fn default() -> Self {
        Self {
            model: Provider::Ollama.default_model().to_string(),
            extra_model: "none".to_string(),
            theme: String::new(),
            max_tokens: 1000,
            temperature: 0.7,
            prompt_type: LocalPromptType::Sdxl,
            debug: false,
        }
    }
}

/// Image prompt writer that runs on a local model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaPromptExtractor {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde]
impl NodeType for OllamaPromptExtractor {
    fn type_name(&self) -> String {
        "OllamaPromptExtractor".to_string()
    }

    fn display_name(&self) -> String {
        "Ollama Prompt Extractor".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/prompt_utils"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(OllamaPromptExtractorInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("positive_prompt"), OutputSlot::text("negative_prompt")]
    }

    #[tracing::instrument(name = "ollama_prompt_extractor_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: OllamaPromptExtractorInputs = read_inputs(&input)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Ollama, false).await?;

        let preset = SdPromptType::from(inputs.prompt_type);
        let model = pick_model(&inputs.model, &inputs.extra_model);
        let prompt = preset.user_prompt(&inputs.theme);
        if inputs.debug {
            let url = context.base_url(Provider::Ollama).await;
            info!(%url, %model, %prompt, "ollama prompt request");
        }

        let request = InvokeRequest::new(
            model,
            vec![ChatMessage::user(format!(
                "{}\n\nHuman: {}\n\nAssistant:",
                preset.system_prompt(),
                prompt
            ))],
        )
        .with_params(
            GenerationParams::default()
                .with_temperature(inputs.temperature)
                .with_max_tokens(inputs.max_tokens),
        );
        let reply = invoker.invoke(&request).await?;
        if inputs.debug {
            info!(generated = %reply.text, "ollama prompt answer");
        }

        let (positive, negative) = preset.split(&reply.text);
        Ok(NodeOut::texts([positive, negative]))
    }

    fn unload(&mut self) {
        self.client.release();
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OllamaTextToTextInputs {
    pub prompt: String,
    pub model: String,
    pub extra_model: String,
    pub system: String,
    pub seed: u64,
    #[schemars(range(min = 0, max = 100))]
    pub top_k: u32,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub top_p: f32,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub temperature: f32,
    #[schemars(range(min = 1, max = 1024))]
    pub max_tokens: u32,
    #[schemars(range(min = 1.0, max = 1000.0))]
    pub tfs_z: f32,
    pub keep_alive: KeepAlive,
    /// Continuation state from an earlier call, as a JSON integer array.
    pub context: String,
}

impl Default for OllamaTextToTextInputs {
    fn default() -> Self {
        Self {
            prompt: "1girl".to_string(),
            model: Provider::Ollama.default_model().to_string(),
            extra_model: "none".to_string(),
            system: DEFAULT_SD_SYSTEM.to_string(),
            seed: 0,
            top_k: 40,
            top_p: 0.9,
            temperature: 0.5,
            max_tokens: 100,
            tfs_z: 1.0,
            keep_alive: KeepAlive::Unload,
            context: String::new(),
        }
    }
}

fn parse_context(raw: &str) -> Result<Option<Vec<i64>>, NodeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| NodeError::InvalidInput(format!("context must be a JSON integer array: {e}")))
}

fn seed_param(seed: u64) -> i64 {
    i64::try_from(seed).unwrap_or(i64::MAX)
}

/// Plain local generation that hands back its continuation context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaTextToText {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde]
impl NodeType for OllamaTextToText {
    fn type_name(&self) -> String {
        "OllamaTextToText".to_string()
    }

    fn display_name(&self) -> String {
        "Ollama Text To Text".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/Chat"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(OllamaTextToTextInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("response"), OutputSlot::text("context")]
    }

    #[tracing::instrument(name = "ollama_text_to_text_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: OllamaTextToTextInputs = read_inputs(&input)?;
        let previous = parse_context(&inputs.context)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Ollama, false).await?;

        let mut messages = Vec::with_capacity(2);
        if !inputs.system.is_empty() {
            messages.push(ChatMessage::system(&inputs.system));
        }
        messages.push(ChatMessage::user(&inputs.prompt));

        let params = GenerationParams {
            temperature: Some(inputs.temperature),
            max_tokens: Some(inputs.max_tokens),
            top_p: Some(inputs.top_p),
            top_k: Some(inputs.top_k),
            seed: Some(seed_param(inputs.seed)),
            tfs_z: Some(inputs.tfs_z),
            keep_alive: Some(inputs.keep_alive),
            ..Default::default()
        };
        let request = InvokeRequest::new(pick_model(&inputs.model, &inputs.extra_model), messages)
            .with_params(params)
            .with_context(previous);
        let reply = invoker.invoke(&request).await?;

        let context_out = match reply.context {
            Some(ctx) => serde_json::to_string(&ctx).map_err(|e| NodeError::Internal(e.to_string()))?,
            None => String::new(),
        };
        Ok(NodeOut::texts([reply.text, context_out]))
    }

    fn unload(&mut self) {
        self.client.release();
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OllamaImageToTextInputs {
    /// Base64 images, bare or as `data:` URLs.
    pub images: Vec<String>,
    pub query: String,
    pub model: String,
    pub seed: u64,
    #[schemars(range(min = 0, max = 100))]
    pub top_k: u32,
    #[schemars(range(min = 1, max = 1024))]
    pub max_tokens: u32,
    pub keep_alive: KeepAlive,
}

impl Default for OllamaImageToTextInputs {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            query: "describe the image".to_string(),
            model: Provider::Ollama.default_model().to_string(),
            seed: 0,
            top_k: 40,
            max_tokens: 100,
            keep_alive: KeepAlive::Unload,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaImageToText {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde]
impl NodeType for OllamaImageToText {
    fn type_name(&self) -> String {
        "OllamaImageToText".to_string()
    }

    fn display_name(&self) -> String {
        "Ollama Image To Text".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/ImageToText"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(OllamaImageToTextInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("description")]
    }

    #[tracing::instrument(name = "ollama_image_to_text_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: OllamaImageToTextInputs = read_inputs(&input)?;
        if inputs.images.is_empty() {
            return Err(NodeError::InvalidInput("at least one image is required".into()).into());
        }
        let images = inputs
            .images
            .iter()
            .map(|raw| image_base64(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Ollama, false).await?;

        let params = GenerationParams {
            max_tokens: Some(inputs.max_tokens),
            top_k: Some(inputs.top_k),
            seed: Some(seed_param(inputs.seed)),
            keep_alive: Some(inputs.keep_alive),
            ..Default::default()
        };
        let request = InvokeRequest::new(inputs.model, vec![ChatMessage::user(&inputs.query)])
            .with_params(params)
            .with_images(images);
        Ok(NodeOut::text(invoker.invoke(&request).await?.text))
    }

    fn unload(&mut self) {
        self.client.release();
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigManager, MapConfigManager};
    use crate::provider::{Completion, ScriptedInvoker};
    use crate::secret::{EmptySecretsManager, SecretsManager};
    use serde_json::json;
    use std::sync::Arc;

    fn context(script: &Arc<ScriptedInvoker>) -> NodeContext {
        NodeContext::new(
            ConfigManager(MapConfigManager::new()),
            SecretsManager(EmptySecretsManager::new()),
        )
        .with_invoker(Provider::Ollama, script.clone())
    }

    #[tokio::test]
    async fn prompt_extractor_wraps_preset_in_one_turn() {
        let script = ScriptedInvoker::replying(&["Prompt: a fox\nNegative Prompt: blurry"]);
        let mut node = OllamaPromptExtractor::default();
        let out = node
            .process(
                Message::inputs(json!({"theme": "狐狸", "extra_model": "qwen2:7b", "debug": true})),
                &mut context(&script),
            )
            .await
            .unwrap();
        assert_eq!(out, NodeOut::texts(["a fox", "blurry"]));

        let sent = script.last_request().unwrap();
        assert_eq!(sent.model, "qwen2:7b");
        assert_eq!(sent.messages.len(), 1);
        assert!(sent.last_user().ends_with("Human: 根据以下主题生成Stable Diffusion提示词：狐狸\n\nAssistant:"));
    }

    #[tokio::test]
    async fn prompt_extractor_rejects_flux() {
        let script = ScriptedInvoker::new();
        let mut node = OllamaPromptExtractor::default();
        let err = node
            .process(Message::inputs(json!({"prompt_type": "flux"})), &mut context(&script))
            .await
            .unwrap_err();
        assert!(matches!(err.error(), NodeError::InvalidInput(_)));
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test]
    async fn text_to_text_threads_context() {
        let script = ScriptedInvoker::new();
        script.push(Completion {
            text: "a girl in a garden".to_string(),
            context: Some(vec![1, 2, 3]),
        });
        script.push_text("more");
        let mut ctx = context(&script);
        let mut node = OllamaTextToText::default();

        let first = node.process(Message::inputs(json!({})), &mut ctx).await.unwrap();
        assert_eq!(first, NodeOut::texts(["a girl in a garden", "[1,2,3]"]));
        let sent = script.last_request().unwrap();
        assert_eq!(sent.last_user(), "1girl");
        assert_eq!(sent.system_prompt(), Some(DEFAULT_SD_SYSTEM));
        assert_eq!(sent.params.top_k, Some(40));
        assert_eq!(sent.params.keep_alive, Some(KeepAlive::Unload));
        assert_eq!(sent.context, None);

        let second = node
            .process(Message::inputs(json!({"context": first.text_at(1), "keep_alive": "60m"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(second.text_at(1), "");
        let sent = script.last_request().unwrap();
        assert_eq!(sent.context, Some(vec![1, 2, 3]));
        assert_eq!(sent.params.keep_alive, Some(KeepAlive::SixtyMinutes));
    }

    #[tokio::test]
    async fn malformed_context_is_invalid_input() {
        let mut node = OllamaTextToText::default();
        let err = node
            .process(
                Message::inputs(json!({"context": "not json"})),
                &mut context(&ScriptedInvoker::new()),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid input: context"));
    }

    #[tokio::test]
    async fn image_to_text_sends_clean_base64() {
        let script = ScriptedInvoker::replying(&["a cat on a mat"]);
        let mut node = OllamaImageToText::default();
        let out = node
            .process(
                Message::inputs(json!({"images": ["data:image/png;base64,QUJD"], "model": "llava"})),
                &mut context(&script),
            )
            .await
            .unwrap();
        assert_eq!(out.text_at(0), "a cat on a mat");
        let sent = script.last_request().unwrap();
        assert_eq!(sent.images, vec!["QUJD".to_string()]);
        assert_eq!(sent.last_user(), "describe the image");
    }

    #[tokio::test]
    async fn image_to_text_needs_an_image() {
        let mut node = OllamaImageToText::default();
        let err = node
            .process(Message::inputs(json!({})), &mut context(&ScriptedInvoker::new()))
            .await
            .unwrap_err();
        assert!(matches!(err.error(), NodeError::InvalidInput(_)));
    }
}
