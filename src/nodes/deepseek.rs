use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{InvokerSlot, cached_invoker, read_inputs};
use crate::extract::{dedupe_sentences, remove_commentary_lines};
use crate::history::{ChatMessage, ConversationHistory};
use crate::lang::{Lang, is_language};
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeError, NodeOut, NodeType, OutputSlot};
use crate::provider::{GenerationParams, InvokeRequest, ModelInvoker, Provider};

/// Persona presets for the chat node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeepSeekRole {
    #[default]
    #[serde(rename = "通用")]
    General,
    #[serde(rename = "报错助手")]
    ErrorHelper,
    #[serde(rename = "标题党")]
    Headline,
    #[serde(rename = "灵感助手")]
    Inspiration,
    #[serde(rename = "小红书")]
    Xiaohongshu,
    #[serde(rename = "信息提取")]
    Extraction,
}

impl DeepSeekRole {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            DeepSeekRole::General => "",
            DeepSeekRole::ErrorHelper => include_str!("prompts/deepseek_error_helper.md").trim(),
            DeepSeekRole::Headline => include_str!("prompts/deepseek_headline.md").trim(),
            DeepSeekRole::Inspiration => include_str!("prompts/deepseek_inspiration.md").trim(),
            DeepSeekRole::Xiaohongshu => include_str!("prompts/deepseek_xiaohongshu.md").trim(),
            DeepSeekRole::Extraction => include_str!("prompts/deepseek_extraction.md").trim(),
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            DeepSeekRole::ErrorHelper => 0.0,
            DeepSeekRole::Headline | DeepSeekRole::Inspiration | DeepSeekRole::Xiaohongshu => 1.25,
            DeepSeekRole::Extraction => 0.7,
            DeepSeekRole::General => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DeepSeekChatInputs {
    pub role: DeepSeekRole,
    pub message: String,
    #[schemars(range(min = 1, max = 32768))]
    pub max_tokens: u32,
    /// Forget earlier turns before this one.
    pub reset_conversation: bool,
}

impl Default for DeepSeekChatInputs {
    fn default() -> Self {
        Self {
            role: DeepSeekRole::General,
            message: String::new(),
            max_tokens: 1000,
            reset_conversation: false,
        }
    }
}

/// Multi-turn chat with role presets. The conversation survives between runs
/// of the same node instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepSeekChatNode {
    #[serde(default)]
    history: ConversationHistory,
    #[serde(skip)]
    client: InvokerSlot,
}

impl DeepSeekChatNode {
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }
}

#[async_trait]
#[typetag::serde]
impl NodeType for DeepSeekChatNode {
    fn type_name(&self) -> String {
        "DeepSeekChatNode".to_string()
    }

    fn display_name(&self) -> String {
        "DeepSeek Chat".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/MultiRole"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(DeepSeekChatInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("response")]
    }

    #[tracing::instrument(name = "deepseek_chat_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: DeepSeekChatInputs = read_inputs(&input)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::DeepSeek, false).await?;

        if inputs.reset_conversation {
            self.history.reset();
        }
        self.history.ensure_system(inputs.role.system_prompt());

        let request = InvokeRequest::new(
            Provider::DeepSeek.default_model(),
            self.history.pending_with(&inputs.message),
        )
        .with_params(
            GenerationParams::default()
                .with_temperature(inputs.role.temperature())
                .with_max_tokens(inputs.max_tokens),
        );
        let reply = invoker.invoke(&request).await?;
        self.history.record_turn(&inputs.message, &reply.text);
        debug!(turns = self.history.len(), "deepseek conversation updated");
        Ok(NodeOut::text(reply.text))
    }

    fn unload(&mut self) {
        self.client.release();
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

const TRANSLATION_TEMPERATURE: f32 = 0.3;
const COMMENTARY_PREFIXES: [&str; 2] = ["这个", "This"];

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DeepSeekTranslatorInputs {
    pub text: String,
    pub source_lang: String,
    pub target_lang: Lang,
    /// Localise for this country; blank skips the review passes.
    pub country: String,
    /// Drop the client after the run.
    pub clean_after_execution: bool,
}

impl Default for DeepSeekTranslatorInputs {
    fn default() -> Self {
        Self {
            text: String::new(),
            source_lang: "auto".to_string(),
            target_lang: Lang::English,
            country: String::new(),
            clean_after_execution: true,
        }
    }
}

/// Translate, then optionally review and rewrite the translation for a
/// country's cultural context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepSeekTranslator {
    #[serde(skip)]
    client: InvokerSlot,
}

async fn ask(invoker: &Arc<dyn ModelInvoker>, system: &str, user: &str) -> Result<String, NodeError> {
    let request = InvokeRequest::new(
        Provider::DeepSeek.default_model(),
        vec![ChatMessage::system(system), ChatMessage::user(user)],
    )
    .with_params(GenerationParams::default().with_temperature(TRANSLATION_TEMPERATURE));
    Ok(invoker.invoke(&request).await?.text)
}

async fn translate_and_improve(
    invoker: &Arc<dyn ModelInvoker>,
    inputs: &DeepSeekTranslatorInputs,
) -> Result<String, NodeError> {
    let target = inputs.target_lang.code();
    let first = ask(
        invoker,
        &format!(
            "You are a professional translator. Translate the following text from {} to {}. Only return the translation, without any explanations or additional comments.",
            inputs.source_lang, target
        ),
        &inputs.text,
    )
    .await?;

    let country = inputs.country.trim();
    if country.is_empty() {
        return Ok(first);
    }

    let suggestions = ask(
        invoker,
        "You are an expert in cultural localization and translation.",
        &format!(
            "Review the following translation and provide suggestions for improvement, considering the cultural context of {country}:\n\n{first}"
        ),
    )
    .await?;
    if suggestions.trim().is_empty() {
        return Ok(first);
    }

    let mut improved = ask(
        invoker,
        &format!(
            "You are an expert translator. Translate to {target} and improve the text based on the suggestions. Only return the improved translation, without any explanations or additional comments."
        ),
        &format!(
            "Original translation:\n{first}\n\nSuggestions:\n{suggestions}\n\nImprove the translation, considering these suggestions:"
        ),
    )
    .await?;

    if !is_language(&improved, inputs.target_lang) {
        info!(target_lang = target, "improved translation drifted from target language, translating again");
        improved = ask(
            invoker,
            &format!(
                "Translate the following text to {target}. Only return the translation, without any explanations or additional comments."
            ),
            &improved,
        )
        .await?;
    }

    Ok(dedupe_sentences(&remove_commentary_lines(&improved, &COMMENTARY_PREFIXES)))
}

#[async_trait]
#[typetag::serde]
impl NodeType for DeepSeekTranslator {
    fn type_name(&self) -> String {
        "DeepSeekTranslator".to_string()
    }

    fn display_name(&self) -> String {
        "DeepSeek Translator".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/text"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(DeepSeekTranslatorInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("translation")]
    }

    #[tracing::instrument(name = "deepseek_translator_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: DeepSeekTranslatorInputs = read_inputs(&input)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::DeepSeek, false).await?;
        let result = translate_and_improve(&invoker, &inputs).await;
        if inputs.clean_after_execution {
            self.client.release();
        }
        Ok(NodeOut::text(result?))
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
    use crate::history::ChatRole;
    use crate::provider::{ProviderError, ScriptedInvoker};
    use crate::secret::{MemorySecretsManager, SecretsManager};
    use serde_json::json;

    fn context(script: &Arc<ScriptedInvoker>) -> NodeContext {
        NodeContext::new(
            ConfigManager(MapConfigManager::new()),
            SecretsManager(MemorySecretsManager::with(&[("DEEPSEEK_API_KEY", "sk-test")])),
        )
        .with_invoker(Provider::DeepSeek, script.clone())
    }

    #[tokio::test]
    async fn role_sets_system_prompt_and_temperature() {
        let script = ScriptedInvoker::replying(&["1. 震惊……"]);
        let mut ctx = context(&script);
        let mut node = DeepSeekChatNode::default();

        let out = node
            .process(Message::inputs(json!({"role": "标题党", "message": "猫"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.text_at(0), "1. 震惊……");

        let sent = script.last_request().unwrap();
        assert_eq!(sent.params.temperature, Some(1.25));
        assert_eq!(sent.params.max_tokens, Some(1000));
        assert_eq!(sent.model, "deepseek-chat");
        assert!(sent.system_prompt().unwrap().contains("爆款网文作家"));
    }

    #[tokio::test]
    async fn conversation_accumulates_and_resets() {
        let script = ScriptedInvoker::replying(&["a1", "a2", "a3"]);
        let mut ctx = context(&script);
        let mut node = DeepSeekChatNode::default();

        for q in ["q1", "q2"] {
            node.process(Message::inputs(json!({"message": q})), &mut ctx).await.unwrap();
        }
        assert_eq!(node.history().count(ChatRole::User), 2);
        assert_eq!(node.history().count(ChatRole::Assistant), 2);
        assert_eq!(node.history().count(ChatRole::System), 0);
        assert_eq!(script.last_request().unwrap().messages.len(), 3);

        node.process(
            Message::inputs(json!({"message": "q3", "reset_conversation": true, "role": "信息提取"})),
            &mut ctx,
        )
        .await
        .unwrap();
        assert_eq!(node.history().len(), 3);
        assert_eq!(node.history().messages()[0].role, ChatRole::System);
    }

    #[tokio::test]
    async fn failed_call_leaves_history_untouched() {
        let script = ScriptedInvoker::new();
        script.push_err(ProviderError::Status {
            provider: Provider::DeepSeek,
            status: 500,
            body: "boom".into(),
        });
        let mut ctx = context(&script);
        let mut node = DeepSeekChatNode::default();
        let err = node
            .process(Message::inputs(json!({"message": "hi"})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error: deepseek returned HTTP 500: boom");
        assert!(node.history().is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let mut node = DeepSeekChatNode::default();
        let err = node
            .process(Message::inputs(json!({"message": "hi"})), &mut NodeContext::dummy())
            .await
            .unwrap_err();
        assert!(matches!(err.error(), NodeError::MissingKey(k) if k == "DEEPSEEK_API_KEY"));
    }

    #[tokio::test]
    async fn blank_country_returns_first_pass() {
        let script = ScriptedInvoker::replying(&["Hello world"]);
        let mut ctx = context(&script);
        let mut node = DeepSeekTranslator::default();
        let out = node
            .process(Message::inputs(json!({"text": "你好世界"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.text_at(0), "Hello world");
        assert_eq!(script.calls(), 1);
        let sent = script.last_request().unwrap();
        assert_eq!(sent.params.temperature, Some(0.3));
        assert!(sent.system_prompt().unwrap().contains("from auto to en"));
        assert!(!node.client.is_loaded());
    }

    #[tokio::test]
    async fn localisation_retranslates_and_cleans() {
        let script = ScriptedInvoker::replying(&[
            "Hello friend",
            "Use a warmer greeting.",
            "这是改进后的翻译。",
            "G'day mate. G'day mate.\nThis version sounds more local.",
        ]);
        let mut ctx = context(&script);
        let mut node = DeepSeekTranslator::default();
        let out = node
            .process(
                Message::inputs(json!({
                    "text": "你好朋友",
                    "target_lang": "en",
                    "country": "Australia",
                    "clean_after_execution": false
                })),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.text_at(0), "G'day mate.");
        assert_eq!(script.calls(), 4);
        assert!(node.client.is_loaded());

        let review = &script.requests()[1];
        assert!(review.last_user().contains("cultural context of Australia"));
    }
}
