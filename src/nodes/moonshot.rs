use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{InvokerSlot, cached_invoker, read_inputs};
use crate::history::{ChatMessage, ConversationHistory};
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeOut, NodeType, OutputSlot};
use crate::provider::{GenerationParams, InvokeRequest, Provider};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MoonshotChatInputs {
    pub prompt: String,
    /// `moonshot-v1-8k`, `moonshot-v1-32k` or `moonshot-v1-128k`.
    pub model: String,
    #[schemars(range(min = 0.0, max = 2.0))]
    pub temperature: f32,
    #[schemars(range(min = 1, max = 128000))]
    pub max_tokens: u32,
    pub system_message: String,
    /// Multi-turn only: forget earlier turns first.
    pub reset_conversation: bool,
}

impl Default for MoonshotChatInputs {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: Provider::Moonshot.default_model().to_string(),
            temperature: 0.3,
            max_tokens: 1000,
            system_message: String::new(),
            reset_conversation: false,
        }
    }
}

impl MoonshotChatInputs {
    fn params(&self) -> GenerationParams {
        GenerationParams::default()
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoonshotSingleChatNode {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde]
impl NodeType for MoonshotSingleChatNode {
    fn type_name(&self) -> String {
        "MoonshotSingleChatNode".to_string()
    }

    fn display_name(&self) -> String {
        "🌙Moonshot Single Chat".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/moonshotChat"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(MoonshotChatInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("response")]
    }

    #[tracing::instrument(name = "moonshot_single_chat_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: MoonshotChatInputs = read_inputs(&input)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Moonshot, false).await?;

        let mut messages = Vec::with_capacity(2);
        if !inputs.system_message.is_empty() {
            messages.push(ChatMessage::system(&inputs.system_message));
        }
        messages.push(ChatMessage::user(&inputs.prompt));
        let request = InvokeRequest::new(&inputs.model, messages).with_params(inputs.params());
        Ok(NodeOut::text(invoker.invoke(&request).await?.text))
    }

    fn unload(&mut self) {
        self.client.release();
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

/// Multi-turn chat that answers with the whole transcript so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoonshotMultiChatNode {
    #[serde(default)]
    history: ConversationHistory,
    #[serde(skip)]
    client: InvokerSlot,
}

impl MoonshotMultiChatNode {
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }
}

#[async_trait]
#[typetag::serde]
impl NodeType for MoonshotMultiChatNode {
    fn type_name(&self) -> String {
        "MoonshotMultiChatNode".to_string()
    }

    fn display_name(&self) -> String {
        "🌙Moonshot Multi Chat".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/moonshotChat"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(MoonshotChatInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("chat_history")]
    }

    #[tracing::instrument(name = "moonshot_multi_chat_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: MoonshotChatInputs = read_inputs(&input)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Moonshot, false).await?;

        if inputs.reset_conversation {
            self.history.reset();
        }
        self.history.ensure_system(&inputs.system_message);

        let request = InvokeRequest::new(&inputs.model, self.history.pending_with(&inputs.prompt))
            .with_params(inputs.params());
        let reply = invoker.invoke(&request).await?;
        self.history.record_turn(&inputs.prompt, &reply.text);
        Ok(NodeOut::text(self.history.transcript()))
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
    use crate::provider::ScriptedInvoker;
    use crate::secret::{MemorySecretsManager, SecretsManager};
    use serde_json::json;
    use std::sync::Arc;

    fn context(script: &Arc<ScriptedInvoker>) -> NodeContext {
        NodeContext::new(
            ConfigManager(MapConfigManager::new()),
            SecretsManager(MemorySecretsManager::with(&[("MOONSHOT_API_KEY", "ms")])),
        )
        .with_invoker(Provider::Moonshot, script.clone())
    }

    #[tokio::test]
    async fn single_chat_defaults() {
        let script = ScriptedInvoker::replying(&["你好！"]);
        let mut node = MoonshotSingleChatNode::default();
        let out = node
            .process(Message::inputs(json!({"prompt": "你好"})), &mut context(&script))
            .await
            .unwrap();
        assert_eq!(out.text_at(0), "你好！");
        let sent = script.last_request().unwrap();
        assert_eq!(sent.model, "moonshot-v1-8k");
        assert_eq!(sent.params.temperature, Some(0.3));
    }

    #[tokio::test]
    async fn multi_chat_returns_growing_transcript() {
        let script = ScriptedInvoker::replying(&["a1", "a2"]);
        let mut ctx = context(&script);
        let mut node = MoonshotMultiChatNode::default();
        let rule = "-".repeat(40);

        let first = node
            .process(Message::inputs(json!({"prompt": "q1", "system_message": "sys"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(
            first.text_at(0),
            format!("system: sys\n{rule}\nuser: q1\n{rule}\nassistant: a1\n{rule}")
        );

        let second = node
            .process(Message::inputs(json!({"prompt": "q2", "system_message": "ignored"})), &mut ctx)
            .await
            .unwrap();
        assert!(second.text_at(0).ends_with(&format!("assistant: a2\n{rule}")));
        assert!(!second.text_at(0).contains("ignored"));
        assert_eq!(script.last_request().unwrap().messages.len(), 4);
    }
}
