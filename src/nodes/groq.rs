use async_trait::async_trait;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sd_presets::SdPromptType;
use super::{InvokerSlot, cached_invoker, read_inputs};
use crate::history::ChatMessage;
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeOut, NodeType, OutputSlot};
use crate::provider::{GenerationParams, InvokeRequest, Provider};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GroqChatInputs {
    /// e.g. `llama3-70b-8192`, `llama-3.1-8b-instant`, `mixtral-8x7b-32768`.
    pub model: String,
    pub prompt: String,
    #[schemars(range(min = 1, max = 32768))]
    pub max_tokens: u32,
    #[schemars(range(min = 0.0, max = 2.0))]
    pub temperature: f32,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub top_p: f32,
    pub system_message: String,
    #[schemars(range(min = -2.0, max = 2.0))]
    pub presence_penalty: f32,
    #[schemars(range(min = -2.0, max = 2.0))]
    pub frequency_penalty: f32,
}

impl Default for GroqChatInputs {
    fn default() -> Self {
        Self {
            model: Provider::Groq.default_model().to_string(),
            prompt: String::new(),
            max_tokens: 1000,
            temperature: 0.7,
            top_p: 1.0,
            system_message: String::new(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// Single-turn Groq completion with the full sampling surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroqChatNode {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde]
impl NodeType for GroqChatNode {
    fn type_name(&self) -> String {
        "GroqChatNode".to_string()
    }

    fn display_name(&self) -> String {
        "Groq Chat".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/groqchat"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(GroqChatInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("response")]
    }

    #[tracing::instrument(name = "groq_chat_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: GroqChatInputs = read_inputs(&input)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Groq, false).await?;

        let mut messages = Vec::with_capacity(2);
        if !inputs.system_message.is_empty() {
            messages.push(ChatMessage::system(&inputs.system_message));
        }
        messages.push(ChatMessage::user(&inputs.prompt));

        let params = GenerationParams {
            temperature: Some(inputs.temperature),
            max_tokens: Some(inputs.max_tokens),
            top_p: Some(inputs.top_p),
            presence_penalty: Some(inputs.presence_penalty),
            frequency_penalty: Some(inputs.frequency_penalty),
            ..Default::default()
        };
        let reply = invoker
            .invoke(&InvokeRequest::new(inputs.model, messages).with_params(params))
            .await?;
        Ok(NodeOut::text(reply.text))
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
pub struct SdPromptAgentInputs {
    pub model: String,
    /// Subject of the picture, in any language.
    pub theme: String,
    #[schemars(range(min = 1, max = 32768))]
    pub max_tokens: u32,
    #[schemars(range(min = 0.0, max = 2.0))]
    pub temperature: f32,
    pub prompt_type: SdPromptType,
    /// `-1` picks a random seed.
    #[schemars(range(min = -1))]
    pub seed: i64,
}

impl Default for SdPromptAgentInputs {
    fn default() -> Self {
        Self {
            model: Provider::Groq.default_model().to_string(),
            theme: String::new(),
            max_tokens: 1000,
            temperature: 0.7,
            prompt_type: SdPromptType::Sdxl,
            seed: -1,
        }
    }
}

fn resolve_seed(seed: i64) -> i64 {
    if seed < 0 {
        rand::rng().random_range(0..i64::MAX)
    } else {
        seed
    }
}

/// Writes text-to-image prompts for a theme through Groq.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SDPromptAgent {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde]
impl NodeType for SDPromptAgent {
    fn type_name(&self) -> String {
        "SDPromptAgent".to_string()
    }

    fn display_name(&self) -> String {
        "SD Prompt Agent".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/prompt_utils"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(SdPromptAgentInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("positive_prompt"), OutputSlot::text("negative_prompt")]
    }

    #[tracing::instrument(name = "sd_prompt_agent_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: SdPromptAgentInputs = read_inputs(&input)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Groq, false).await?;

        let preset = inputs.prompt_type;
        let seed = resolve_seed(inputs.seed);
        debug!(seed, ?preset, "generating image prompt");

        let request = InvokeRequest::new(
            inputs.model,
            vec![
                ChatMessage::system(preset.system_prompt()),
                ChatMessage::user(preset.user_prompt(&inputs.theme)),
            ],
        )
        .with_params(
            GenerationParams::default()
                .with_temperature(inputs.temperature)
                .with_max_tokens(inputs.max_tokens)
                .with_seed(seed),
        );
        let reply = invoker.invoke(&request).await?;
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
