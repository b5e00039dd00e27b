use async_trait::async_trait;
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::{InvokerSlot, cached_invoker, image_base64, read_inputs};
use crate::extract::Extractor;
use crate::history::ChatMessage;
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeError, NodeOut, NodeType, OutputSlot};
use crate::provider::{GenerationParams, InvokeRequest, ModelInvoker, Provider};

const CATEGORY: &str = "🌙DW/Gemini1.5";
const FLASH_MODEL: &str = "gemini-1.5-flash";
const PRO_MODEL: &str = "gemini-1.5-pro";

static CLIP_SECTIONS: Lazy<Extractor> = Lazy::new(Extractor::clip_sections);

/// Call Gemini; a failure answers every output slot with `错误: …`.
async fn ask(invoker: &Arc<dyn ModelInvoker>, request: &InvokeRequest, slots: usize) -> Result<String, NodeErr> {
    match invoker.invoke(request).await {
        Ok(done) => Ok(done.text),
        Err(e) => {
            warn!("gemini call failed: {e}");
            let text = format!("错误: {e}");
            Err(NodeErr::with_fallback(
                e.into(),
                NodeOut::texts(std::iter::repeat_n(text, slots)),
            ))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GeminiTextInputs {
    pub prompt: String,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub temperature: f32,
    #[schemars(range(min = 1, max = 2048))]
    pub max_tokens: u32,
}

impl Default for GeminiTextInputs {
    fn default() -> Self {
        Self {
            prompt: "你好，请问有什么可以帮助你的吗？".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiText {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde(name = "Gemini1_5Text")]
impl NodeType for GeminiText {
    fn type_name(&self) -> String {
        "Gemini1_5Text".to_string()
    }

    fn display_name(&self) -> String {
        "Gemini 1.5 文本".to_string()
    }

    fn category(&self) -> &'static str {
        CATEGORY
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(GeminiTextInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("response")]
    }

    #[tracing::instrument(name = "gemini_text_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: GeminiTextInputs = read_inputs(&input)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Gemini, true).await?;
        let request = InvokeRequest::new(FLASH_MODEL, vec![ChatMessage::user(inputs.prompt)]).with_params(
            GenerationParams::default()
                .with_temperature(inputs.temperature)
                .with_max_tokens(inputs.max_tokens),
        );
        Ok(NodeOut::text(ask(&invoker, &request, 1).await?))
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
pub struct GeminiVisionInputs {
    pub prompt: String,
    /// Base64 image, bare or as a `data:` URL.
    pub image: String,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub temperature: f32,
    #[schemars(range(min = 1, max = 2048))]
    pub max_tokens: u32,
    /// Prefix the answer with the seed it was run under.
    pub use_fixed_seed: bool,
    pub seed: u64,
}

impl Default for GeminiVisionInputs {
    fn default() -> Self {
        Self {
            prompt: "分析这张图片并生成一个详细的文本到图像提示。不要加前缀！".to_string(),
            image: String::new(),
            temperature: 0.7,
            max_tokens: 1024,
            use_fixed_seed: false,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiVision {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde(name = "Gemini1_5Vision")]
impl NodeType for GeminiVision {
    fn type_name(&self) -> String {
        "Gemini1_5Vision".to_string()
    }

    fn display_name(&self) -> String {
        "Gemini 1.5 视觉".to_string()
    }

    fn category(&self) -> &'static str {
        CATEGORY
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(GeminiVisionInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("description")]
    }

    #[tracing::instrument(name = "gemini_vision_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: GeminiVisionInputs = read_inputs(&input)?;
        let image = image_base64(&inputs.image)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::Gemini, true).await?;

        let request = InvokeRequest::new(FLASH_MODEL, vec![ChatMessage::user(inputs.prompt)])
            .with_images(vec![image])
            .with_params(
                GenerationParams::default()
                    .with_temperature(inputs.temperature)
                    .with_max_tokens(inputs.max_tokens),
            );
        let text = ask(&invoker, &request, 1).await?;
        Ok(NodeOut::text(if inputs.use_fixed_seed {
            format!("[使用固定种子: {}]\n\n{text}", inputs.seed)
        } else {
            text
        }))
    }

    fn unload(&mut self) {
        self.client.release();
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GeminiFluxInputs {
    pub text_input: String,
    /// Optional base64 image to describe.
    pub image_input: Option<String>,
}

impl GeminiFluxInputs {
    fn user_prompt(&self) -> String {
        match (&self.image_input, self.text_input.is_empty()) {
            (Some(_), false) => format!(
                "请分析这张图片，并结合以下文本生成Stable Diffusion prompt。文本：{}",
                self.text_input
            ),
            (Some(_), true) => "请分析这张图片，并生成相应的Stable Diffusion prompt。".to_string(),
            (None, _) => format!("请根据以下主题生成Stable Diffusion prompt：{}", self.text_input),
        }
    }
}

/// Writes the two prompts a Flux pipeline takes: CLIP-L keywords and a T5
/// natural-language description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiFluxPrompt {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde]
impl NodeType for GeminiFluxPrompt {
    fn type_name(&self) -> String {
        "GeminiFluxPrompt".to_string()
    }

    fn display_name(&self) -> String {
        "Gemini Flux Prompt".to_string()
    }

    fn category(&self) -> &'static str {
        CATEGORY
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(GeminiFluxInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("clip_L"), OutputSlot::text("clip_T5")]
    }

    #[tracing::instrument(name = "gemini_flux_prompt_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: GeminiFluxInputs = read_inputs(&input)?;
        let images = match inputs.image_input.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => vec![image_base64(raw)?],
            _ => Vec::new(),
        };
        let invoker = cached_invoker(&mut self.client, context, Provider::Gemini, true).await?;

        let prompt = format!(
            "{}\n\n{}",
            include_str!("prompts/gemini_flux.md").trim_end(),
            inputs.user_prompt()
        );
        let request = InvokeRequest::new(PRO_MODEL, vec![ChatMessage::user(prompt)]).with_images(images);
        let answer = ask(&invoker, &request, 2).await?;

        let found = CLIP_SECTIONS.extract(&answer);
        let (clip_l, clip_t5) = (found.get("clip_l"), found.get("clip_t5"));
        if clip_l.is_empty() || clip_t5.is_empty() {
            let reason = "API 未能生成有效的 clip-L 和 clip-T5 内容";
            let text = format!("错误: {reason}");
            return Err(NodeErr::with_fallback(
                NodeError::Internal(reason.to_string()),
                NodeOut::texts([text.as_str(), text.as_str()]),
            ));
        }
        Ok(NodeOut::texts([clip_l, clip_t5]))
    }

    fn unload(&mut self) {
        self.client.release();
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
