use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{InvokerSlot, cached_invoker, image_base64, read_inputs};
use crate::history::ChatMessage;
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeOut, NodeType, OutputSlot};
use crate::provider::{GenerationParams, InvokeRequest, Provider};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VisionTask {
    #[default]
    General,
    Ocr,
    VisualReasoning,
    ChineseUnderstanding,
    PromptGeneration,
}

impl VisionTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisionTask::General => "general",
            VisionTask::Ocr => "ocr",
            VisionTask::VisualReasoning => "visual_reasoning",
            VisionTask::ChineseUnderstanding => "chinese_understanding",
            VisionTask::PromptGeneration => "prompt_generation",
        }
    }

    /// Instruction placed before the caller's own prompt.
    pub fn lead(&self) -> &'static str {
        match self {
            VisionTask::General => "分析这张图片并提供详细描述。",
            VisionTask::Ocr => "识别并提取图片中的所有文字。",
            VisionTask::VisualReasoning => "分析图片并回答以下问题：",
            VisionTask::ChineseUnderstanding => "分析图片并用流畅的中文描述内容。",
            VisionTask::PromptGeneration => "分析这张图片并生成一个详细的文本到图像提示。不要加前缀！",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QwenCaptionInputs {
    /// Base64 image, bare or as a `data:` URL.
    pub image: String,
    pub prompt: String,
    /// `qwen-vl-max-0809`, `qwen-vl-max`, `qwen-vl-plus` or `qwen-vl`.
    pub model: String,
    pub task: VisionTask,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub temperature: f32,
    #[schemars(range(min = 1, max = 2048))]
    pub max_tokens: u32,
}

impl Default for QwenCaptionInputs {
    fn default() -> Self {
        Self {
            image: String::new(),
            prompt: "分析这张图片并提供详细描述。".to_string(),
            model: "qwen-vl-max-0809".to_string(),
            task: VisionTask::General,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Image analysis through DashScope's Qwen-VL models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Qwen2VLCaption {
    #[serde(skip)]
    client: InvokerSlot,
}

#[async_trait]
#[typetag::serde]
impl NodeType for Qwen2VLCaption {
    fn type_name(&self) -> String {
        "Qwen2VLCaption".to_string()
    }

    fn display_name(&self) -> String {
        "通义千问VL 多功能视觉分析".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/QwenVL"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(QwenCaptionInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("result")]
    }

    #[tracing::instrument(name = "qwen2vl_caption_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: QwenCaptionInputs = read_inputs(&input)?;
        let image = image_base64(&inputs.image)?;
        let invoker = cached_invoker(&mut self.client, context, Provider::DashScope, true).await?;

        let task = inputs.task;
        let request = InvokeRequest::new(
            inputs.model,
            vec![
                ChatMessage::system(format!(
                    "You are an AI assistant specialized in {}. Analyze the image and respond accordingly.",
                    task.as_str()
                )),
                ChatMessage::user(format!("{} {}", task.lead(), inputs.prompt)),
            ],
        )
        .with_images(vec![image])
        .with_params(
            GenerationParams::default()
                .with_temperature(inputs.temperature)
                .with_max_tokens(inputs.max_tokens),
        );

        match invoker.invoke(&request).await {
            Ok(done) => Ok(NodeOut::text(done.text)),
            Err(e) => {
                warn!("qwen-vl call failed: {e}");
                let text = format!("错误: {e}");
                Err(NodeErr::with_fallback(e.into(), NodeOut::text(text)))
            }
        }
    }

    fn unload(&mut self) {
        self.client.release();
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
