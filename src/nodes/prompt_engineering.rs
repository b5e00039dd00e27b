//! Two-stage structured prompt writer.
//!
//! The first call turns a short description into a LangGPT-style structured
//! prompt; the second call runs that prompt against the original description
//! and keeps the `<output>` block of the answer.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use super::{InvokerSlot, cached_invoker, read_inputs};
use crate::extract::Extractor;
use crate::history::{ChatMessage, ConversationHistory};
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeError, NodeOut, NodeType, OutputSlot};
use crate::provider::{GenerationParams, InvokeRequest, ModelInvoker, Provider, ProviderError};

static OUTPUT_BLOCK: Lazy<Extractor> = Lazy::new(Extractor::tagged_output);

const LANGGPT_BASE: &str = include_str!("prompts/langgpt_base.md");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PromptKind {
    #[default]
    #[serde(rename = "通用")]
    General,
    #[serde(rename = "角色扮演")]
    RolePlay,
    #[serde(rename = "图像生成")]
    Image,
    #[serde(rename = "文本生成")]
    Text,
    #[serde(rename = "代码生成")]
    Code,
    #[serde(rename = "对话系统")]
    Dialogue,
    #[serde(rename = "任务分解")]
    TaskBreakdown,
    #[serde(rename = "学术写作")]
    Academic,
    #[serde(rename = "营销文案")]
    Marketing,
    #[serde(rename = "故事创作")]
    Story,
    #[serde(rename = "数据分析")]
    DataAnalysis,
    #[serde(rename = "问题解决")]
    ProblemSolving,
    #[serde(rename = "创意思考")]
    Creative,
    #[serde(rename = "教学指导")]
    Teaching,
}

impl PromptKind {
    pub fn label(&self) -> &'static str {
        match self {
            PromptKind::General => "通用",
            PromptKind::RolePlay => "角色扮演",
            PromptKind::Image => "图像生成",
            PromptKind::Text => "文本生成",
            PromptKind::Code => "代码生成",
            PromptKind::Dialogue => "对话系统",
            PromptKind::TaskBreakdown => "任务分解",
            PromptKind::Academic => "学术写作",
            PromptKind::Marketing => "营销文案",
            PromptKind::Story => "故事创作",
            PromptKind::DataAnalysis => "数据分析",
            PromptKind::ProblemSolving => "问题解决",
            PromptKind::Creative => "创意思考",
            PromptKind::Teaching => "教学指导",
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            PromptKind::General => "",
            PromptKind::RolePlay => "特别注意角色设定的细节,包括性格特征、说话方式等。使用<character></character>标签定义角色特征。",
            PromptKind::Image => "详细描述视觉元素,如构图、色彩、风格、光影等。使用<visual></visual>标签包裹关键视觉描述。考虑使用<composition></composition>, <color></color>, <style></style>等子标签。",
            PromptKind::Text => "明确指出文本的类型、结构、风格、语气和目标读者。使用<style></style>标签定义文本风格,<audience></audience>标签定义目标读者。",
            PromptKind::Code => "指定编程语言、功能需求、代码风格和性能考虑。使用<code></code>标签包裹代码示例或要求,<language></language>标签指定编程语言。",
            PromptKind::Dialogue => "定义对话的目的、语气、个性化特征和上下文理解要求。使用<dialogue></dialogue>标签模拟对话流程,<context></context>标签定义上下文信息。",
            PromptKind::TaskBreakdown => "将复杂任务分解为多个子任务或步骤。使用<step></step>标签定义每个步骤,<subtask></subtask>标签定义子任务。",
            PromptKind::Academic => "注重学术格式、引用规范和专业术语的使用。使用<citation></citation>标签标记引用,<terminology></terminology>标签定义专业术语。",
            PromptKind::Marketing => "强调吸引力、说服力和号召性用语。使用<headline></headline>标签定义标题,<cta></cta>标签定义行动号召。",
            PromptKind::Story => "关注情节发展、角色塑造和场景描述。使用<plot></plot>标签概述情节,<character></character>标签描述角色,<setting></setting>标签描述场景。",
            PromptKind::DataAnalysis => "明确数据源、分析方法和预期洞察。使用<data></data>标签描述数据集,<method></method>标签定义分析方法。",
            PromptKind::ProblemSolving => "清晰定义问题,提供背景信息,并指导思考过程。使用<problem></problem>标签描述问题,<solution></solution>标签概述解决方案。",
            PromptKind::Creative => "鼓励发散思维和创新想法。使用<idea></idea>标签标记创意点,<inspiration></inspiration>标签提供灵感来源。",
            PromptKind::Teaching => "明确学习目标、教学方法和评估标准。使用<objective></objective>标签定义学习目标,<method></method>标签描述教学方法。",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PromptLanguage {
    #[default]
    #[serde(rename = "中文")]
    Chinese,
    #[serde(rename = "英文")]
    English,
}

impl PromptLanguage {
    fn label(&self) -> &'static str {
        match self {
            PromptLanguage::Chinese => "中文",
            PromptLanguage::English => "英文",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OutputFormat {
    #[serde(rename = "纯文本")]
    PlainText,
    #[default]
    Markdown,
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "JSON")]
    Json,
}

impl OutputFormat {
    /// Plain text and Markdown pass through; JSON that does not parse is
    /// kept as is.
    pub fn apply(&self, text: &str) -> String {
        match self {
            OutputFormat::PlainText | OutputFormat::Markdown => text.to_string(),
            OutputFormat::Html => format!("<div>{}</div>", text.replace('\n', "<br>")),
            OutputFormat::Json => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string()),
                Err(_) => {
                    warn!("structured prompt is not valid JSON, keeping raw text");
                    text.to_string()
                }
            },
        }
    }
}

pub fn system_prompt(kind: PromptKind, language: PromptLanguage) -> String {
    let mut prompt = LANGGPT_BASE.replace("{language}", language.label());
    prompt.push_str(kind.guidance());
    prompt
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PromptEngineeringInputs {
    pub input_text: String,
    pub prompt_type: PromptKind,
    pub model_name: String,
    /// OpenAI-compatible endpoint used when `is_local` is off.
    pub base_url: String,
    /// Falls back to the `OPENAI_API_KEY` secret when blank.
    pub api_key: String,
    pub language: PromptLanguage,
    pub output_format: OutputFormat,
    /// Run both stages on the local Ollama server.
    pub is_local: bool,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub temperature: f32,
    #[schemars(range(min = 100, max = 4096))]
    pub max_tokens: u32,
}

impl Default for PromptEngineeringInputs {
    fn default() -> Self {
        Self {
            input_text: String::new(),
            prompt_type: PromptKind::General,
            model_name: "llama2".to_string(),
            base_url: Provider::OpenAi.default_base_url().to_string(),
            api_key: String::new(),
            language: PromptLanguage::Chinese,
            output_format: OutputFormat::Markdown,
            is_local: false,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptEngineeringNode {
    #[serde(skip)]
    local: InvokerSlot,
}

struct Stage<'a> {
    invoker: Arc<dyn ModelInvoker>,
    inputs: &'a PromptEngineeringInputs,
}

impl Stage<'_> {
    async fn ask(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let messages = if self.inputs.is_local {
            vec![ChatMessage::user(format!("{system}\n\n用户: {user}\n\n助手:"))]
        } else {
            vec![ChatMessage::system(system), ChatMessage::user(user)]
        };
        let request = InvokeRequest::new(&self.inputs.model_name, messages).with_params(
            GenerationParams::default()
                .with_temperature(self.inputs.temperature)
                .with_max_tokens(self.inputs.max_tokens),
        );
        Ok(self.invoker.invoke(&request).await?.text)
    }
}

impl PromptEngineeringNode {
    async fn resolve(
        &mut self,
        inputs: &PromptEngineeringInputs,
        context: &NodeContext,
    ) -> Result<Arc<dyn ModelInvoker>, NodeError> {
        if inputs.is_local {
            return cached_invoker(&mut self.local, context, Provider::Ollama, false).await;
        }
        let key = match inputs.api_key.trim() {
            "" => context.api_key(Provider::OpenAi).await?,
            key => Some(key.to_string()),
        };
        context.invoker_at(Provider::OpenAi, inputs.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
#[typetag::serde]
impl NodeType for PromptEngineeringNode {
    fn type_name(&self) -> String {
        "PromptEngineeringNode".to_string()
    }

    fn display_name(&self) -> String {
        "提示词工程节点".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/提示词工程"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(PromptEngineeringInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![
            OutputSlot::text("response"),
            OutputSlot::text("history"),
            OutputSlot::text("prompt"),
        ]
    }

    #[tracing::instrument(name = "prompt_engineering_node_process", skip(self, context))]
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: PromptEngineeringInputs = read_inputs(&input)?;
        let stage = Stage {
            invoker: self.resolve(&inputs, context).await?,
            inputs: &inputs,
        };

        let system = system_prompt(inputs.prompt_type, inputs.language);
        let request = format!(
            "请根据以下输入生成一个结构化的{}提示词:\n{}",
            inputs.prompt_type.label(),
            inputs.input_text
        );

        let run = async {
            let structured = inputs.output_format.apply(&stage.ask(&system, &request).await?);
            let answer = stage.ask(&structured, &inputs.input_text).await?;
            Ok::<_, ProviderError>((structured, answer))
        };
        let (structured, answer) = match run.await {
            Ok(done) => done,
            Err(e) => {
                error!("prompt generation failed: {e}");
                let text = format!("错误: 生成提示词失败 - {e}");
                return Err(NodeErr::with_fallback(e.into(), NodeOut::texts([text.as_str(), "", ""])));
            }
        };

        let found = OUTPUT_BLOCK.extract(&answer);
        let content = found.get("output").to_string();
        if content.is_empty() {
            warn!("no <output> block in final answer");
        }

        let mut history = ConversationHistory::new();
        history.ensure_system(&structured);
        history.record_turn(&inputs.input_text, &content);
        Ok(NodeOut::texts([structured, history.to_markdown(), content]))
    }

    fn unload(&mut self) {
        self.local.release();
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
    use crate::secret::{EmptySecretsManager, MemorySecretsManager, SecretsManager};
    use serde_json::json;

    fn context(secrets: SecretsManager, provider: Provider, script: &Arc<ScriptedInvoker>) -> NodeContext {
        NodeContext::new(ConfigManager(MapConfigManager::new()), secrets).with_invoker(provider, script.clone())
    }

    #[test]
    fn system_prompt_names_language_and_type() {
        let zh = system_prompt(PromptKind::Image, PromptLanguage::Chinese);
        assert!(zh.contains("详细的中文提示词"));
        assert!(zh.ends_with("等子标签。"));
        let en = system_prompt(PromptKind::General, PromptLanguage::English);
        assert!(en.contains("详细的英文提示词"));
        assert!(!en.contains("{language}"));
    }

    #[test]
    fn output_formats() {
        assert_eq!(OutputFormat::Html.apply("a\nb"), "<div>a<br>b</div>");
        assert_eq!(OutputFormat::Json.apply("{\"a\":1}"), "{\n  \"a\": 1\n}");
        assert_eq!(OutputFormat::Json.apply("not json"), "not json");
        assert_eq!(OutputFormat::PlainText.apply("x\ny"), "x\ny");
    }

    #[tokio::test]
    async fn api_mode_runs_two_stages() {
        let script = ScriptedInvoker::replying(&[
            "# Role\npoet",
            "draft\n<output>\nRole: poet\nTask: write a haiku\n</output>",
        ]);
        let secrets = SecretsManager(EmptySecretsManager::new());
        let mut ctx = context(secrets, Provider::OpenAi, &script);
        let mut node = PromptEngineeringNode::default();

        let out = node
            .process(
                Message::inputs(json!({"input_text": "秋天的诗", "api_key": "sk-test", "model_name": "gpt-4o"})),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.text_at(0), "# Role\npoet");
        assert_eq!(out.text_at(2), "poet write a haiku");
        assert!(out.text_at(1).contains("### User\n\n秋天的诗"));

        let requests = script.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].last_user(), "请根据以下输入生成一个结构化的通用提示词:\n秋天的诗");
        assert_eq!(requests[1].system_prompt(), Some("# Role\npoet"));
        assert_eq!(requests[1].last_user(), "秋天的诗");
    }

    #[tokio::test]
    async fn local_mode_uses_single_turn_template() {
        let script = ScriptedInvoker::replying(&["structured", "no tags here"]);
        let secrets = SecretsManager(EmptySecretsManager::new());
        let mut ctx = context(secrets, Provider::Ollama, &script);
        let mut node = PromptEngineeringNode::default();

        let out = node
            .process(Message::inputs(json!({"input_text": "hi", "is_local": true})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.text_at(2), "");
        let last = script.last_request().unwrap();
        assert_eq!(last.messages.len(), 1);
        assert_eq!(last.last_user(), "structured\n\n用户: hi\n\n助手:");
    }

    #[tokio::test]
    async fn failure_fills_error_tuple() {
        let script = ScriptedInvoker::new();
        let secrets = SecretsManager(MemorySecretsManager::with(&[("OPENAI_API_KEY", "sk")]));
        let mut ctx = context(secrets, Provider::OpenAi, &script);
        let mut node = PromptEngineeringNode::default();

        let err = node
            .process(Message::inputs(json!({"input_text": "x"})), &mut ctx)
            .await
            .unwrap_err();
        let fallback = err.fallback().unwrap();
        assert_eq!(fallback.text_at(0), "错误: 生成提示词失败 - no scripted reply left");
        assert_eq!(fallback.text_at(1), "");
        assert_eq!(fallback.text_at(2), "");
    }

    #[tokio::test]
    async fn blank_key_without_secret_is_missing_key() {
        let mut ctx = NodeContext::dummy();
        let err = PromptEngineeringNode::default()
            .process(Message::inputs(json!({"input_text": "x"})), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err.error(), NodeError::MissingKey(k) if k == "OPENAI_API_KEY"));
        assert!(err.fallback().is_none());
    }
}
