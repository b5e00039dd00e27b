use async_trait::async_trait;
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::read_inputs;
use crate::extract::{DEFAULT_MERGE_THRESHOLD, Extractor, ExtractorConfig, FieldSpec, Strategy};
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeOut, NodeType, OutputSlot};

static PROMPT_PAIR: Lazy<Extractor> = Lazy::new(Extractor::prompt_pair);

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PromptExtractorInputs {
    /// Model output carrying `**Positive Prompt:**` / `**Negative Prompt:**`.
    pub input_text: String,
}

/// Splits a model answer into positive and negative prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptExtractorNode;

#[async_trait]
#[typetag::serde]
impl NodeType for PromptExtractorNode {
    fn type_name(&self) -> String {
        "PromptExtractorNode".to_string()
    }

    fn display_name(&self) -> String {
        "Prompt Extractor".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/prompt_utils"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(PromptExtractorInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("positive_prompt"), OutputSlot::text("negative_prompt")]
    }

    #[tracing::instrument(name = "prompt_extractor_node_process", skip(self, _context))]
    async fn process(&mut self, input: Message, _context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: PromptExtractorInputs = read_inputs(&input)?;
        let found = PROMPT_PAIR.extract(&inputs.input_text);
        Ok(NodeOut::texts([found.get("positive"), found.get("negative")]))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StructuredExtractorInputs {
    pub text: String,
    /// Start markers of the wanted field, e.g. `Prompt:`.
    pub markers: Vec<String>,
    /// Markers that end the field without being part of it.
    pub stop_markers: Vec<String>,
    /// Tag name for `<tag>…</tag>` extraction.
    pub tag: String,
    pub strategy: Strategy,
    #[schemars(range(min = 1, max = 100000))]
    pub merge_threshold: usize,
    /// Normalise tagged content into merged paragraphs.
    pub clean_tagged: bool,
    /// Collapse a marker span onto one line.
    pub join_lines: bool,
}

impl Default for StructuredExtractorInputs {
    fn default() -> Self {
        Self {
            text: String::new(),
            markers: Vec::new(),
            stop_markers: Vec::new(),
            tag: String::new(),
            strategy: Strategy::Auto,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            clean_tagged: true,
            join_lines: false,
        }
    }
}

impl StructuredExtractorInputs {
    fn extractor(&self) -> Extractor {
        let refs = |v: &[String]| -> Vec<String> {
            v.iter().map(|m| m.trim().to_string()).filter(|m| !m.is_empty()).collect()
        };
        let mut field = FieldSpec {
            name: "output".to_string(),
            markers: refs(&self.markers),
            tag: Some(self.tag.trim().to_string()).filter(|t| !t.is_empty()),
            join_lines: false,
        };
        if self.join_lines {
            field = field.joined();
        }
        let mut fields = vec![field];
        let stops = refs(&self.stop_markers);
        if !stops.is_empty() {
            fields.push(FieldSpec {
                name: "stop".to_string(),
                markers: stops,
                tag: None,
                join_lines: false,
            });
        }
        Extractor::new(
            ExtractorConfig::new(fields)
                .with_strategy(self.strategy)
                .with_merge_threshold(self.merge_threshold)
                .with_clean_tagged(self.clean_tagged),
        )
    }
}

/// General-purpose single-field extractor driven entirely by its inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredExtractorNode;

#[async_trait]
#[typetag::serde]
impl NodeType for StructuredExtractorNode {
    fn type_name(&self) -> String {
        "StructuredExtractorNode".to_string()
    }

    fn display_name(&self) -> String {
        "Structured Extractor".to_string()
    }

    fn category(&self) -> &'static str {
        "🌙DW/prompt_utils"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(StructuredExtractorInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("output")]
    }

    #[tracing::instrument(name = "structured_extractor_node_process", skip(self, _context))]
    async fn process(&mut self, input: Message, _context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        let inputs: StructuredExtractorInputs = read_inputs(&input)?;
        let found = inputs.extractor().extract(&inputs.text);
        Ok(NodeOut::text(found.get("output")))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
