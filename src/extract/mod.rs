//! Structured Text Extractor.
//!
//! Recovers named fields from free-form model output that was asked to follow
//! a loose structure: `Label:` markers, `<tag>…</tag>` pairs, or both. The
//! extractor never fails; anything it cannot find comes back as an empty
//! string and the caller decides whether that matters.

pub mod marker;
pub mod tagged;
pub mod text;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use marker::{MarkerIndex, field_span};
use regex::Regex;
use tagged::{clean_tagged_block, first_block, has_open_tag, tag_pattern};

pub use tagged::strip_inline_tags;
pub use text::{
    dedupe_sentences, dedupe_spans, flatten_lines, merge_short_lines, number_lines,
    remove_commentary_lines, split_sentences, strip_enumeration, strip_label,
};

pub const DEFAULT_MERGE_THRESHOLD: usize = 100;

/// Which strategy to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Tag pairs when an opening tag is present, markers otherwise.
    #[default]
    Auto,
    Marker,
    TagPair,
}

/// One named field and how to find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldSpec {
    pub name: String,
    /// Alternative start markers, matched case-insensitively.
    #[serde(default)]
    pub markers: Vec<String>,
    /// Tag name for tag-pair extraction, without angle brackets.
    #[serde(default)]
    pub tag: Option<String>,
    /// Collapse the marker span into one line.
    #[serde(default)]
    pub join_lines: bool,
}

impl FieldSpec {
    pub fn marked(name: &str, markers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            markers: markers.iter().map(|m| m.to_string()).collect(),
            tag: None,
            join_lines: false,
        }
    }

    pub fn tagged(name: &str, tag: &str) -> Self {
        Self {
            name: name.to_string(),
            markers: vec![],
            tag: Some(tag.to_string()),
            join_lines: false,
        }
    }

    pub fn joined(mut self) -> Self {
        self.join_lines = true;
        self
    }
}

fn default_threshold() -> usize {
    DEFAULT_MERGE_THRESHOLD
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractorConfig {
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub strategy: Strategy,
    /// Paragraph size limit, in characters, for cleaned tag content.
    #[serde(default = "default_threshold")]
    pub merge_threshold: usize,
    /// Run tag content through enumeration/label cleanup and line merging.
    #[serde(default = "default_true")]
    pub clean_tagged: bool,
}

impl ExtractorConfig {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            strategy: Strategy::Auto,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            clean_tagged: true,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_merge_threshold(mut self, threshold: usize) -> Self {
        self.merge_threshold = threshold;
        self
    }

    pub fn with_clean_tagged(mut self, clean: bool) -> Self {
        self.clean_tagged = clean;
        self
    }
}

/// Extracted fields in declaration order. Unknown names read as "".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Extraction {
    fields: Vec<(String, String)>,
    /// Strategy that produced the values; `None` when nothing matched.
    applied: Option<Strategy>,
}

impl Extraction {
    fn empty(specs: &[FieldSpec]) -> Self {
        Self {
            fields: specs.iter().map(|s| (s.name.clone(), String::new())).collect(),
            applied: None,
        }
    }

    pub fn get(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn applied(&self) -> Option<Strategy> {
        self.applied
    }

    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn into_values(self) -> Vec<String> {
        self.fields.into_iter().map(|(_, v)| v).collect()
    }
}

/// Compiled extractor. Build once, reuse for every model response.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractorConfig,
    markers: Option<MarkerIndex>,
    tags: Vec<Option<Regex>>,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let markers = MarkerIndex::build(&config.fields);
        let tags = config
            .fields
            .iter()
            .map(|f| f.tag.as_deref().and_then(tag_pattern))
            .collect();
        Self {
            config,
            markers,
            tags,
        }
    }

    /// `**Positive Prompt:**` / `**Negative Prompt:**` sections; the negative
    /// section is flattened onto one line.
    pub fn prompt_pair() -> Self {
        Self::new(
            ExtractorConfig::new(vec![
                FieldSpec::marked("positive", &["**positive prompt:**", "positive prompt:"]),
                FieldSpec::marked("negative", &["**negative prompt:**", "negative prompt:"]).joined(),
            ])
            .with_strategy(Strategy::Marker),
        )
    }

    /// Plain `Prompt:` / `Negative Prompt:` sections as produced by the SDXL
    /// prompt presets.
    pub fn sd_prompt_pair() -> Self {
        Self::new(
            ExtractorConfig::new(vec![
                FieldSpec::marked("positive", &["prompt:"]),
                FieldSpec::marked("negative", &["negative prompt:"]),
            ])
            .with_strategy(Strategy::Marker),
        )
    }

    /// The `<output>…</output>` block of a structured-prompt answer, cleaned.
    pub fn tagged_output() -> Self {
        Self::new(
            ExtractorConfig::new(vec![FieldSpec::tagged("output", "output")])
                .with_strategy(Strategy::TagPair),
        )
    }

    /// `clip-L:` keywords and `clip-T5:` description, each on one line.
    pub fn clip_sections() -> Self {
        Self::new(
            ExtractorConfig::new(vec![
                FieldSpec::marked("clip_l", &["clip-L:"]).joined(),
                FieldSpec::marked("clip_t5", &["clip-T5:"]).joined(),
            ])
            .with_strategy(Strategy::Marker),
        )
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn extract(&self, text: &str) -> Extraction {
        let result = match self.config.strategy {
            Strategy::Marker => self.by_markers(text),
            Strategy::TagPair => self.by_tags(text),
            Strategy::Auto => {
                if self.tags_present(text) {
                    let tagged = self.by_tags(text);
                    if tagged.is_empty() {
                        self.by_markers(text)
                    } else {
                        tagged
                    }
                } else {
                    self.by_markers(text)
                }
            }
        };
        debug!(
            strategy = ?result.applied,
            fields = self.config.fields.len(),
            "extraction finished"
        );
        result
    }

    fn tags_present(&self, text: &str) -> bool {
        self.config
            .fields
            .iter()
            .filter_map(|f| f.tag.as_deref())
            .any(|tag| has_open_tag(text, tag))
    }

    fn by_markers(&self, text: &str) -> Extraction {
        let mut out = Extraction::empty(&self.config.fields);
        let Some(index) = &self.markers else {
            return out;
        };
        let hits = index.hits(text);
        if hits.is_empty() {
            return out;
        }

        for (i, spec) in self.config.fields.iter().enumerate() {
            if let Some(span) = field_span(text, &hits, i) {
                let value = if spec.join_lines {
                    flatten_lines(&span)
                } else {
                    span.trim().to_string()
                };
                out.fields[i].1 = value;
            }
        }
        out.applied = Some(Strategy::Marker);
        out
    }

    fn by_tags(&self, text: &str) -> Extraction {
        let mut out = Extraction::empty(&self.config.fields);
        let mut matched = false;

        for (i, re) in self.tags.iter().enumerate() {
            let Some(block) = re.as_ref().and_then(|re| first_block(re, text)) else {
                continue;
            };
            matched = true;
            out.fields[i].1 = if self.config.clean_tagged {
                clean_tagged_block(block, self.config.merge_threshold)
            } else {
                block.trim().to_string()
            };
        }
        if matched {
            out.applied = Some(Strategy::TagPair);
        }
        out
    }
}
