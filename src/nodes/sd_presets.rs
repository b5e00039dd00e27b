//! Text-to-image prompt presets shared by the prompt-writing nodes.

use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::extract::Extractor;

static SD_PAIR: Lazy<Extractor> = Lazy::new(Extractor::sd_prompt_pair);

const KOLORS_NEGATIVE: &str = "低质量，坏手，水印";
const FLUX_NEGATIVE: &str = "low quality, bad hands, watermark, blurry, distorted, deformed, disfigured, mutated, unnatural, artificial, fake, inaccurate, inconsistent, out of focus, poorly rendered, amateur, amateurish";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SdPromptType {
    #[default]
    Sdxl,
    Kolors,
    Flux,
}

impl SdPromptType {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            SdPromptType::Sdxl => include_str!("prompts/sd_sdxl.md").trim(),
            SdPromptType::Kolors => include_str!("prompts/sd_kolors.md").trim(),
            SdPromptType::Flux => include_str!("prompts/sd_flux.md").trim(),
        }
    }

    fn target_name(&self) -> &'static str {
        match self {
            SdPromptType::Sdxl => "Stable Diffusion",
            SdPromptType::Kolors => "kolors",
            SdPromptType::Flux => "flux",
        }
    }

    pub fn user_prompt(&self, theme: &str) -> String {
        format!("根据以下主题生成{}提示词：{}", self.target_name(), theme)
    }

    /// Positive and negative prompt from a model answer. SDXL answers carry
    /// both sections; the other presets get a fixed negative prompt.
    pub fn split(&self, response: &str) -> (String, String) {
        match self {
            SdPromptType::Sdxl => {
                if response.contains("Prompt:") && response.contains("Negative Prompt:") {
                    let found = SD_PAIR.extract(response);
                    (found.get("positive").to_string(), found.get("negative").to_string())
                } else {
                    (response.to_string(), String::new())
                }
            }
            SdPromptType::Kolors => (response.trim().to_string(), KOLORS_NEGATIVE.to_string()),
            SdPromptType::Flux => (response.trim().to_string(), FLUX_NEGATIVE.to_string()),
        }
    }
}
