//! The node catalog: LLM-wrapping nodes plus the text and timing utilities.

pub mod deepseek;
pub mod extractor;
pub mod gemini;
pub mod groq;
pub mod moonshot;
pub mod ollama;
pub mod prompt_engineering;
pub mod qwen;
pub mod sd_presets;
pub mod timing;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeError, NodeType};
use crate::provider::{ModelInvoker, Provider};
use crate::resource::ResourceSlot;

pub use deepseek::{DeepSeekChatNode, DeepSeekTranslator};
pub use extractor::{PromptExtractorNode, StructuredExtractorNode};
pub use gemini::{GeminiFluxPrompt, GeminiText, GeminiVision};
pub use groq::{GroqChatNode, SDPromptAgent};
pub use moonshot::{MoonshotMultiChatNode, MoonshotSingleChatNode};
pub use ollama::{OllamaImageToText, OllamaPromptExtractor, OllamaTextToText};
pub use prompt_engineering::PromptEngineeringNode;
pub use qwen::Qwen2VLCaption;
pub use timing::ExecutionTime;

/// Cached model handle held by a node between runs.
pub type InvokerSlot = ResourceSlot<Arc<dyn ModelInvoker>>;

/// One prototype of every shipped node.
pub fn builtin() -> Vec<Box<dyn NodeType>> {
    vec![
        Box::new(PromptExtractorNode::default()),
        Box::new(StructuredExtractorNode::default()),
        Box::new(DeepSeekChatNode::default()),
        Box::new(DeepSeekTranslator::default()),
        Box::new(GroqChatNode::default()),
        Box::new(SDPromptAgent::default()),
        Box::new(OllamaPromptExtractor::default()),
        Box::new(MoonshotSingleChatNode::default()),
        Box::new(MoonshotMultiChatNode::default()),
        Box::new(OllamaTextToText::default()),
        Box::new(OllamaImageToText::default()),
        Box::new(PromptEngineeringNode::default()),
        Box::new(GeminiText::default()),
        Box::new(GeminiVision::default()),
        Box::new(GeminiFluxPrompt::default()),
        Box::new(Qwen2VLCaption::default()),
        Box::new(ExecutionTime::default()),
    ]
}

pub(crate) fn read_inputs<T: DeserializeOwned>(input: &Message) -> Result<T, NodeErr> {
    input
        .parse::<T>()
        .map_err(|e| NodeErr::fail(NodeError::InvalidInput(e.to_string())))
}

/// The node's cached invoker for `provider`, resolving it on first use.
/// `retry` wraps a freshly resolved invoker in the context's retry policy.
pub(crate) async fn cached_invoker(
    slot: &mut InvokerSlot,
    ctx: &NodeContext,
    provider: Provider,
    retry: bool,
) -> Result<Arc<dyn ModelInvoker>, NodeError> {
    let invoker = slot
        .get_or_try_init_async(|| async {
            let inner = ctx.invoker(provider).await?;
            Ok::<_, NodeError>(if retry { ctx.retrying(inner) } else { inner })
        })
        .await?;
    Ok(invoker.clone())
}

/// `extra_model` wins unless it is blank or `none`.
pub(crate) fn pick_model(model: &str, extra_model: &str) -> String {
    let extra = extra_model.trim();
    if extra.is_empty() || extra.eq_ignore_ascii_case("none") {
        model.trim().to_string()
    } else {
        extra.to_string()
    }
}

/// Normalise an image input to bare base64. Accepts `data:` URLs and
/// embedded whitespace; rejects anything that does not decode.
pub(crate) fn image_base64(raw: &str) -> Result<String, NodeError> {
    let body = match raw.trim().split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => raw.trim(),
    };
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(NodeError::InvalidInput("image is empty".into()));
    }
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| NodeError::InvalidInput(format!("image is not valid base64: {e}")))?;
    Ok(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_has_a_unique_class() {
        let mut classes: Vec<String> = builtin().iter().map(|n| n.type_name()).collect();
        let count = classes.len();
        classes.sort();
        classes.dedup();
        assert_eq!(classes.len(), count);
        assert_eq!(count, 17);
    }

    #[test]
    fn extra_model_overrides_unless_none() {
        assert_eq!(pick_model("llama3", "none"), "llama3");
        assert_eq!(pick_model("llama3", "  "), "llama3");
        assert_eq!(pick_model("llama3", "qwen2:7b"), "qwen2:7b");
    }

    #[test]
    fn images_accept_data_urls_and_reject_garbage() {
        assert_eq!(image_base64("data:image/png;base64,QUJD\n").unwrap(), "QUJD");
        assert_eq!(image_base64(" QU JD ").unwrap(), "QUJD");
        assert!(image_base64("not base64!").is_err());
        assert!(image_base64("").is_err());
    }
}
