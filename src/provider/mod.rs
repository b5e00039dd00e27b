//! Model invocation as an opaque capability.
//!
//! Nodes build an [`InvokeRequest`] and hand it to whatever [`ModelInvoker`]
//! the context resolves for their [`Provider`]: a hosted API client, the local
//! Ollama server, or a scripted stand-in under test.

pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod retry;
pub mod scripted;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::history::ChatMessage;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiCompatible;
pub use retry::{RetryPolicy, Retrying};
pub use scripted::ScriptedInvoker;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: Provider,
        status: u16,
        body: String,
    },
    #[error("{provider} request failed: {message}")]
    Transport { provider: Provider, message: String },
    #[error("{provider} response malformed: {message}")]
    Malformed { provider: Provider, message: String },
    #[error("{0} not set or invalid")]
    MissingKey(String),
    #[error("no scripted reply left")]
    Exhausted,
}

/// The hosted and local backends the nodes talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    DeepSeek,
    Groq,
    Moonshot,
    OpenAi,
    DashScope,
    Gemini,
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 7] = [
        Provider::DeepSeek,
        Provider::Groq,
        Provider::Moonshot,
        Provider::OpenAi,
        Provider::DashScope,
        Provider::Gemini,
        Provider::Ollama,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek",
            Provider::Groq => "groq",
            Provider::Moonshot => "moonshot",
            Provider::OpenAi => "openai",
            Provider::DashScope => "dashscope",
            Provider::Gemini => "gemini",
            Provider::Ollama => "ollama",
        }
    }

    /// Secret holding the API key; the local server needs none.
    pub fn key_name(&self) -> Option<&'static str> {
        match self {
            Provider::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::Moonshot => Some("MOONSHOT_API_KEY"),
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::DashScope => Some("DASHSCOPE_API_KEY"),
            Provider::Gemini => Some("GEMINI_API_KEY"),
            Provider::Ollama => None,
        }
    }

    /// Config key that overrides the endpoint.
    pub fn base_url_key(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "DEEPSEEK_BASE_URL",
            Provider::Groq => "GROQ_BASE_URL",
            Provider::Moonshot => "MOONSHOT_BASE_URL",
            Provider::OpenAi => "OPENAI_BASE_URL",
            Provider::DashScope => "DASHSCOPE_BASE_URL",
            Provider::Gemini => "GEMINI_BASE_URL",
            Provider::Ollama => crate::config::OLLAMA_API_URL,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Moonshot => "https://api.moonshot.cn/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::DashScope => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Ollama => crate::config::DEFAULT_OLLAMA_URL,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek-chat",
            Provider::Groq => "llama3-70b-8192",
            Provider::Moonshot => "moonshot-v1-8k",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::DashScope => "qwen-vl-plus",
            Provider::Gemini => "gemini-1.5-flash",
            Provider::Ollama => "llama3",
        }
    }

    /// Build the real client for this provider.
    pub fn client(&self, base_url: &str, api_key: Option<String>) -> Result<Arc<dyn ModelInvoker>, ProviderError> {
        let key = || {
            api_key
                .clone()
                .ok_or_else(|| ProviderError::MissingKey(self.key_name().unwrap_or("API key").to_string()))
        };
        let url = Url::parse(base_url.trim()).map_err(|e| ProviderError::Transport {
            provider: *self,
            message: format!("invalid base url `{base_url}`: {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProviderError::Transport {
                provider: *self,
                message: format!("base url `{base_url}` must be http or https"),
            });
        }
        Ok(match self {
            Provider::Ollama => Arc::new(OllamaClient::new(base_url)?),
            Provider::Gemini => Arc::new(GeminiClient::new(base_url, key()?)?),
            other => Arc::new(OpenAiCompatible::new(*other, base_url, key()?)?),
        })
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| format!("unknown provider `{s}`"))
    }
}

/// How long the local server keeps a model loaded after a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum KeepAlive {
    /// Unload as soon as the answer is produced.
    #[default]
    #[serde(rename = "0")]
    Unload,
    #[serde(rename = "60m")]
    SixtyMinutes,
}

/// Sampling knobs. Unset fields are left to the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub seed: Option<i64>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub tfs_z: Option<f32>,
    pub keep_alive: Option<KeepAlive>,
}

impl GenerationParams {
    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Base64-encoded images attached to the last user message.
    pub images: Vec<String>,
    pub params: GenerationParams,
    /// Opaque continuation state for the local server.
    pub context: Option<Vec<i64>>,
}

impl InvokeRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_context(mut self, context: Option<Vec<i64>>) -> Self {
        self.context = context;
        self
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == crate::history::ChatRole::System)
            .map(|m| m.content.as_str())
    }

    /// Content of the last user message, or "" when there is none.
    pub fn last_user(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::history::ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub context: Option<Vec<i64>>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: None,
        }
    }
}

#[async_trait]
pub trait ModelInvoker: Send + Sync + fmt::Debug {
    async fn invoke(&self, request: &InvokeRequest) -> Result<Completion, ProviderError>;

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChatMessage;

    #[test]
    fn providers_parse_by_name() {
        for p in Provider::ALL {
            assert_eq!(p.name().parse::<Provider>(), Ok(p));
        }
        assert!("anthropic".parse::<Provider>().is_err());
    }

    #[test]
    fn only_local_server_needs_no_key() {
        let keyless: Vec<_> = Provider::ALL.into_iter().filter(|p| p.key_name().is_none()).collect();
        assert_eq!(keyless, vec![Provider::Ollama]);
    }

    #[test]
    fn hosted_client_without_key_is_rejected() {
        let err = Provider::Groq
            .client(Provider::Groq.default_base_url(), None)
            .unwrap_err();
        assert_eq!(err.to_string(), "GROQ_API_KEY not set or invalid");
    }

    #[test]
    fn base_url_must_be_http() {
        let key = Some("k".to_string());
        assert!(Provider::Groq.client("not a url", key.clone()).is_err());
        let err = Provider::Groq.client("ftp://example.com", key.clone()).unwrap_err();
        assert!(err.to_string().contains("must be http or https"));
        assert!(Provider::Groq.client("https://api.groq.com/openai/v1/", key).is_ok());
    }

    #[test]
    fn request_helpers_find_roles() {
        let req = InvokeRequest::new(
            "m",
            vec![
                ChatMessage::system("sys"),
                ChatMessage::user("first"),
                ChatMessage::assistant("reply"),
                ChatMessage::user("second"),
            ],
        );
        assert_eq!(req.system_prompt(), Some("sys"));
        assert_eq!(req.last_user(), "second");
        assert_eq!(InvokeRequest::default().last_user(), "");
    }
}
