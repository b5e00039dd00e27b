use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, error};

use super::{Completion, InvokeRequest, ModelInvoker, Provider, ProviderError};
use crate::history::ChatRole;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Google Generative Language REST API (`models/<model>:generateContent`).
#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: String) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport {
                provider: Provider::Gemini,
                message: format!("http client: {e}"),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }
}

pub(crate) fn content_body(request: &InvokeRequest) -> Value {
    let last_user = request
        .messages
        .iter()
        .rposition(|m| m.role == ChatRole::User);

    let contents: Vec<Value> = request
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role != ChatRole::System)
        .map(|(i, m)| {
            let role = if m.role == ChatRole::Assistant { "model" } else { "user" };
            let mut parts = vec![json!({"text": m.content})];
            if Some(i) == last_user {
                parts.extend(request.images.iter().map(|b64| {
                    json!({"inline_data": {"mime_type": "image/png", "data": b64}})
                }));
            }
            json!({"role": role, "parts": parts})
        })
        .collect();

    let mut config = Map::new();
    let p = &request.params;
    if let Some(t) = p.temperature {
        config.insert("temperature".into(), json!(t));
    }
    if let Some(n) = p.max_tokens {
        config.insert("maxOutputTokens".into(), json!(n));
    }
    if let Some(v) = p.top_p {
        config.insert("topP".into(), json!(v));
    }
    if let Some(v) = p.top_k {
        config.insert("topK".into(), json!(v));
    }

    let mut body = Map::new();
    body.insert("contents".into(), Value::Array(contents));
    if let Some(system) = request.system_prompt() {
        body.insert("systemInstruction".into(), json!({"parts": [{"text": system}]}));
    }
    if !config.is_empty() {
        body.insert("generationConfig".into(), Value::Object(config));
    }
    Value::Object(body)
}

pub(crate) fn candidate_text(json: &Value) -> Result<String, ProviderError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            ProviderError::Malformed {
                provider: Provider::Gemini,
                message: reason.to_string(),
            }
        })?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .concat())
}

#[async_trait]
impl ModelInvoker for GeminiClient {
    async fn invoke(&self, request: &InvokeRequest) -> Result<Completion, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        debug!(model = %request.model, images = request.images.len(), "gemini generateContent");

        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&content_body(request))
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: Provider::Gemini,
                message: e.without_url().to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            error!(%status, "gemini rejected request");
            return Err(ProviderError::Status {
                provider: Provider::Gemini,
                status: status.as_u16(),
                body,
            });
        }
        let json: Value = resp.json().await.map_err(|e| ProviderError::Malformed {
            provider: Provider::Gemini,
            message: e.without_url().to_string(),
        })?;
        Ok(Completion::text(candidate_text(&json)?))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let resp = self
            .http
            .get(format!("{}/models", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: Provider::Gemini,
                message: e.without_url().to_string(),
            })?;
        let json: Value = resp.json().await.map_err(|e| ProviderError::Malformed {
            provider: Provider::Gemini,
            message: e.without_url().to_string(),
        })?;
        Ok(json
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(|n| n.trim_start_matches("models/").to_string())
                    .collect()
            })
            .unwrap_or_default())
    }
}
