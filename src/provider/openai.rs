use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, error};

use super::{Completion, InvokeRequest, ModelInvoker, Provider, ProviderError};
use crate::history::ChatRole;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Any `/chat/completions` endpoint: DeepSeek, Groq, Moonshot, OpenAI and the
/// DashScope compatible mode.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    provider: Provider,
    base_url: String,
    api_key: String,
    http: Client,
}

impl OpenAiCompatible {
    pub fn new(provider: Provider, base_url: &str, api_key: String) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport {
                provider,
                message: format!("http client: {e}"),
            })?;
        Ok(Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

/// Request body for a chat completion. Images ride on the last user turn as
/// `data:` URLs.
pub(crate) fn chat_body(request: &InvokeRequest) -> Value {
    let last_user = request
        .messages
        .iter()
        .rposition(|m| m.role == ChatRole::User);

    let messages: Vec<Value> = request
        .messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            if Some(i) == last_user && !request.images.is_empty() {
                let mut parts: Vec<Value> = request
                    .images
                    .iter()
                    .map(|b64| {
                        json!({
                            "type": "image_url",
                            "image_url": {"url": format!("data:image/png;base64,{b64}")}
                        })
                    })
                    .collect();
                parts.push(json!({"type": "text", "text": m.content}));
                json!({"role": m.role.as_str(), "content": parts})
            } else {
                json!({"role": m.role.as_str(), "content": m.content})
            }
        })
        .collect();

    let mut body = Map::new();
    body.insert("model".into(), json!(request.model));
    body.insert("messages".into(), Value::Array(messages));
    body.insert("stream".into(), json!(false));

    let p = &request.params;
    let optional = [
        ("temperature", p.temperature.map(|v| json!(v))),
        ("max_tokens", p.max_tokens.map(|v| json!(v))),
        ("top_p", p.top_p.map(|v| json!(v))),
        ("seed", p.seed.map(|v| json!(v))),
        ("presence_penalty", p.presence_penalty.map(|v| json!(v))),
        ("frequency_penalty", p.frequency_penalty.map(|v| json!(v))),
    ];
    for (key, value) in optional {
        if let Some(v) = value {
            body.insert(key.into(), v);
        }
    }
    Value::Object(body)
}

/// Pull the assistant text out of a completion response.
pub(crate) fn completion_text(provider: Provider, json: &Value) -> Result<String, ProviderError> {
    match json.pointer("/choices/0/message/content") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Array(parts)) => Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")),
        _ => Err(ProviderError::Malformed {
            provider,
            message: "response missing choices[0].message.content".into(),
        }),
    }
}

#[async_trait]
impl ModelInvoker for OpenAiCompatible {
    async fn invoke(&self, request: &InvokeRequest) -> Result<Completion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(provider = %self.provider, model = %request.model, "chat completion");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&chat_body(request))
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: self.provider,
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            error!(provider = %self.provider, %status, "chat completion rejected");
            return Err(ProviderError::Status {
                provider: self.provider,
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp.json().await.map_err(|e| ProviderError::Malformed {
            provider: self.provider,
            message: e.to_string(),
        })?;
        Ok(Completion::text(completion_text(self.provider, &json)?))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let resp = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: self.provider,
                message: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: self.provider,
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let json: Value = resp.json().await.map_err(|e| ProviderError::Malformed {
            provider: self.provider,
            message: e.to_string(),
        })?;
        Ok(json
            .get("data")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChatMessage;
    use crate::provider::GenerationParams;

    #[test]
    fn body_carries_only_set_params() {
        let req = InvokeRequest::new("deepseek-chat", vec![ChatMessage::system("s"), ChatMessage::user("u")])
            .with_params(GenerationParams::default().with_temperature(0.3).with_max_tokens(1000));
        let body = chat_body(&req);
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["stream"], false);
        assert_eq!(body["max_tokens"], 1000);
        assert!(body.get("top_p").is_none());
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "u"}));
    }

    #[test]
    fn images_attach_to_last_user_turn() {
        let req = InvokeRequest::new(
            "qwen-vl-plus",
            vec![ChatMessage::system("s"), ChatMessage::user("describe")],
        )
        .with_images(vec!["QUJD".into()]);
        let body = chat_body(&req);
        let content = &body["messages"][1]["content"];
        assert_eq!(content[0]["image_url"]["url"], "data:image/png;base64,QUJD");
        assert_eq!(content[1], json!({"type": "text", "text": "describe"}));
        assert_eq!(body["messages"][0]["content"], "s");
    }

    #[test]
    fn completion_text_handles_strings_and_parts() {
        let plain = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(completion_text(Provider::Groq, &plain).unwrap(), "hi");

        let parts = json!({"choices": [{"message": {"content": [{"text": "a"}, {"text": "b"}]}}]});
        assert_eq!(completion_text(Provider::Groq, &parts).unwrap(), "a\nb");

        let err = completion_text(Provider::Groq, &json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }
}
