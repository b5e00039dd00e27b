use async_trait::async_trait;
use ollama_rs::Ollama;
use ollama_rs::generation::completion::GenerationContext;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::images::Image;
use ollama_rs::generation::parameters::{KeepAlive as OllamaKeepAlive, TimeUnit};
use ollama_rs::models::ModelOptions;
use tracing::{debug, error};

use super::{Completion, GenerationParams, InvokeRequest, KeepAlive, ModelInvoker, Provider, ProviderError};

/// Local inference server, driven through `ollama-rs` with streaming off.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: Ollama,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient").field("base_url", &self.base_url).finish()
    }
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        let client = Ollama::try_new(base_url).map_err(|e| ProviderError::Transport {
            provider: Provider::Ollama,
            message: format!("invalid server url `{base_url}`: {e}"),
        })?;
        Ok(Self {
            base_url: base_url.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn clamp_i32(v: i64) -> i32 {
    i32::try_from(v).unwrap_or_else(|_| v.rem_euclid(i32::MAX as i64) as i32)
}

pub(crate) fn model_options(params: &GenerationParams) -> ModelOptions {
    let mut options = ModelOptions::default();
    if let Some(t) = params.temperature {
        options = options.temperature(t);
    }
    if let Some(seed) = params.seed {
        options = options.seed(clamp_i32(seed));
    }
    if let Some(k) = params.top_k {
        options = options.top_k(k);
    }
    if let Some(p) = params.top_p {
        options = options.top_p(p);
    }
    if let Some(n) = params.max_tokens {
        options = options.num_predict(clamp_i32(n as i64));
    }
    if let Some(z) = params.tfs_z {
        options = options.tfs_z(z);
    }
    options
}

fn keep_alive(k: KeepAlive) -> OllamaKeepAlive {
    match k {
        KeepAlive::Unload => OllamaKeepAlive::UnloadOnCompletion,
        KeepAlive::SixtyMinutes => OllamaKeepAlive::Until {
            time: 60,
            unit: TimeUnit::Minutes,
        },
    }
}

#[async_trait]
impl ModelInvoker for OllamaClient {
    async fn invoke(&self, request: &InvokeRequest) -> Result<Completion, ProviderError> {
        let mut req = GenerationRequest::new(request.model.clone(), request.last_user().to_string())
            .options(model_options(&request.params));
        if let Some(system) = request.system_prompt() {
            req = req.system(system.to_string());
        }
        if !request.images.is_empty() {
            req = req.images(request.images.iter().map(Image::from_base64).collect());
        }
        if let Some(ctx) = &request.context {
            req = req.context(GenerationContext(ctx.iter().map(|v| clamp_i32(*v)).collect()));
        }
        if let Some(k) = request.params.keep_alive {
            req = req.keep_alive(keep_alive(k));
        }

        debug!(model = %request.model, url = %self.base_url, "ollama generate");
        let resp = self.client.generate(req).await.map_err(|e| {
            error!("ollama generate failed: {e}");
            ProviderError::Transport {
                provider: Provider::Ollama,
                message: e.to_string(),
            }
        })?;

        Ok(Completion {
            text: resp.response,
            context: resp.context.map(|c| c.0.into_iter().map(i64::from).collect()),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: Provider::Ollama,
                message: e.to_string(),
            })?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_seeds_wrap_into_i32() {
        assert_eq!(clamp_i32(42), 42);
        assert!(clamp_i32(u32::MAX as i64 + 5) >= 0);
        assert_eq!(clamp_i32(-1), -1);
    }

    #[test]
    fn bad_url_is_a_transport_error() {
        let err = OllamaClient::new("not a url").unwrap_err();
        assert!(matches!(err, ProviderError::Transport { provider: Provider::Ollama, .. }));
    }

    #[tokio::test]
    async fn unreachable_server_reports_failure() {
        let client = OllamaClient::new("http://127.0.0.1:1").unwrap();
        let req = InvokeRequest::new("llama3", vec![crate::history::ChatMessage::user("hi")]);
        assert!(client.invoke(&req).await.is_err());
    }
}
