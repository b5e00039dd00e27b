use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{Completion, InvokeRequest, ModelInvoker, ProviderError};
use crate::config::ConfigManager;

/// Fixed attempt count with clamped exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub multiplier: f64,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            multiplier: 1.0,
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            multiplier: 0.0,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    /// Read `RETRY_ATTEMPTS`, `RETRY_MULTIPLIER`, `RETRY_MIN_SECS` and
    /// `RETRY_MAX_SECS`, keeping defaults for anything absent or malformed.
    pub async fn from_config(config: &ConfigManager) -> Self {
        let d = Self::default();
        let min_wait = wait_from_config(config, "RETRY_MIN_SECS", d.min_wait).await;
        let max_wait = wait_from_config(config, "RETRY_MAX_SECS", d.max_wait).await;
        let multiplier = config.get_parsed("RETRY_MULTIPLIER", d.multiplier).await;
        Self {
            attempts: config.get_parsed("RETRY_ATTEMPTS", d.attempts).await.max(1),
            multiplier: if multiplier.is_finite() { multiplier.max(0.0) } else { d.multiplier },
            min_wait,
            max_wait: max_wait.max(min_wait),
        }
    }

    /// Wait after the `attempt`-th failure (1-based):
    /// `clamp(multiplier * 2^(attempt-1), min, max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.saturating_sub(1).min(62) as i32);
        let secs = (self.multiplier * exp).clamp(self.min_wait.as_secs_f64(), self.max_wait.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Longest wait a config value may ask for.
const MAX_CONFIGURED_WAIT: Duration = Duration::from_secs(3600);

async fn wait_from_config(config: &ConfigManager, key: &str, default: Duration) -> Duration {
    let secs = config.get_parsed(key, default.as_secs_f64()).await;
    match Duration::try_from_secs_f64(secs) {
        Ok(wait) if wait <= MAX_CONFIGURED_WAIT => wait,
        _ => {
            warn!(key, value = secs, "retry wait out of range, using {:?}", default);
            default
        }
    }
}

/// Wraps an invoker so only the call itself is retried.
#[derive(Debug, Clone)]
pub struct Retrying {
    inner: Arc<dyn ModelInvoker>,
    policy: RetryPolicy,
}

impl Retrying {
    pub fn new(inner: Arc<dyn ModelInvoker>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ModelInvoker for Retrying {
    async fn invoke(&self, request: &InvokeRequest) -> Result<Completion, ProviderError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.invoke(request).await {
                Ok(done) => return Ok(done),
                Err(e @ ProviderError::MissingKey(_)) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let wait = self.policy.delay(attempt);
                    warn!(attempt, attempts, error = %e, "model call failed, retrying in {:?}", wait);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfigManager;
    use crate::history::ChatMessage;
    use crate::provider::{Provider, ScriptedInvoker};

    fn transport() -> ProviderError {
        ProviderError::Transport {
            provider: Provider::Gemini,
            message: "reset".into(),
        }
    }

    #[test]
    fn default_backoff_is_clamped_between_bounds() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(1), Duration::from_secs(4));
        assert_eq!(p.delay(3), Duration::from_secs(4));
        assert_eq!(p.delay(4), Duration::from_secs(8));
        assert_eq!(p.delay(5), Duration::from_secs(10));
        assert_eq!(p.delay(60), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn policy_reads_overrides_from_config() {
        let config = ConfigManager(MapConfigManager::with(&[
            ("RETRY_ATTEMPTS", "5"),
            ("RETRY_MIN_SECS", "1"),
            ("RETRY_MAX_SECS", "junk"),
        ]));
        let p = RetryPolicy::from_config(&config).await;
        assert_eq!(p.attempts, 5);
        assert_eq!(p.min_wait, Duration::from_secs(1));
        assert_eq!(p.max_wait, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn unrepresentable_waits_fall_back_to_defaults() {
        let config = ConfigManager(MapConfigManager::with(&[
            ("RETRY_MIN_SECS", "inf"),
            ("RETRY_MAX_SECS", "1e300"),
            ("RETRY_MULTIPLIER", "NaN"),
        ]));
        let p = RetryPolicy::from_config(&config).await;
        assert_eq!(p, RetryPolicy::default());

        let config = ConfigManager(MapConfigManager::with(&[("RETRY_MIN_SECS", "-2"), ("RETRY_MAX_SECS", "2")]));
        let p = RetryPolicy::from_config(&config).await;
        assert_eq!(p.min_wait, Duration::from_secs(4));
        assert_eq!(p.max_wait, Duration::from_secs(4));
        assert_eq!(p.delay(9), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let script = ScriptedInvoker::new();
        script.push_err(transport());
        script.push_err(transport());
        script.push_text("ok");
        let retrying = Retrying::new(script.clone(), RetryPolicy::immediate(3));

        let req = InvokeRequest::new("m", vec![ChatMessage::user("hi")]);
        assert_eq!(retrying.invoke(&req).await.unwrap().text, "ok");
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let script = ScriptedInvoker::new();
        for _ in 0..5 {
            script.push_err(transport());
        }
        let retrying = Retrying::new(script.clone(), RetryPolicy::immediate(3));
        let req = InvokeRequest::new("m", vec![ChatMessage::user("hi")]);
        assert!(retrying.invoke(&req).await.is_err());
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test]
    async fn missing_key_is_not_retried() {
        let script = ScriptedInvoker::new();
        script.push_err(ProviderError::MissingKey("GEMINI_API_KEY".into()));
        script.push_text("never");
        let retrying = Retrying::new(script.clone(), RetryPolicy::immediate(3));
        let req = InvokeRequest::new("m", vec![]);
        assert!(retrying.invoke(&req).await.is_err());
        assert_eq!(script.calls(), 1);
    }
}
