use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Completion, InvokeRequest, ModelInvoker, ProviderError};

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<Completion, ProviderError>>,
    requests: Vec<InvokeRequest>,
    models: Vec<String>,
}

/// Plays back queued replies in order and records every request it sees.
/// Stands in for a real provider in tests and offline pipeline runs.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    script: Mutex<Script>,
}

impl ScriptedInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replying(texts: &[&str]) -> Arc<Self> {
        let invoker = Self::new();
        for t in texts {
            invoker.push_text(t);
        }
        invoker
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, reply: Completion) {
        self.script().replies.push_back(Ok(reply));
    }

    pub fn push_text(&self, text: &str) {
        self.push(Completion::text(text));
    }

    pub fn push_err(&self, err: ProviderError) {
        self.script().replies.push_back(Err(err));
    }

    pub fn set_models(&self, models: &[&str]) {
        self.script().models = models.iter().map(|m| m.to_string()).collect();
    }

    pub fn calls(&self) -> usize {
        self.script().requests.len()
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.script().requests.clone()
    }

    pub fn last_request(&self) -> Option<InvokeRequest> {
        self.script().requests.last().cloned()
    }

    pub fn remaining(&self) -> usize {
        self.script().replies.len()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<Completion, ProviderError> {
        let mut script = self.script();
        script.requests.push(request.clone());
        script.replies.pop_front().unwrap_or(Err(ProviderError::Exhausted))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.script().models.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChatMessage;

    #[tokio::test]
    async fn replays_in_order_then_runs_dry() {
        let invoker = ScriptedInvoker::replying(&["one", "two"]);
        let req = InvokeRequest::new("m", vec![ChatMessage::user("q")]);

        assert_eq!(invoker.invoke(&req).await.unwrap().text, "one");
        assert_eq!(invoker.invoke(&req).await.unwrap().text, "two");
        assert!(matches!(invoker.invoke(&req).await, Err(ProviderError::Exhausted)));
        assert_eq!(invoker.calls(), 3);
        assert_eq!(invoker.last_request().unwrap().last_user(), "q");
    }

    #[tokio::test]
    async fn lists_configured_models() {
        let invoker = ScriptedInvoker::new();
        invoker.set_models(&["llama3", "qwen2"]);
        assert_eq!(invoker.list_models().await.unwrap(), vec!["llama3", "qwen2"]);
    }
}
