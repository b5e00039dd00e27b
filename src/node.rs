use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::ConfigManager;
use crate::message::Message;
use crate::provider::{ModelInvoker, Provider, ProviderError, RetryPolicy, Retrying};
use crate::secret::SecretsManager;

/// A single declarative unit of computation in the host's pipeline.
///
/// The host hands inputs in as the payload of a [`Message`] and reads the
/// returned [`NodeOut`] positionally against [`NodeType::outputs`].
#[async_trait]
#[typetag::serde]
pub trait NodeType: Send + Sync + Debug {
    /// Class name the host registers the node under.
    fn type_name(&self) -> String;
    fn display_name(&self) -> String {
        self.type_name()
    }
    fn category(&self) -> &'static str;
    /// JSON schema of the input payload.
    fn schema(&self) -> schemars::Schema;
    fn outputs(&self) -> Vec<OutputSlot>;
    async fn process(&mut self, input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr>;
    /// Free any cached model handle.
    fn unload(&mut self) {}
    fn clone_box(&self) -> Box<dyn NodeType>;
}

#[derive(Serialize, Deserialize)]
pub struct Node(pub Box<dyn NodeType>);

impl std::ops::Deref for Node {
    type Target = dyn NodeType;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl std::ops::DerefMut for Node {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Node(self.0.clone_box())
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Node").field(&self.0).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortKind {
    String,
    Int,
    Float,
    Boolean,
}

/// One named, typed output position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutputSlot {
    pub name: String,
    pub kind: PortKind,
}

impl OutputSlot {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PortKind::String,
        }
    }

    pub fn int(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PortKind::Int,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PortValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PortValue {
    pub fn default_for(kind: PortKind) -> Self {
        match kind {
            PortKind::String => PortValue::Text(String::new()),
            PortKind::Int => PortValue::Int(0),
            PortKind::Float => PortValue::Float(0.0),
            PortKind::Boolean => PortValue::Bool(false),
        }
    }

    pub fn kind(&self) -> PortKind {
        match self {
            PortValue::Text(_) => PortKind::String,
            PortValue::Int(_) => PortKind::Int,
            PortValue::Float(_) => PortKind::Float,
            PortValue::Bool(_) => PortKind::Boolean,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PortValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render for template substitution and console output.
    pub fn render(&self) -> String {
        match self {
            PortValue::Text(s) => s.clone(),
            PortValue::Int(i) => i.to_string(),
            PortValue::Float(f) => f.to_string(),
            PortValue::Bool(b) => b.to_string(),
        }
    }
}

impl From<String> for PortValue {
    fn from(s: String) -> Self {
        PortValue::Text(s)
    }
}

impl From<&str> for PortValue {
    fn from(s: &str) -> Self {
        PortValue::Text(s.to_string())
    }
}

/// Positional output tuple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOut {
    values: Vec<PortValue>,
}

impl NodeOut {
    pub fn new(values: Vec<PortValue>) -> Self {
        Self { values }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(vec![PortValue::Text(value.into())])
    }

    pub fn texts<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::new(values.into_iter().map(|v| PortValue::Text(v.into())).collect())
    }

    pub fn values(&self) -> &[PortValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<PortValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Text at `index`, or "" for a missing or non-text slot.
    pub fn text_at(&self, index: usize) -> &str {
        self.values.get(index).and_then(PortValue::as_text).unwrap_or("")
    }

    /// Error-carrying tuple: the first text slot gets `message`, the rest
    /// get their kind's default.
    pub fn error_for(slots: &[OutputSlot], message: &str) -> Self {
        let first_text = slots.iter().position(|s| s.kind == PortKind::String);
        Self::new(
            slots
                .iter()
                .enumerate()
                .map(|(i, s)| match first_text {
                    Some(t) if t == i => PortValue::Text(message.to_string()),
                    _ => PortValue::default_for(s.kind),
                })
                .collect(),
        )
    }

    /// Whether the values line up with `slots` by count and kind.
    pub fn matches(&self, slots: &[OutputSlot]) -> bool {
        self.values.len() == slots.len()
            && self
                .values
                .iter()
                .zip(slots)
                .all(|(v, s)| v.kind() == s.kind || (s.kind == PortKind::Float && v.kind() == PortKind::Int))
    }
}

#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Error: {0} not set or invalid. Please check your secrets .env file.")]
    MissingKey(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed run: the error plus, optionally, the exact outputs the node wants
/// the host to see instead of the generic error tuple.
#[derive(Debug, Clone)]
pub struct NodeErr {
    error: NodeError,
    fallback: Option<NodeOut>,
}

impl NodeErr {
    pub fn fail(error: NodeError) -> Self {
        Self {
            error,
            fallback: None,
        }
    }

    pub fn with_fallback(error: NodeError, fallback: NodeOut) -> Self {
        Self {
            error,
            fallback: Some(fallback),
        }
    }

    pub fn error(&self) -> &NodeError {
        &self.error
    }

    pub fn fallback(&self) -> Option<&NodeOut> {
        self.fallback.as_ref()
    }

    pub fn into_parts(self) -> (NodeError, Option<NodeOut>) {
        (self.error, self.fallback)
    }
}

impl fmt::Display for NodeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for NodeErr {}

impl From<NodeError> for NodeErr {
    fn from(error: NodeError) -> Self {
        Self::fail(error)
    }
}

impl From<ProviderError> for NodeErr {
    fn from(error: ProviderError) -> Self {
        Self::fail(error.into())
    }
}

/// Everything a node may reach outside itself during one run.
#[derive(Clone)]
pub struct NodeContext {
    node_id: String,
    config: ConfigManager,
    secrets: SecretsManager,
    retry: RetryPolicy,
    run_started: Instant,
    invokers: HashMap<Provider, Arc<dyn ModelInvoker>>,
}

impl NodeContext {
    pub fn new(config: ConfigManager, secrets: SecretsManager) -> Self {
        Self {
            node_id: String::new(),
            config,
            secrets,
            retry: RetryPolicy::default(),
            run_started: Instant::now(),
            invokers: HashMap::new(),
        }
    }

    /// In-memory config and no secrets.
    pub fn dummy() -> Self {
        Self::new(
            ConfigManager(crate::config::MapConfigManager::new()),
            SecretsManager(crate::secret::EmptySecretsManager::new()),
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Route every call for `provider` to `invoker` instead of the network.
    pub fn with_invoker(mut self, provider: Provider, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.invokers.insert(provider, invoker);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn set_node_id(&mut self, id: &str) {
        self.node_id = id.to_string();
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn secrets(&self) -> &SecretsManager {
        &self.secrets
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn mark_run_start(&mut self, at: Instant) {
        self.run_started = at;
    }

    /// Time since the current prompt run began.
    pub fn run_elapsed(&self) -> Duration {
        self.run_started.elapsed()
    }

    pub async fn get_config(&self, key: &str) -> Option<String> {
        self.config.get(key).await
    }

    pub async fn reveal_secret(&self, key: &str) -> Option<String> {
        self.secrets.api_key(key).await
    }

    /// The provider's API key; a missing one is a [`NodeError::MissingKey`].
    pub async fn api_key(&self, provider: Provider) -> Result<Option<String>, NodeError> {
        match provider.key_name() {
            None => Ok(None),
            Some(name) => match self.reveal_secret(name).await {
                Some(key) => Ok(Some(key)),
                None => Err(NodeError::MissingKey(name.to_string())),
            },
        }
    }

    pub async fn base_url(&self, provider: Provider) -> String {
        self.config
            .get_or(provider.base_url_key(), provider.default_base_url())
            .await
    }

    /// Invoker for `provider` using configured credentials and endpoint.
    pub async fn invoker(&self, provider: Provider) -> Result<Arc<dyn ModelInvoker>, NodeError> {
        let key = self.api_key(provider).await?;
        if let Some(injected) = self.invokers.get(&provider) {
            return Ok(injected.clone());
        }
        let base_url = self.base_url(provider).await;
        Ok(provider.client(&base_url, key)?)
    }

    /// Invoker with an explicit endpoint and key, for nodes that take both
    /// as inputs.
    pub fn invoker_at(
        &self,
        provider: Provider,
        base_url: &str,
        api_key: Option<String>,
    ) -> Result<Arc<dyn ModelInvoker>, NodeError> {
        if let Some(injected) = self.invokers.get(&provider) {
            return Ok(injected.clone());
        }
        Ok(provider.client(base_url, api_key)?)
    }

    /// Wrap `invoker` in this context's retry policy.
    pub fn retrying(&self, invoker: Arc<dyn ModelInvoker>) -> Arc<dyn ModelInvoker> {
        Arc::new(Retrying::new(invoker, self.retry.clone()))
    }
}

impl Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_id", &self.node_id)
            .field("config", &self.config)
            .field("secrets", &self.secrets)
            .field("injected", &self.invokers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfigManager;
    use crate::provider::ScriptedInvoker;
    use crate::secret::MemorySecretsManager;

    #[test]
    fn node_err_displays_the_inner_error() {
        let err = NodeErr::with_fallback(NodeError::InvalidInput("seed".into()), NodeOut::text("x"));
        assert_eq!(err.to_string(), "Invalid input: seed");
        assert_eq!(format!("{err}"), err.error().to_string());
    }

    #[test]
    fn error_tuple_fills_first_text_slot() {
        let slots = vec![OutputSlot::int("seed"), OutputSlot::text("a"), OutputSlot::text("b")];
        let out = NodeOut::error_for(&slots, "boom");
        assert_eq!(
            out.values(),
            &[PortValue::Int(0), PortValue::Text("boom".into()), PortValue::Text(String::new())]
        );
        assert!(out.matches(&slots));
    }

    #[test]
    fn arity_and_kind_are_checked() {
        let slots = vec![OutputSlot::text("a")];
        assert!(NodeOut::text("x").matches(&slots));
        assert!(!NodeOut::texts(["x", "y"]).matches(&slots));
        assert!(!NodeOut::new(vec![PortValue::Int(1)]).matches(&slots));
    }

    #[test]
    fn missing_key_text_names_the_key() {
        let err = NodeError::MissingKey("GROQ_API_KEY".into());
        assert_eq!(
            err.to_string(),
            "Error: GROQ_API_KEY not set or invalid. Please check your secrets .env file."
        );
    }

    #[tokio::test]
    async fn invoker_requires_key_even_when_injected() {
        let scripted = ScriptedInvoker::replying(&["hi"]);
        let ctx = NodeContext::dummy().with_invoker(Provider::DeepSeek, scripted.clone());
        assert!(matches!(
            ctx.invoker(Provider::DeepSeek).await,
            Err(NodeError::MissingKey(k)) if k == "DEEPSEEK_API_KEY"
        ));

        let ctx = NodeContext::new(
            ConfigManager(MapConfigManager::new()),
            SecretsManager(MemorySecretsManager::with(&[("DEEPSEEK_API_KEY", "sk")])),
        )
        .with_invoker(Provider::DeepSeek, scripted);
        assert!(ctx.invoker(Provider::DeepSeek).await.is_ok());
    }

    #[tokio::test]
    async fn base_url_comes_from_config() {
        let ctx = NodeContext::new(
            ConfigManager(MapConfigManager::with(&[("GROQ_BASE_URL", "http://proxy/v1")])),
            SecretsManager(MemorySecretsManager::new()),
        );
        assert_eq!(ctx.base_url(Provider::Groq).await, "http://proxy/v1");
        assert_eq!(ctx.base_url(Provider::Moonshot).await, "https://api.moonshot.cn/v1");
        assert_eq!(ctx.api_key(Provider::Ollama).await.unwrap(), None);
    }
}
