use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

/// What the host hands a node: its inputs as a JSON object, plus bookkeeping.
#[derive(Debug, Clone, JsonSchema, Serialize, Deserialize)]
pub struct Message {
    id: String,
    session_id: Option<String>,
    payload: Value,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(id: &str, payload: Value, session_id: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            session_id,
            payload,
            metadata: HashMap::new(),
        }
    }

    /// A message with a fresh id and no session.
    pub fn inputs(payload: Value) -> Self {
        Self::new(&uuid::Uuid::new_v4().to_string(), payload, None)
    }

    pub fn from_error(error: String) -> Self {
        let mut msg = Self::inputs(json!({ "error": error }));
        msg.add("error".to_string(), error);
        msg
    }

    pub fn id(&self) -> String {
        self.id.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    pub fn set_session_id(&mut self, session: Option<String>) {
        self.session_id = session;
    }

    pub fn payload(&self) -> Value {
        self.payload.clone()
    }

    pub fn payload_ref(&self) -> &Value {
        &self.payload
    }

    /// Deserialise the payload into a node's input struct. A `null` payload
    /// is read as `{}` so that all-default inputs work.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Value::Null => serde_json::from_value(json!({})),
            other => T::deserialize(other),
        }
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.metadata.get(name)
    }

    pub fn add(&mut self, name: String, value: String) {
        self.metadata.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.metadata.remove(name);
    }
}
