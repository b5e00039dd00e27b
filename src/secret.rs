use async_trait::async_trait;
use dashmap::DashMap;
use dotenvy::Error as DotenvError;
use rand::{RngCore, rng};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{error, info, warn};

/// Secrets are looked up by key and revealed through an opaque handle, so a
/// node never holds a raw value longer than the call that needs it.
#[async_trait]
pub trait SecretsManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut secrets = vec![];
        for key in self.keys() {
            if let Some(handle) = self.get(&key) {
                if let Ok(Some(secret)) = self.reveal(handle).await {
                    secrets.push((key.to_string(), secret));
                }
            }
        }
        secrets
    }
    fn get(&self, key: &str) -> Option<u32>;
    fn keys(&self) -> Vec<String>;
    async fn add_secret(&self, key: &str, secret: &str) -> Result<(), SecretsError>;
    async fn update_secret(&self, key: &str, secret: &str) -> Result<(), SecretsError>;
    async fn delete_secret(&self, key: &str) -> Result<(), SecretsError>;
    async fn reveal(&self, handle: u32) -> Result<Option<String>, SecretsError>;
    fn name(&self) -> &'static str;
    fn clone_box(&self) -> Arc<dyn SecretsManagerType>;
    fn debug_box(&self) -> String;
}

pub struct SecretsManager(pub Arc<dyn SecretsManagerType + Send + Sync>);

impl SecretsManager {
    pub fn into_inner(self) -> Arc<dyn SecretsManagerType> {
        self.0
    }

    pub async fn add_secret(&self, key: &str, value: &str) -> Result<(), SecretsError> {
        self.0.add_secret(key, value).await
    }

    pub async fn update_secret(&self, key: &str, value: &str) -> Result<(), SecretsError> {
        self.0.update_secret(key, value).await
    }

    pub async fn delete_secret(&self, key: &str) -> Result<(), SecretsError> {
        self.0.delete_secret(key).await
    }

    pub async fn get_secret(&self, key: &str) -> Result<Option<String>, SecretsError> {
        match self.0.get(key) {
            Some(handle) => self.0.reveal(handle).await,
            None => Ok(None),
        }
    }

    /// Revealed value of `key`, treating blank values as absent.
    pub async fn api_key(&self, key: &str) -> Option<String> {
        match self.get_secret(key).await {
            Ok(Some(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(key, error = %e, "secret lookup failed");
                None
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.keys()
    }
}

impl Clone for SecretsManager {
    fn clone(&self) -> Self {
        SecretsManager(self.0.clone_box())
    }
}

impl Debug for SecretsManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

impl Serialize for SecretsManager {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // never the values, only what is configured
        let mut state = serializer.serialize_struct("SecretsManager", 2)?;
        state.serialize_field("name", self.0.name())?;
        state.serialize_field("keys", &self.0.keys())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for SecretsManager {
    fn deserialize<D>(_deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Err(serde::de::Error::custom(
            "SecretsManager cannot be deserialized dynamically",
        ))
    }
}

#[derive(Debug, Clone, Error)]
pub enum SecretsError {
    #[error("secret store error: {0}")]
    Upstream(String),
    #[error("secret file error: {0}")]
    Io(String),
    #[error("secret not found")]
    NotFound,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Secrets backed by `<dir>/.env`. Every mutation rewrites the file.
#[derive(Clone)]
pub struct EnvSecretsManager {
    keys: Arc<RwLock<HashMap<String, u32>>>,
    secrets: Arc<RwLock<HashMap<u32, String>>>,
    env_path: Option<PathBuf>,
}

impl EnvSecretsManager {
    pub fn new(dotenv_dir: Option<PathBuf>) -> Arc<Self> {
        let env_path = dotenv_dir.as_ref().map(|dir| dir.join(".env"));
        let mgr = Arc::new(Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
            secrets: Arc::new(RwLock::new(HashMap::new())),
            env_path,
        });

        match &mgr.env_path {
            Some(envfile) if envfile.exists() => mgr.load_dotenv(envfile),
            Some(envfile) => info!(".env file {} not found, starting empty", envfile.display()),
            None => info!("secrets kept in memory only (no .env path)"),
        }
        mgr
    }

    pub fn env_path(&self) -> Option<&Path> {
        self.env_path.as_deref()
    }

    fn insert(&self, key: &str, secret: &str) {
        let mut keys = write_lock(&self.keys);
        let mut secrets = write_lock(&self.secrets);
        let handle = match keys.get(key) {
            Some(handle) => *handle,
            None => {
                let id = rng().next_u32();
                keys.insert(key.to_string(), id);
                id
            }
        };
        secrets.insert(handle, secret.to_string());
    }

    pub fn add_secret_sync(&self, key: &str, secret: &str) {
        self.insert(key, secret);
        self.write_dotenv();
    }

    pub fn update_secret_sync(&self, key: &str, secret: &str) {
        self.insert(key, secret);
        self.write_dotenv();
    }

    pub fn delete_secret_sync(&self, key: &str) -> bool {
        let removed = {
            let mut keys = write_lock(&self.keys);
            let mut secrets = write_lock(&self.secrets);
            match keys.remove(key) {
                Some(handle) => {
                    secrets.remove(&handle);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.write_dotenv();
        }
        removed
    }

    /// Parse only the given `.env` file, replacing whatever was loaded.
    fn load_dotenv(&self, path: &Path) {
        match dotenvy::from_path_iter(path) {
            Ok(iter) => {
                {
                    write_lock(&self.keys).clear();
                    write_lock(&self.secrets).clear();
                }
                for item in iter {
                    match item {
                        Ok((k, v)) => self.insert(&k, &v),
                        Err(e) => error!("Malformed line in {}: {}", path.display(), e),
                    }
                }
                info!(".env loaded from {}", path.display());
            }
            Err(DotenvError::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {
                info!(".env file {} not found, skipping", path.display());
            }
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
            }
        }
    }

    fn write_dotenv(&self) {
        let Some(path) = &self.env_path else { return };

        let out = {
            let keys = read_lock(&self.keys);
            let secrets = read_lock(&self.secrets);
            let mut sorted: Vec<_> = keys.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));

            let mut out = String::new();
            for (key, handle) in sorted {
                if let Some(value) = secrets.get(handle) {
                    out.push_str(&format!("{}={}\n", key, value.replace('\n', "\\n")));
                }
            }
            out
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("Failed to create {}: {}", parent.display(), e);
                return;
            }
        }
        if let Err(e) = std::fs::write(path, out) {
            error!("Failed to write to .env file {}: {}", path.display(), e);
        } else {
            info!(".env file updated at {}", path.display());
        }
    }
}

impl Debug for EnvSecretsManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "EnvSecretsManager {{ keys: {:?} }}", self.keys())
    }
}

#[async_trait]
impl SecretsManagerType for EnvSecretsManager {
    fn get(&self, key: &str) -> Option<u32> {
        read_lock(&self.keys).get(key).copied()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = read_lock(&self.keys).keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn add_secret(&self, key: &str, secret: &str) -> Result<(), SecretsError> {
        self.add_secret_sync(key, secret);
        Ok(())
    }

    async fn update_secret(&self, key: &str, secret: &str) -> Result<(), SecretsError> {
        self.update_secret_sync(key, secret);
        Ok(())
    }

    async fn delete_secret(&self, key: &str) -> Result<(), SecretsError> {
        if self.delete_secret_sync(key) {
            Ok(())
        } else {
            Err(SecretsError::NotFound)
        }
    }

    async fn reveal(&self, handle: u32) -> Result<Option<String>, SecretsError> {
        Ok(read_lock(&self.secrets).get(&handle).cloned())
    }

    fn name(&self) -> &'static str {
        "EnvSecrets"
    }

    fn clone_box(&self) -> Arc<dyn SecretsManagerType> {
        Arc::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("SecretsManager {{ keys: {:?} }}", self.keys())
    }
}

/// In-process secrets, used by tests and embedders that inject keys directly.
pub struct MemorySecretsManager {
    handles: DashMap<String, u32>,
    secrets: DashMap<String, String>,
    next_handle: AtomicU32,
}

impl MemorySecretsManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handles: DashMap::new(),
            secrets: DashMap::new(),
            next_handle: AtomicU32::new(1),
        })
    }

    pub fn with(entries: &[(&str, &str)]) -> Arc<Self> {
        let mgr = Self::new();
        for (k, v) in entries {
            mgr.put(k, v);
        }
        mgr
    }

    fn put(&self, key: &str, secret: &str) {
        self.handles
            .entry(key.to_string())
            .or_insert_with(|| self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.secrets.insert(key.to_string(), secret.to_string());
    }
}

impl Clone for MemorySecretsManager {
    fn clone(&self) -> Self {
        Self {
            handles: self.handles.clone(),
            secrets: self.secrets.clone(),
            next_handle: AtomicU32::new(self.next_handle.load(Ordering::Relaxed)),
        }
    }
}

#[async_trait]
impl SecretsManagerType for MemorySecretsManager {
    fn get(&self, key: &str) -> Option<u32> {
        self.handles.get(key).map(|v| *v)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handles.iter().map(|kv| kv.key().clone()).collect();
        keys.sort();
        keys
    }

    async fn add_secret(&self, key: &str, secret: &str) -> Result<(), SecretsError> {
        self.put(key, secret);
        Ok(())
    }

    async fn update_secret(&self, key: &str, secret: &str) -> Result<(), SecretsError> {
        if !self.handles.contains_key(key) {
            return Err(SecretsError::NotFound);
        }
        self.secrets.insert(key.to_string(), secret.to_string());
        Ok(())
    }

    async fn delete_secret(&self, key: &str) -> Result<(), SecretsError> {
        let had_handle = self.handles.remove(key).is_some();
        let had_secret = self.secrets.remove(key).is_some();
        if had_handle || had_secret {
            Ok(())
        } else {
            Err(SecretsError::NotFound)
        }
    }

    async fn reveal(&self, handle: u32) -> Result<Option<String>, SecretsError> {
        let key = self
            .handles
            .iter()
            .find(|kv| *kv.value() == handle)
            .map(|kv| kv.key().clone());
        Ok(key.and_then(|k| self.secrets.get(&k).map(|v| v.clone())))
    }

    fn name(&self) -> &'static str {
        "MemorySecrets"
    }

    fn clone_box(&self) -> Arc<dyn SecretsManagerType> {
        Arc::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MemorySecretsManager {{ keys: {} }}", self.handles.len())
    }
}

/// A store with nothing in it and no way to add anything.
#[derive(Clone, Debug, Default)]
pub struct EmptySecretsManager;

impl EmptySecretsManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SecretsManagerType for EmptySecretsManager {
    fn get(&self, _key: &str) -> Option<u32> {
        None
    }

    fn keys(&self) -> Vec<String> {
        vec![]
    }

    async fn add_secret(&self, _key: &str, _secret: &str) -> Result<(), SecretsError> {
        Err(SecretsError::Upstream("empty secrets store is read-only".into()))
    }

    async fn update_secret(&self, _key: &str, _secret: &str) -> Result<(), SecretsError> {
        Err(SecretsError::NotFound)
    }

    async fn delete_secret(&self, _key: &str) -> Result<(), SecretsError> {
        Err(SecretsError::NotFound)
    }

    async fn reveal(&self, _handle: u32) -> Result<Option<String>, SecretsError> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "EmptySecrets"
    }

    fn clone_box(&self) -> Arc<dyn SecretsManagerType> {
        Arc::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "EmptySecretsManager".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn in_memory_env_manager_tracks_keys() {
        let mgr = EnvSecretsManager::new(None);
        mgr.add_secret_sync("DEEPSEEK_API_KEY", "sk-1");
        mgr.update_secret_sync("DEEPSEEK_API_KEY", "sk-2");
        assert_eq!(mgr.keys(), vec!["DEEPSEEK_API_KEY".to_string()]);

        let handle = mgr.get("DEEPSEEK_API_KEY").unwrap();
        assert_eq!(read_lock(&mgr.secrets).get(&handle), Some(&"sk-2".to_string()));

        assert!(mgr.delete_secret_sync("DEEPSEEK_API_KEY"));
        assert!(!mgr.delete_secret_sync("DEEPSEEK_API_KEY"));
        assert!(mgr.get("DEEPSEEK_API_KEY").is_none());
    }

    #[tokio::test]
    async fn env_file_is_loaded_and_rewritten() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env"), "GROQ_API_KEY=gsk\nMOONSHOT_API_KEY=ms\n").unwrap();

        let mgr = EnvSecretsManager::new(Some(dir.path().to_path_buf()));
        let manager = SecretsManager(mgr.clone());
        assert_eq!(manager.api_key("GROQ_API_KEY").await, Some("gsk".to_string()));

        manager.update_secret("GROQ_API_KEY", "gsk-2").await.unwrap();
        manager.delete_secret("MOONSHOT_API_KEY").await.unwrap();

        let content = fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(content, "GROQ_API_KEY=gsk-2\n");
    }

    #[tokio::test]
    async fn blank_secret_counts_as_missing() {
        let manager = SecretsManager(MemorySecretsManager::with(&[("GEMINI_API_KEY", "  ")]));
        assert_eq!(manager.api_key("GEMINI_API_KEY").await, None);
        assert_eq!(manager.api_key("OTHER").await, None);
    }

    #[tokio::test]
    async fn memory_manager_update_requires_existing_key() {
        let mgr = MemorySecretsManager::new();
        assert!(matches!(
            mgr.update_secret("X", "1").await,
            Err(SecretsError::NotFound)
        ));
        mgr.add_secret("X", "1").await.unwrap();
        mgr.update_secret("X", "2").await.unwrap();
        let handle = mgr.get("X").unwrap();
        assert_eq!(mgr.reveal(handle).await.unwrap(), Some("2".to_string()));
        assert_eq!(mgr.as_vec().await, vec![("X".to_string(), "2".to_string())]);
    }

    #[tokio::test]
    async fn empty_manager_reveals_nothing() {
        let manager = SecretsManager(EmptySecretsManager::new());
        assert!(manager.keys().is_empty());
        assert_eq!(manager.get_secret("ANY").await.unwrap(), None);
        assert!(manager.add_secret("ANY", "v").await.is_err());
    }
}
