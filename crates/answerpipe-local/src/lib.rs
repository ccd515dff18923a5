use answerpipe_core::{
    Error, GenerationAgent, HistoryRecord, HistoryStore, NewHistoryRecord, Reformatter, Result,
    UserRecord, UserStore,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod aggregate;
pub mod classify;
pub mod contract;
pub mod extract;
pub mod gemini;
pub mod openai_compat;
pub mod pipeline;
pub mod prompts;
pub mod reformat;
pub mod runtime_agent;
pub mod scrub;
pub mod validate;
pub mod wire;

/// Shared HTTP client for every collaborator adapter.
///
/// Only connect is bounded here; non-streaming calls set their own per-request timeout and
/// streaming calls last as long as the caller keeps reading.
pub fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("answerpipe/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::NotConfigured(e.to_string()))
}

/// Agent runtime sidecar when configured, otherwise an OpenAI-compatible endpoint.
pub fn agent_from_env(client: reqwest::Client) -> Result<Arc<dyn GenerationAgent>> {
    if runtime_agent::runtime_url_from_env().is_some() {
        return Ok(Arc::new(runtime_agent::AgentRuntimeClient::from_env(client)?));
    }
    if openai_compat::openai_compat_configured() {
        return Ok(Arc::new(openai_compat::OpenAiCompatClient::from_env(
            client, None,
        )?));
    }
    Err(Error::NotConfigured(
        "no generation agent (set ANSWERPIPE_AGENT_RUNTIME_URL or ANSWERPIPE_OPENAI_COMPAT_BASE_URL)"
            .to_string(),
    ))
}

/// Gemini when a key is present, otherwise an OpenAI-compatible endpoint.
pub fn reformatter_from_env(client: reqwest::Client) -> Result<Arc<dyn Reformatter>> {
    if gemini::gemini_api_key_from_env().is_some() {
        return Ok(Arc::new(gemini::GeminiReformatter::from_env(client)?));
    }
    if openai_compat::openai_compat_configured() {
        return Ok(Arc::new(openai_compat::OpenAiCompatClient::from_env(
            client, None,
        )?));
    }
    Err(Error::NotConfigured(
        "no reformatter (set ANSWERPIPE_GEMINI_API_KEY or ANSWERPIPE_OPENAI_COMPAT_BASE_URL)"
            .to_string(),
    ))
}

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::Store(e.to_string())
}

fn history_from_new(rec: NewHistoryRecord, user: &UserRecord) -> HistoryRecord {
    HistoryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: rec.user_id,
        username: user
            .name
            .clone()
            .unwrap_or_else(|| "Unknown User".to_string()),
        email: user.email.clone().unwrap_or_else(|| "No email".to_string()),
        content: rec.content,
        search_query: rec.search_query,
        created_at: chrono::Utc::now(),
    }
}

fn newest_first(records: &mut [HistoryRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// JSON files on disk. Users are keyed by the sha256 of their external id (sharded like a
/// content-addressed cache); history records by their uuid.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    // Serializes read-modify-write sequences within this process.
    lock: Mutex<()>,
}

impl FsStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_key(external_id: &str) -> String {
        let mut h = Sha256::new();
        h.update(b"user:");
        h.update(external_id.as_bytes());
        hex::encode(h.finalize())
    }

    fn user_path(&self, external_id: &str) -> PathBuf {
        let key = Self::user_key(external_id);
        self.root
            .join("users")
            .join(&key[0..2])
            .join(&key[2..4])
            .join(format!("{key}.json"))
    }

    fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    /// `None` for ids that are not uuids, so arbitrary input never becomes a path.
    fn history_path(&self, id: &str) -> Option<PathBuf> {
        let id = uuid::Uuid::parse_str(id).ok()?;
        Some(self.history_dir().join(format!("{id}.json")))
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| store_err("store lock poisoned"))
    }

    fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(store_err)?;
        }
        let bytes = serde_json::to_vec_pretty(value).map_err(store_err)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(store_err)?;
        fs::rename(&tmp, path).map_err(store_err)?;
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(store_err),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    fn remove(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(store_err(e)),
        }
    }
}

#[async_trait::async_trait]
impl UserStore for FsStore {
    async fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        let _g = self.guard()?;
        Self::write_json(&self.user_path(&user.external_id), user)
    }

    async fn delete_user(&self, external_id: &str) -> Result<bool> {
        let _g = self.guard()?;
        Self::remove(&self.user_path(external_id))
    }

    async fn get_user(&self, external_id: &str) -> Result<Option<UserRecord>> {
        Self::read_json(&self.user_path(external_id))
    }
}

#[async_trait::async_trait]
impl HistoryStore for FsStore {
    async fn push(&self, rec: NewHistoryRecord) -> Result<HistoryRecord> {
        let _g = self.guard()?;
        let user: UserRecord = Self::read_json(&self.user_path(&rec.user_id))?
            .ok_or_else(|| Error::NotFound(format!("user {}", rec.user_id)))?;
        let out = history_from_new(rec, &user);
        let path = self
            .history_path(&out.id)
            .ok_or_else(|| store_err("generated id is not a uuid"))?;
        Self::write_json(&path, &out)?;
        Ok(out)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<HistoryRecord>> {
        let dir = self.history_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_err(e)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let path = entry.map_err(store_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(rec) = Self::read_json::<HistoryRecord>(&path)? {
                if rec.user_id == user_id {
                    out.push(rec);
                }
            }
        }
        newest_first(&mut out);
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let Some(path) = self.history_path(id) else {
            return Ok(false);
        };
        let _g = self.guard()?;
        Self::remove(&path)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserRecord>>,
    history: Mutex<Vec<HistoryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryStore {
    async fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        let mut users = self.users.lock().map_err(|_| store_err("lock poisoned"))?;
        users.insert(user.external_id.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, external_id: &str) -> Result<bool> {
        let mut users = self.users.lock().map_err(|_| store_err("lock poisoned"))?;
        Ok(users.remove(external_id).is_some())
    }

    async fn get_user(&self, external_id: &str) -> Result<Option<UserRecord>> {
        let users = self.users.lock().map_err(|_| store_err("lock poisoned"))?;
        Ok(users.get(external_id).cloned())
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryStore {
    async fn push(&self, rec: NewHistoryRecord) -> Result<HistoryRecord> {
        let user = self
            .get_user(&rec.user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", rec.user_id)))?;
        let out = history_from_new(rec, &user);
        let mut history = self.history.lock().map_err(|_| store_err("lock poisoned"))?;
        history.push(out.clone());
        Ok(out)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<HistoryRecord>> {
        let history = self.history.lock().map_err(|_| store_err("lock poisoned"))?;
        let mut out: Vec<HistoryRecord> = history
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut history = self.history.lock().map_err(|_| store_err("lock poisoned"))?;
        let before = history.len();
        history.retain(|r| r.id != id);
        Ok(history.len() != before)
    }
}
