use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("agent failed: {0}")]
    Agent(String),
    #[error("reformat failed: {0}")]
    Reformat(String),
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The caller's original query text.
///
/// Never mutated after receipt: directive wrapping produces a new `String` in
/// [`DispatchRequest::message`], and classification/validation always read this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    /// Rejects missing/blank queries (input error, surfaced as a client error).
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::InvalidInput("No query provided".to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Tool arguments as the agent reported them (usually a JSON string).
    #[serde(default)]
    pub arguments: String,
}

/// One unit emitted by the generation agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// Runtime-formatted event text. User-facing content, if any, is embedded as `content='...'`
    /// among other structural fields.
    Raw(String),
    /// Content an adapter already separated from the wire format.
    Content(String),
    /// Diagnostic tool invocation notice; never user-facing.
    ToolCall(ToolCall),
}

impl GenerationEvent {
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall(_))
    }
}

/// Ordered event sequence for one request. Dropping it releases the upstream call.
pub type EventStream = BoxStream<'static, Result<GenerationEvent>>;

/// Per-request input to the generation agent.
///
/// Everything request-specific travels here; agents hold no per-request state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// The query as dispatched (possibly wrapped in a verification directive).
    pub message: String,
    /// Per-request system directive.
    pub system: String,
    pub stream: bool,
}

#[async_trait::async_trait]
pub trait GenerationAgent: Send + Sync {
    fn name(&self) -> &'static str;
    /// Non-streaming: resolves once the whole answer is ready.
    async fn run(&self, req: &DispatchRequest) -> Result<GenerationEvent>;
    /// Streaming: yields events in arrival order, terminated by stream end or an `Err` item.
    async fn run_stream(&self, req: &DispatchRequest) -> Result<EventStream>;
}

#[async_trait::async_trait]
pub trait Reformatter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn reformat(&self, instruction: &str, text: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Identity-provider id (the upsert key).
    pub external_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub content: String,
    pub search_query: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    pub user_id: String,
    pub content: String,
    pub search_query: Option<String>,
}

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn upsert_user(&self, user: &UserRecord) -> Result<()>;
    /// Returns whether a record was removed.
    async fn delete_user(&self, external_id: &str) -> Result<bool>;
    async fn get_user(&self, external_id: &str) -> Result<Option<UserRecord>>;
}

#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Stores a saved answer for a known user; `Error::NotFound` if the user does not exist.
    async fn push(&self, rec: NewHistoryRecord) -> Result<HistoryRecord>;
    /// Newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<HistoryRecord>>;
    async fn delete(&self, id: &str) -> Result<bool>;
}
