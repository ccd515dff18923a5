//! Content extraction from raw generation events.
//!
//! The agent runtime prints its events as structured text (`RunResponse(content='...', ...)`),
//! interleaved with tool-call and log fields. Only the `content='...'` payload is user-facing.

use answerpipe_core::GenerationEvent;
use regex::Regex;
use std::sync::OnceLock;

static CONTENT_RE: OnceLock<Regex> = OnceLock::new();

fn content_re() -> &'static Regex {
    CONTENT_RE.get_or_init(|| Regex::new(r"content='([^']*)'").expect("content pattern compiles"))
}

/// Returns the last `content='...'` payload in `raw`, trimmed.
///
/// No match (or an empty quoted value) yields an empty string; this never errors.
pub fn extract_content(raw: &str) -> String {
    content_re()
        .captures_iter(raw)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// User-facing content of one event (empty for tool calls).
pub fn event_content(ev: &GenerationEvent) -> String {
    match ev {
        GenerationEvent::Raw(raw) => extract_content(raw),
        GenerationEvent::Content(text) => text.trim().to_string(),
        GenerationEvent::ToolCall(_) => String::new(),
    }
}
