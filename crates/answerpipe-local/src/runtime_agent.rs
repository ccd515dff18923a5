//! HTTP client for an agent-runtime sidecar.
//!
//! The sidecar hosts the research team (search + scrape tools) and prints its run events as text.
//! Non-streaming runs return one body; streaming runs return one event per line. JSON lines with
//! `"type": "tool_call"` are tool notices; every other non-blank line is a raw event.

use crate::wire::{line_stream, sse_data};
use answerpipe_core::{
    DispatchRequest, Error, EventStream, GenerationAgent, GenerationEvent, Result, ToolCall,
};
use futures_util::StreamExt;
use serde::Serialize;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn runtime_url_from_env() -> Option<String> {
    env("ANSWERPIPE_AGENT_RUNTIME_URL")
}

fn runtime_api_key_from_env() -> Option<String> {
    env("ANSWERPIPE_AGENT_RUNTIME_API_KEY")
}

pub fn runtime_timeout_ms_from_env() -> u64 {
    env("ANSWERPIPE_AGENT_RUNTIME_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(180_000)
        .clamp(1_000, 900_000)
}

#[derive(Debug, Clone)]
pub struct AgentRuntimeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    message: &'a str,
    system: &'a str,
    stream: bool,
}

impl AgentRuntimeClient {
    pub fn new(client: reqwest::Client, base_url: String, timeout_ms: u64) -> Result<Self> {
        url::Url::parse(&base_url)
            .map_err(|e| Error::NotConfigured(format!("invalid agent runtime url: {e}")))?;
        Ok(Self {
            client,
            base_url,
            api_key: None,
            timeout_ms,
        })
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let base_url = runtime_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing ANSWERPIPE_AGENT_RUNTIME_URL".to_string())
        })?;
        let mut out = Self::new(client, base_url, runtime_timeout_ms_from_env())?;
        out.api_key = runtime_api_key_from_env();
        Ok(out)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_run(&self) -> String {
        format!("{}/v1/run", self.base_url.trim_end_matches('/'))
    }

    async fn post(&self, req: &DispatchRequest, stream: bool) -> Result<reqwest::Response> {
        let body = RunRequest {
            message: &req.message,
            system: &req.system,
            stream,
        };
        let mut rb = self.client.post(self.endpoint_run()).json(&body);
        // Streaming runs are bounded by the caller's connection, not a wall-clock timeout.
        if !stream {
            rb = rb.timeout(std::time::Duration::from_millis(self.timeout_ms));
        }
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }
        let resp = rb.send().await.map_err(|e| Error::Agent(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Agent(format!("agent runtime run HTTP {status}")));
        }
        Ok(resp)
    }
}

/// Classifies one streamed line. Blank lines and SSE comments carry no event.
pub fn parse_event_line(line: &str) -> Option<GenerationEvent> {
    let line = sse_data(line).unwrap_or(line);
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    if trimmed.starts_with('{') {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if v.get("type").and_then(|t| t.as_str()) == Some("tool_call") {
                let name = v
                    .get("name")
                    .or_else(|| v.get("tool_name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let arguments = match v.get("arguments").or_else(|| v.get("tool_args")) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                return Some(GenerationEvent::ToolCall(ToolCall { name, arguments }));
            }
        }
    }
    Some(GenerationEvent::Raw(line.to_string()))
}

#[async_trait::async_trait]
impl GenerationAgent for AgentRuntimeClient {
    fn name(&self) -> &'static str {
        "agent_runtime"
    }

    async fn run(&self, req: &DispatchRequest) -> Result<GenerationEvent> {
        let resp = self.post(req, false).await?;
        let text = resp.text().await.map_err(|e| Error::Agent(e.to_string()))?;
        Ok(GenerationEvent::Raw(text))
    }

    async fn run_stream(&self, req: &DispatchRequest) -> Result<EventStream> {
        let resp = self.post(req, true).await?;
        let events = line_stream(resp).filter_map(|item| async move {
            match item {
                Ok(line) => parse_event_line(&line).map(Ok),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use axum::{body::Body, routing::post, Json, Router};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn dispatch(stream: bool) -> DispatchRequest {
        DispatchRequest {
            message: "Tell me about XYZ University".to_string(),
            system: "system".to_string(),
            stream,
        }
    }

    #[test]
    fn tool_call_lines_become_tool_events() {
        let ev = parse_event_line(
            r#"{"type":"tool_call","tool_name":"duckduckgo_search","tool_args":{"query":"xyz"}}"#,
        );
        assert_eq!(
            ev,
            Some(GenerationEvent::ToolCall(ToolCall {
                name: "duckduckgo_search".to_string(),
                arguments: r#"{"query":"xyz"}"#.to_string(),
            }))
        );
        assert_eq!(parse_event_line(""), None);
        assert_eq!(parse_event_line("data: "), None);
        assert_eq!(
            parse_event_line("data: RunResponse(content='x')"),
            Some(GenerationEvent::Raw("RunResponse(content='x')".to_string()))
        );
    }

    #[tokio::test]
    async fn run_returns_the_whole_body_as_one_raw_event() {
        let app = Router::new().route(
            "/v1/run",
            post(|Json(v): Json<serde_json::Value>| async move {
                assert_eq!(v["stream"], serde_json::json!(false));
                assert_eq!(v["system"], serde_json::json!("system"));
                format!(
                    "RunResponse(content='{}', event='RunResponse')",
                    v["message"].as_str().unwrap_or("")
                )
            }),
        );
        let base = serve(app).await;
        let agent = AgentRuntimeClient::new(reqwest::Client::new(), base, 5_000).unwrap();
        let ev = agent.run(&dispatch(false)).await.unwrap();
        assert_eq!(
            ev,
            GenerationEvent::Raw(
                "RunResponse(content='Tell me about XYZ University', event='RunResponse')"
                    .to_string()
            )
        );
    }

    #[tokio::test]
    async fn streamed_lines_aggregate_in_order() {
        let app = Router::new().route(
            "/v1/run",
            post(|| async {
                "RunResponse(content='Hello')\n{\"type\":\"tool_call\",\"name\":\"google_search\"}\nRunResponse(content='World')\n"
            }),
        );
        let base = serve(app).await;
        let agent = AgentRuntimeClient::new(reqwest::Client::new(), base, 5_000).unwrap();
        let events = agent.run_stream(&dispatch(true)).await.unwrap();
        let out = aggregate(events, |_| {}).await;
        assert!(out.is_complete());
        assert_eq!(out.document, "Hello World");
        assert_eq!(out.tool_calls, 1);
    }

    #[tokio::test]
    async fn broken_stream_keeps_partial_text_and_records_error() {
        let app = Router::new().route(
            "/v1/run",
            post(|| async {
                let chunks: Vec<std::result::Result<axum::body::Bytes, std::io::Error>> = vec![
                    Ok(axum::body::Bytes::from_static(b"RunResponse(content='Hello')\n")),
                    Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upstream gone")),
                ];
                Body::from_stream(futures_util::stream::iter(chunks))
            }),
        );
        let base = serve(app).await;
        let agent = AgentRuntimeClient::new(reqwest::Client::new(), base, 5_000).unwrap();
        let events = agent.run_stream(&dispatch(true)).await.unwrap();
        let out = aggregate(events, |_| {}).await;
        assert_eq!(out.document, "Hello");
        assert!(matches!(out.error, Some(Error::Stream(_))), "{:?}", out.error);
    }

    #[tokio::test]
    async fn non_success_status_is_an_agent_error() {
        let app = Router::new().route(
            "/v1/run",
            post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = serve(app).await;
        let agent = AgentRuntimeClient::new(reqwest::Client::new(), base, 5_000).unwrap();
        let err = agent.run(&dispatch(false)).await.unwrap_err();
        assert!(matches!(err, Error::Agent(ref m) if m.contains("429")), "{err}");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = AgentRuntimeClient::new(reqwest::Client::new(), "not a url".to_string(), 1_000)
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }
}
