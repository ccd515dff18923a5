use crate::wire::{line_stream, sse_data};
use answerpipe_core::{
    DispatchRequest, Error, EventStream, GenerationAgent, GenerationEvent, Reformatter, Result,
    ToolCall,
};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn openai_compat_base_url_from_env() -> Option<String> {
    env("ANSWERPIPE_OPENAI_COMPAT_BASE_URL")
}

fn openai_compat_api_key_from_env() -> Option<String> {
    env("ANSWERPIPE_OPENAI_COMPAT_API_KEY")
}

fn openai_compat_model_from_env() -> Option<String> {
    env("ANSWERPIPE_OPENAI_COMPAT_MODEL")
}

pub fn openai_compat_timeout_ms_from_env() -> u64 {
    env("ANSWERPIPE_OPENAI_COMPAT_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(120_000)
        .clamp(1_000, 600_000)
}

pub fn openai_compat_configured() -> bool {
    openai_compat_base_url_from_env().is_some()
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_ms: u64,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout_ms: u64,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
            timeout_ms,
        }
    }

    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url = openai_compat_base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing ANSWERPIPE_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        let api_key = openai_compat_api_key_from_env();

        let model = model_override
            .or_else(openai_compat_model_from_env)
            .ok_or_else(|| {
                Error::NotConfigured(
                    "missing model for openai_compat (set ANSWERPIPE_OPENAI_COMPAT_MODEL)"
                        .to_string(),
                )
            })?;

        Ok(Self::new(
            client,
            base_url,
            api_key,
            model,
            openai_compat_timeout_ms_from_env(),
        ))
    }

    fn endpoint_chat_completions(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }

    fn request(&self, system: &str, user: &str, stream: bool) -> ChatCompletionsRequest {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: user.to_string(),
        });
        ChatCompletionsRequest {
            model: self.model.clone(),
            messages,
            temperature: None,
            stream: Some(stream),
        }
    }

    async fn send(&self, req: &ChatCompletionsRequest, timeout: bool) -> Result<reqwest::Response> {
        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if timeout {
            rb = rb.timeout(std::time::Duration::from_millis(self.timeout_ms));
        }
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }
        let resp = rb
            .json(req)
            .send()
            .await
            .map_err(|e| Error::Agent(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Agent(format!(
                "openai_compat chat.completions HTTP {status}"
            )));
        }
        Ok(resp)
    }

    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let req = self.request(system, user, false);
        let resp = self.send(&req, true).await?;
        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Agent(e.to_string()))?;
        Ok(parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    pub async fn chat_stream(&self, system: &str, user: &str) -> Result<EventStream> {
        let req = self.request(system, user, true);
        let resp = self.send(&req, false).await?;
        Ok(delta_events(line_stream(resp)))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

struct DeltaState {
    lines: BoxStream<'static, Result<String>>,
    content: String,
    tools: BTreeMap<u64, ToolCall>,
    out: VecDeque<Result<GenerationEvent>>,
    done: bool,
}

impl DeltaState {
    fn flush_tools(&mut self) {
        for (_, tc) in std::mem::take(&mut self.tools) {
            self.out.push_back(Ok(GenerationEvent::ToolCall(tc)));
        }
    }

    fn flush_all(&mut self) {
        self.flush_tools();
        let text = std::mem::take(&mut self.content);
        if !text.is_empty() {
            self.out.push_back(Ok(GenerationEvent::Content(text)));
        }
        self.done = true;
    }

    fn apply(&mut self, chunk: StreamChunk) {
        for choice in chunk.choices {
            if let Some(c) = choice.delta.content {
                self.content.push_str(&c);
            }
            for tc in choice.delta.tool_calls {
                let entry = self.tools.entry(tc.index).or_insert_with(|| ToolCall {
                    name: String::new(),
                    arguments: String::new(),
                });
                if let Some(f) = tc.function {
                    if let Some(n) = f.name {
                        entry.name.push_str(&n);
                    }
                    if let Some(a) = f.arguments {
                        entry.arguments.push_str(&a);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.flush_tools();
            }
        }
    }
}

/// Turns chat-completions SSE lines into generation events.
///
/// Content deltas are token-sized, so they are coalesced into one `Content` event emitted at end
/// of stream (or just before a transport error). Tool calls are emitted once their choice finishes.
fn delta_events(lines: BoxStream<'static, Result<String>>) -> EventStream {
    let st = DeltaState {
        lines,
        content: String::new(),
        tools: BTreeMap::new(),
        out: VecDeque::new(),
        done: false,
    };
    futures_util::stream::unfold(st, |mut st| async move {
        loop {
            if let Some(item) = st.out.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.lines.next().await {
                Some(Ok(line)) => {
                    let Some(data) = sse_data(&line) else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        st.flush_all();
                        continue;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => st.apply(chunk),
                        Err(e) => {
                            tracing::debug!(
                                target: "answerpipe::openai_compat",
                                error = %e,
                                "skipping unparseable stream chunk"
                            );
                        }
                    }
                }
                Some(Err(e)) => {
                    st.flush_all();
                    st.out.push_back(Err(e));
                }
                None => st.flush_all(),
            }
        }
    })
    .boxed()
}

#[async_trait::async_trait]
impl GenerationAgent for OpenAiCompatClient {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn run(&self, req: &DispatchRequest) -> Result<GenerationEvent> {
        let text = self.chat(&req.system, &req.message).await?;
        Ok(GenerationEvent::Content(text))
    }

    async fn run_stream(&self, req: &DispatchRequest) -> Result<EventStream> {
        self.chat_stream(&req.system, &req.message).await
    }
}

#[async_trait::async_trait]
impl Reformatter for OpenAiCompatClient {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn reformat(&self, instruction: &str, text: &str) -> Result<String> {
        self.chat("", &format!("{instruction}\n\n{text}"))
            .await
            .map_err(|e| match e {
                Error::Agent(m) => Error::Reformat(m),
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use axum::{routing::post, Json, Router};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: String) -> OpenAiCompatClient {
        OpenAiCompatClient::new(
            reqwest::Client::new(),
            base,
            Some("sk-test".to_string()),
            "test-model".to_string(),
            5_000,
        )
    }

    #[tokio::test]
    async fn chat_returns_first_choice_content() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: axum::http::HeaderMap, Json(v): Json<serde_json::Value>| async move {
                assert_eq!(
                    headers.get("authorization").and_then(|h| h.to_str().ok()),
                    Some("Bearer sk-test")
                );
                assert_eq!(v["model"], serde_json::json!("test-model"));
                assert_eq!(v["messages"][0]["role"], serde_json::json!("system"));
                Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "Paris."}}]
                }))
            }),
        );
        let c = client(serve(app).await);
        let req = DispatchRequest {
            message: "capital of France?".to_string(),
            system: "be brief".to_string(),
            stream: false,
        };
        let ev = GenerationAgent::run(&c, &req).await.unwrap();
        assert_eq!(ev, GenerationEvent::Content("Paris.".to_string()));
    }

    #[tokio::test]
    async fn reformat_sends_instruction_and_text_as_one_user_message() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(v): Json<serde_json::Value>| async move {
                let msgs = v["messages"].as_array().cloned().unwrap_or_default();
                assert_eq!(msgs.len(), 1);
                let content = msgs[0]["content"].as_str().unwrap_or("").to_string();
                Json(serde_json::json!({
                    "choices": [{"message": {"content": content.to_uppercase()}}]
                }))
            }),
        );
        let c = client(serve(app).await);
        let out = c.reformat("Format:", "abc").await.unwrap();
        assert_eq!(out, "FORMAT:\n\nABC");
    }

    #[tokio::test]
    async fn stream_coalesces_deltas_and_reports_tool_calls() {
        let body = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"web_search","arguments":"{\"q\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"xyz\"}"}}]},"finish_reason":"tool_calls"}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo world"}}]}"#,
            ": keep-alive",
            "data: [DONE]",
            "",
        ]
        .join("\n\n");
        let app = Router::new().route("/v1/chat/completions", post(move || async move { body }));
        let c = client(serve(app).await);
        let mut tools = Vec::new();
        let events = c.chat_stream("sys", "hi").await.unwrap();
        let out = aggregate(events, |ev| {
            if let GenerationEvent::ToolCall(tc) = ev {
                tools.push(tc.clone());
            }
        })
        .await;
        assert!(out.is_complete());
        assert_eq!(out.document, "Hello world");
        assert_eq!(
            tools,
            vec![ToolCall {
                name: "web_search".to_string(),
                arguments: r#"{"q":"xyz"}"#.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn transport_error_flushes_partial_content_first() {
        let lines: Vec<Result<String>> = vec![
            Ok(r#"data: {"choices":[{"delta":{"content":"partial"}}]}"#.to_string()),
            Err(Error::Stream("reset".to_string())),
        ];
        let events = delta_events(futures_util::stream::iter(lines).boxed());
        let out = aggregate(events, |_| {}).await;
        assert_eq!(out.document, "partial");
        assert!(matches!(out.error, Some(Error::Stream(_))));
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_reformat_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let c = client(serve(app).await);
        let err = c.reformat("Format:", "abc").await.unwrap_err();
        assert!(matches!(err, Error::Reformat(ref m) if m.contains("500")), "{err}");
    }
}
