//! Gemini text backend for the normalization pass.
//!
//! One bounded `generateContent` call per request. The API key travels in the query string, so
//! request URLs are never logged.

use answerpipe_core::{Error, Reformatter, Result};
use serde::Serialize;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn gemini_api_key_from_env() -> Option<String> {
    env("ANSWERPIPE_GEMINI_API_KEY")
        .or_else(|| env("GEMINI_API_KEY"))
        .or_else(|| env("GOOGLE_API_KEY"))
}

pub fn gemini_model_from_env() -> String {
    env("ANSWERPIPE_GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string())
}

pub fn gemini_base_url_from_env() -> String {
    env("ANSWERPIPE_GEMINI_BASE_URL")
        .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string())
}

pub fn gemini_timeout_ms_from_env() -> u64 {
    env("ANSWERPIPE_GEMINI_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(60_000)
        .clamp(200, 300_000)
}

#[derive(Debug, Serialize)]
struct ReqPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct ReqContent {
    parts: Vec<ReqPart>,
}

#[derive(Debug, Serialize)]
struct GenCfg {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct GeminiReq {
    contents: Vec<ReqContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenCfg>,
}

#[derive(Debug, Clone)]
pub struct GeminiReformatter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_ms: u64,
}

impl GeminiReformatter {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
            timeout_ms: gemini_timeout_ms_from_env(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let key = gemini_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing Gemini key (set ANSWERPIPE_GEMINI_API_KEY or GEMINI_API_KEY)".to_string(),
            )
        })?;
        Ok(Self::new(
            client,
            gemini_base_url_from_env(),
            key,
            gemini_model_from_env(),
        ))
    }

    fn endpoint(&self) -> String {
        format!(
            "{base}/v1beta/models/{model}:generateContent?key={key}",
            base = self.base_url.trim_end_matches('/'),
            model = self.model,
            key = self.api_key
        )
    }
}

/// Concatenates `candidates[0].content.parts[*].text` with newlines.
fn candidate_text(v: &serde_json::Value) -> String {
    let mut out = String::new();
    let parts = v
        .get("candidates")
        .and_then(|x| x.as_array())
        .and_then(|c| c.first())
        .and_then(|c0| c0.get("content"))
        .and_then(|x| x.get("parts"))
        .and_then(|x| x.as_array());
    for p in parts.into_iter().flatten() {
        if let Some(t) = p.get("text").and_then(|x| x.as_str()) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(t);
        }
    }
    out
}

#[async_trait::async_trait]
impl Reformatter for GeminiReformatter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn reformat(&self, instruction: &str, text: &str) -> Result<String> {
        let req = GeminiReq {
            contents: vec![ReqContent {
                parts: vec![ReqPart {
                    text: format!("{instruction}\n\n{text}"),
                }],
            }],
            generation_config: Some(GenCfg {
                temperature: Some(0.0),
            }),
        };

        let resp = self
            .client
            .post(self.endpoint())
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .json(&req)
            .send()
            .await
            // reqwest errors carry the URL, which carries the key.
            .map_err(|e| Error::Reformat(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Reformat(format!("gemini generateContent HTTP {status}")));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Reformat(e.without_url().to_string()))?;
        Ok(candidate_text(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::post, Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn candidate_text_joins_parts() {
        let v = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "a"}, {"inline": 1}, {"text": "b"}]}}]
        });
        assert_eq!(candidate_text(&v), "a\nb");
        assert_eq!(candidate_text(&serde_json::json!({})), "");
    }

    #[tokio::test]
    async fn reformat_posts_prompt_and_reads_candidates() {
        let app = Router::new().route(
            "/v1beta/models/:call",
            post(
                |axum::extract::Path(call): axum::extract::Path<String>,
                 Query(q): Query<HashMap<String, String>>,
                 Json(v): Json<serde_json::Value>| async move {
                    assert_eq!(call, "test-model:generateContent");
                    assert_eq!(q.get("key").map(String::as_str), Some("k"));
                    let prompt = v["contents"][0]["parts"][0]["text"]
                        .as_str()
                        .unwrap_or("")
                        .to_string();
                    Json(serde_json::json!({
                        "candidates": [{"content": {"parts": [{"text": prompt.replace("  ", " ")}]}}]
                    }))
                },
            ),
        );
        let base = serve(app).await;
        let r = GeminiReformatter::new(
            reqwest::Client::new(),
            base,
            "k".to_string(),
            "test-model".to_string(),
        );
        let out = r.reformat("Text to format:", "a  b").await.unwrap();
        assert_eq!(out, "Text to format:\n\na b");
    }

    #[tokio::test]
    async fn non_success_status_is_a_reformat_error() {
        let app = Router::new().route(
            "/v1beta/models/:call",
            post(|| async { axum::http::StatusCode::FORBIDDEN }),
        );
        let base = serve(app).await;
        let r = GeminiReformatter::new(
            reqwest::Client::new(),
            base,
            "k".to_string(),
            "m".to_string(),
        );
        let err = r.reformat("x", "y").await.unwrap_err();
        assert!(matches!(err, Error::Reformat(ref m) if m.contains("403")));
    }
}
