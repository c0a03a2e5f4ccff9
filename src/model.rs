//! Response model: the external language model behind every protocol.
//!
//! [`ResponseModel`] is the seam the router talks to. [`AnthropicModel`]
//! calls the Anthropic Messages API; [`DisabledModel`] stands in when no
//! API key is configured so retrieval-only commands keep working.
//!
//! Failures use the domain taxonomy: HTTP 429 is `RateLimited`, 5xx and
//! network errors are `ModelUnavailable`, and both are retried with
//! exponential backoff. Any other 4xx fails at once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use flipflops_core::exam::parse_exam;
use flipflops_core::models::Question;
use flipflops_core::prompt::{corrective_prompt, ModelRequest, ResponseShape};
use flipflops_core::FlipflopsError;
use tracing::{debug, warn};

use crate::config::ModelConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[async_trait]
pub trait ResponseModel: Send + Sync {
    fn name(&self) -> &str;

    /// Send one request and return the model's text.
    async fn complete(&self, request: &ModelRequest) -> Result<String, FlipflopsError>;
}

/// Run `complete` under a deadline; running out surfaces `ModelUnavailable`.
pub async fn complete_with_timeout(
    model: &dyn ResponseModel,
    request: &ModelRequest,
    timeout: Duration,
) -> Result<String, FlipflopsError> {
    match tokio::time::timeout(timeout, model.complete(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(model = model.name(), ?timeout, "model call timed out");
            Err(FlipflopsError::ModelUnavailable(format!(
                "no response within {}s",
                timeout.as_secs_f32()
            )))
        }
    }
}

/// Ask for an exam and validate it. An invalid shape gets one corrective
/// retry; a second failure surfaces `InvalidResponseShape`.
pub async fn request_exam(
    model: &dyn ResponseModel,
    request: &ModelRequest,
    timeout: Duration,
) -> Result<Vec<Question>, FlipflopsError> {
    let expected = match request.shape {
        ResponseShape::ExamJson { questions } => questions,
        ResponseShape::Text => {
            return Err(FlipflopsError::InvalidArgument(
                "exam request without an exam shape".to_string(),
            ))
        }
    };

    let raw = complete_with_timeout(model, request, timeout).await?;
    let problem = match parse_exam(&raw, expected) {
        Ok(questions) => return Ok(questions),
        Err(e) => e,
    };
    debug!(error = %problem, "exam response rejected, retrying with correction");

    let retry = corrective_prompt(request, &raw, &problem.to_string());
    let raw = complete_with_timeout(model, &retry, timeout).await?;
    parse_exam(&raw, expected)
}

// ============ Anthropic ============

pub struct AnthropicModel {
    model: String,
    api_key: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl AnthropicModel {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            url: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<String, Attempt> {
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Retry(FlipflopsError::ModelUnavailable(e.to_string())))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| Attempt::Fatal(FlipflopsError::ModelUnavailable(e.to_string())))?;
            return extract_text(&json).map_err(Attempt::Fatal);
        }

        let body_text = response.text().await.unwrap_or_default();
        let detail = error_message(&body_text);
        if status.as_u16() == 429 {
            Err(Attempt::Retry(FlipflopsError::RateLimited(detail)))
        } else if status.is_server_error() {
            Err(Attempt::Retry(FlipflopsError::ModelUnavailable(format!(
                "{}: {}",
                status, detail
            ))))
        } else {
            Err(Attempt::Fatal(FlipflopsError::ModelUnavailable(format!(
                "request rejected ({}): {}",
                status, detail
            ))))
        }
    }
}

/// Outcome of a failed HTTP attempt.
enum Attempt {
    Retry(FlipflopsError),
    Fatal(FlipflopsError),
}

#[async_trait]
impl ResponseModel for AnthropicModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, FlipflopsError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }
            match self.send_once(&body).await {
                Ok(text) => return Ok(text),
                Err(Attempt::Retry(e)) => {
                    warn!(attempt, error = %e, "model request failed");
                    last_err = Some(e);
                }
                Err(Attempt::Fatal(e)) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            FlipflopsError::ModelUnavailable("model request failed after retries".to_string())
        }))
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn extract_text(json: &serde_json::Value) -> Result<String, FlipflopsError> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| FlipflopsError::ModelUnavailable("response has no content".to_string()))?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err(FlipflopsError::ModelUnavailable(
            "response has no text content".to_string(),
        ));
    }
    Ok(text.join(""))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

// ============ Disabled ============

/// Used when `model.provider = "disabled"` or no API key is set.
pub struct DisabledModel {
    reason: String,
}

impl DisabledModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ResponseModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &ModelRequest) -> Result<String, FlipflopsError> {
        Err(FlipflopsError::ModelUnavailable(self.reason.clone()))
    }
}

/// Create the model named by `config.provider`. A missing API key falls
/// back to [`DisabledModel`] with a warning instead of failing startup.
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn ResponseModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel::new("language model is disabled"))),
        "anthropic" => match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(Arc::new(AnthropicModel::new(config, key)?)),
            _ => {
                warn!(env = %config.api_key_env, "API key not set, language model disabled");
                Ok(Arc::new(DisabledModel::new(format!(
                    "{} is not set",
                    config.api_key_env
                ))))
            }
        },
        other => bail!("Unknown model provider: {}", other),
    }
}

/// Verify a key is present without building a client; used by `init`.
pub fn api_key_status(config: &ModelConfig) -> Result<()> {
    std::env::var(&config.api_key_env)
        .map(|_| ())
        .map_err(|_| anyhow!("{} is not set", config.api_key_env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipflops_core::prompt::{exam_prompt, PromptContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ResponseModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _request: &ModelRequest) -> Result<String, FlipflopsError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| FlipflopsError::ModelUnavailable("script exhausted".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl ResponseModel for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _request: &ModelRequest) -> Result<String, FlipflopsError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("tarde demais".to_string())
        }
    }

    const EXAM: &str = r#"{"questions": [{"text": "Q", "options": ["x", "y"], "correct_answer": "b"}]}"#;

    fn request() -> ModelRequest {
        let ctx = PromptContext {
            passages: &[],
            history: &[],
            user_level: "ensino médio",
        };
        exam_prompt("biologia", 1, &ctx)
    }

    #[tokio::test]
    async fn test_timeout_is_model_unavailable() {
        let err = complete_with_timeout(&Slow, &request(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, FlipflopsError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_exam_corrective_retry() {
        let model = Scripted::new(&["não sei fazer isso", EXAM]);
        let questions = request_exam(&model, &request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(questions[0].correct, 1);
        assert_eq!(*model.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exam_second_failure_is_invalid_shape() {
        let model = Scripted::new(&["nada", "ainda nada"]);
        let err = request_exam(&model, &request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FlipflopsError::InvalidResponseShape(_)));
        assert_eq!(*model.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_disabled_model() {
        let err = DisabledModel::new("off").complete(&request()).await.unwrap_err();
        assert_eq!(err, FlipflopsError::ModelUnavailable("off".to_string()));
    }

    #[test]
    fn test_extract_text() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "Olá, "},
                {"type": "text", "text": "estudante."}
            ]
        });
        assert_eq!(extract_text(&json).unwrap(), "Olá, estudante.");
        assert!(extract_text(&serde_json::json!({"content": []})).is_err());
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(r#"{"error": {"type": "overloaded_error", "message": "Overloaded"}}"#),
            "Overloaded"
        );
        assert_eq!(error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn test_create_model_disabled() {
        let mut config = ModelConfig::default();
        config.provider = "disabled".to_string();
        assert_eq!(create_model(&config).unwrap().name(), "disabled");

        config.provider = "anthropic".to_string();
        config.api_key_env = "FLIPFLOPS_TEST_KEY_THAT_IS_NOT_SET".to_string();
        assert_eq!(create_model(&config).unwrap().name(), "disabled");
    }

    /// Serve one scripted `(status, body)` per connection; the last entry
    /// repeats. Returns the base URL and the number of requests served.
    async fn scripted_server(script: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let served = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = served.fetch_add(1, Ordering::SeqCst);
                let (status, body) = script[n.min(script.len() - 1)];
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}", addr), hits)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let Ok(n) = socket.read(&mut chunk).await else {
                return;
            };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn anthropic(base_url: String, max_retries: u32) -> AnthropicModel {
        let mut config = ModelConfig::default();
        config.base_url = base_url;
        config.max_retries = max_retries;
        config.timeout_secs = 5;
        AnthropicModel::new(&config, "test-key".to_string()).unwrap()
    }

    const OK_BODY: &str = r#"{"content": [{"type": "text", "text": "Olá, estudante."}]}"#;

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let (url, hits) = scripted_server(vec![
            (429, r#"{"error": {"message": "slow down"}}"#),
            (200, OK_BODY),
        ])
        .await;
        let text = anthropic(url, 2).complete(&request()).await.unwrap();
        assert_eq!(text, "Olá, estudante.");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let (url, hits) =
            scripted_server(vec![(400, r#"{"error": {"message": "bad request"}}"#)]).await;
        let err = anthropic(url, 3).complete(&request()).await.unwrap_err();
        match err {
            FlipflopsError::ModelUnavailable(msg) => {
                assert!(msg.contains("400"), "got: {msg}");
                assert!(msg.contains("bad request"), "got: {msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retries() {
        let (url, hits) = scripted_server(vec![(503, r#"{"error": {"message": "Overloaded"}}"#)]).await;
        let err = anthropic(url, 1).complete(&request()).await.unwrap_err();
        match err {
            FlipflopsError::ModelUnavailable(msg) => assert!(msg.contains("Overloaded"), "got: {msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_last_rate_limit_is_surfaced() {
        let (url, hits) = scripted_server(vec![(429, r#"{"error": {"message": "slow down"}}"#)]).await;
        let err = anthropic(url, 0).complete(&request()).await.unwrap_err();
        assert_eq!(err, FlipflopsError::RateLimited("slow down".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let err = anthropic(url, 0).complete(&request()).await.unwrap_err();
        assert!(matches!(err, FlipflopsError::ModelUnavailable(_)));
    }
}
