//! Streaming client for OpenAI-compatible `/chat/completions` endpoints
//! (OpenAI itself, Ollama, vLLM, LM Studio, DeepSeek...).

use super::sse::{data_payload, LineBuffer};
use crate::llm::{CompletionParams, LlmClient, Message, Role, StreamEvent};
use crate::retry::{send_with_retry, RetryPolicy};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use praxis_core::config::LlmConfig;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiCompatClient {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY not set, sending requests to {} unauthenticated", base_url);
        }

        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(cfg.request_timeout_secs))
                .build()
                .context("Failed to build HTTP client")?,
            api_key,
            base_url,
            model: cfg.model.clone(),
            retry: RetryPolicy::with_attempts(cfg.max_attempts),
        })
    }

    fn request_body(&self, system: &str, messages: &[Message], params: CompletionParams) -> Value {
        let mut chat = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            chat.push(json!({"role": "system", "content": system}));
        }
        for msg in messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            chat.push(json!({"role": role, "content": msg.content}));
        }
        json!({
            "model": self.model,
            "messages": chat,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "stream": true,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn stream_complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(system, &messages, params);

        let response = send_with_retry(&self.retry, &url, || {
            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            async move { req.send().await.context("request failed") }
        })
        .await?;

        let (tx, rx) = mpsc::channel(64);
        let bytes = response.bytes_stream();
        tokio::spawn(async move {
            if let Err(e) = parse_chat_stream(bytes, &tx).await {
                let _ = tx.send(StreamEvent::Error(format!("{e:#}"))).await;
            }
        });
        Ok(rx)
    }
}

/// Turn a chat-completions SSE body into stream events.
///
/// Stops early when the receiver has been dropped.
pub(crate) async fn parse_chat_stream<S>(mut body: S, tx: &mpsc::Sender<StreamEvent>) -> Result<()>
where
    S: futures_util::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Unpin + Send,
{
    let mut buffer = LineBuffer::new();
    let mut stop_reason = None;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("Error reading response stream")?;
        buffer.push(&chunk);
        for line in buffer.lines() {
            match handle_line(&line, &mut stop_reason) {
                LineOutcome::Text(text) => {
                    if tx.send(StreamEvent::TextDelta(text)).await.is_err() {
                        return Ok(());
                    }
                }
                LineOutcome::Done => {
                    let _ = tx.send(StreamEvent::Done { stop_reason }).await;
                    return Ok(());
                }
                LineOutcome::Error(message) => {
                    let _ = tx.send(StreamEvent::Error(message)).await;
                    return Ok(());
                }
                LineOutcome::Skip => {}
            }
        }
    }

    if let Some(tail) = buffer.finish() {
        if let LineOutcome::Text(text) = handle_line(&tail, &mut stop_reason) {
            let _ = tx.send(StreamEvent::TextDelta(text)).await;
        }
    }
    let _ = tx.send(StreamEvent::Done { stop_reason }).await;
    Ok(())
}

enum LineOutcome {
    Text(String),
    Done,
    Error(String),
    Skip,
}

fn handle_line(line: &str, stop_reason: &mut Option<String>) -> LineOutcome {
    let Some(data) = data_payload(line) else {
        return LineOutcome::Skip;
    };
    if data == "[DONE]" {
        return LineOutcome::Done;
    }
    let Ok(chunk) = serde_json::from_str::<Value>(data) else {
        tracing::debug!("Skipping unparseable stream line: {}", data);
        return LineOutcome::Skip;
    };
    if let Some(err) = chunk.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| err.to_string());
        return LineOutcome::Error(message);
    }
    let choice = &chunk["choices"][0];
    if let Some(reason) = choice["finish_reason"].as_str() {
        *stop_reason = Some(reason.to_string());
    }
    match choice["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => LineOutcome::Text(text.to_string()),
        _ => LineOutcome::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_stream(
        parts: &[&str],
    ) -> impl futures_util::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Unpin + Send
    {
        let chunks: Vec<_> = parts
            .iter()
            .map(|p| Ok(bytes::Bytes::from(p.to_string())))
            .collect();
        futures_util::stream::iter(chunks)
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn test_text_deltas_and_done() {
        let body = fake_stream(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"del",
            "ta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let (tx, rx) = mpsc::channel(32);
        parse_chat_stream(body, &tx).await.unwrap();
        drop(tx);
        let events = drain(rx).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hel".into()),
                StreamEvent::TextDelta("lo".into()),
                StreamEvent::Done {
                    stop_reason: Some("stop".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_without_done_marker() {
        let body = fake_stream(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"]);
        let (tx, rx) = mpsc::channel(32);
        parse_chat_stream(body, &tx).await.unwrap();
        drop(tx);
        let events = drain(rx).await;
        assert_eq!(events[0], StreamEvent::TextDelta("x".into()));
        assert!(matches!(events[1], StreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn test_error_payload() {
        let body = fake_stream(&["data: {\"error\":{\"message\":\"model not loaded\"}}\n"]);
        let (tx, rx) = mpsc::channel(32);
        parse_chat_stream(body, &tx).await.unwrap();
        drop(tx);
        let events = drain(rx).await;
        assert_eq!(events, vec![StreamEvent::Error("model not loaded".into())]);
    }

    #[test]
    fn test_request_body_shape() {
        let client = OpenAiCompatClient::from_config(&LlmConfig {
            base_url: Some("http://localhost:11434/v1/".into()),
            ..LlmConfig::default()
        })
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");
        let body = client.request_body(
            "sys",
            &[Message::user("hi")],
            CompletionParams {
                max_tokens: 10,
                temperature: 0.0,
            },
        );
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 10);
    }
}
