//! The one capability the engine needs from a language model: submit
//! messages, receive streamed text, optionally cancel.

use anyhow::Result;
use async_trait::async_trait;
use praxis_core::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.1,
        }
    }
}

impl From<&praxis_core::config::LlmConfig> for CompletionParams {
    fn from(cfg: &praxis_core::config::LlmConfig) -> Self {
        Self {
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    Done { stop_reason: Option<String> },
    Error(String),
}

/// Called with every text chunk as it arrives.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a streamed completion. Dropping the receiver abandons the stream.
    async fn stream_complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>>;
}

/// Drain a stream into its full text, forwarding chunks to `on_chunk`.
///
/// Returns `Cancelled` as soon as `cancel` fires; the receiver is dropped
/// so the producer stops on its next send.
pub async fn collect_text(
    mut rx: mpsc::Receiver<StreamEvent>,
    on_chunk: Option<&ChunkCallback>,
    cancel: &CancellationToken,
) -> Result<String, EngineError> {
    let mut text = String::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            event = rx.recv() => match event {
                Some(StreamEvent::TextDelta(delta)) => {
                    if let Some(cb) = on_chunk {
                        cb(&delta);
                    }
                    text.push_str(&delta);
                }
                Some(StreamEvent::Done { .. }) | None => break,
                Some(StreamEvent::Error(e)) => {
                    tracing::warn!("Stream error: {}", e);
                    return Err(EngineError::Llm(e));
                }
            },
        }
    }
    Ok(text)
}

/// Run one completion to the end and return the accumulated text.
pub async fn complete_text(
    client: &dyn LlmClient,
    system: &str,
    messages: Vec<Message>,
    params: CompletionParams,
    on_chunk: Option<&ChunkCallback>,
    cancel: &CancellationToken,
) -> Result<String, EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let rx = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        started = client.stream_complete(system, messages, params) => {
            started.map_err(|e| EngineError::Llm(format!("{e:#}")))?
        }
    };
    collect_text(rx, on_chunk, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn channel_with(events: Vec<StreamEvent>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(16);
        for ev in events {
            tx.try_send(ev).unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_collect_text_accumulates_and_forwards_chunks() {
        let rx = channel_with(vec![
            StreamEvent::TextDelta("hel".into()),
            StreamEvent::TextDelta("lo".into()),
            StreamEvent::Done { stop_reason: None },
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let cb: ChunkCallback = Arc::new(move |c| seen_cb.lock().unwrap().push(c.to_string()));
        let text = collect_text(rx, Some(&cb), &CancellationToken::new()).await.unwrap();
        assert_eq!(text, "hello");
        assert_eq!(*seen.lock().unwrap(), vec!["hel", "lo"]);
    }

    #[tokio::test]
    async fn test_collect_text_closed_channel_ends_stream() {
        let rx = channel_with(vec![StreamEvent::TextDelta("partial".into())]);
        let text = collect_text(rx, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(text, "partial");
    }

    #[tokio::test]
    async fn test_collect_text_error_event() {
        let rx = channel_with(vec![StreamEvent::Error("overloaded".into())]);
        let err = collect_text(rx, None, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, EngineError::Llm("overloaded".into()));
    }

    #[tokio::test]
    async fn test_collect_text_observes_cancellation() {
        // Sender kept alive so the stream never ends on its own.
        let (_tx, rx) = mpsc::channel::<StreamEvent>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = collect_text(rx, None, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
