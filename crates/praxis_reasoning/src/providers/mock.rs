//! Scripted provider: replays queued replies in order. Used by tests and by
//! `provider = "mock"` for offline dry runs.

use crate::llm::{CompletionParams, LlmClient, Message, StreamEvent};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Characters per streamed chunk, so consumers see more than one delta.
const CHUNK_CHARS: usize = 16;

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(String),
}

/// A prompt the provider has been asked to complete.
#[derive(Debug, Clone)]
pub struct RecordedPrompt {
    pub system: String,
    pub messages: Vec<Message>,
}

impl RecordedPrompt {
    /// Text of the last message, which carries the actual request.
    pub fn last_message(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<RecordedPrompt>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for r in replies {
            provider.push_reply(r);
        }
        provider
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Scripted::Reply(reply.into()));
        }
    }

    /// Queue a stream that fails mid-way.
    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Scripted::Fail(message.into()));
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedProvider {
    async fn stream_complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        _params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(RecordedPrompt {
                system: system.to_string(),
                messages,
            });
        }
        // An exhausted script answers with an empty completion.
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Scripted::Reply(String::new()));

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            match next {
                Scripted::Reply(text) => {
                    let chars: Vec<char> = text.chars().collect();
                    for piece in chars.chunks(CHUNK_CHARS) {
                        let chunk: String = piece.iter().collect();
                        if tx.send(StreamEvent::TextDelta(chunk)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(StreamEvent::Done {
                            stop_reason: Some("stop".into()),
                        })
                        .await;
                }
                Scripted::Fail(message) => {
                    let _ = tx.send(StreamEvent::Error(message)).await;
                }
            }
        });
        Ok(rx)
    }
}
