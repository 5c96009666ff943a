//! In-memory sink and scripted backend for unit tests.

use crate::channels::{OutputSink, SinkError, SinkEvent};
use crate::llm::{ChatMessage, ChunkStream, LlmBackend, LlmError};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Records accepted events. With `closing_after(n)` it accepts `n` events and then reports
/// `SinkError::Closed`, like a client that went away. With `slow_end(d)` every End send waits
/// `d` before it is recorded, like a client that stopped reading.
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    accept_limit: Option<usize>,
    end_delay: Option<Duration>,
    end_attempts: AtomicUsize,
}

impl RecordingSink {
    pub(crate) fn closing_after(n: usize) -> Self {
        Self {
            accept_limit: Some(n),
            ..Self::default()
        }
    }

    pub(crate) fn slow_end(delay: Duration) -> Self {
        Self {
            end_delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn end_attempts(&self) -> usize {
        self.end_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn send(&self, event: SinkEvent) -> Result<(), SinkError> {
        if event == SinkEvent::End {
            self.end_attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.end_delay {
                tokio::time::sleep(delay).await;
            }
        }
        let mut events = self.events.lock().unwrap();
        if self.accept_limit.is_some_and(|n| events.len() >= n) {
            return Err(SinkError::Closed);
        }
        events.push(event);
        Ok(())
    }
}

/// Backend that replays a fixed script. `Err(msg)` items become stream errors.
pub(crate) struct ScriptedBackend {
    items: Vec<Result<&'static str, &'static str>>,
    fail_open: bool,
    hang: bool,
    calls: AtomicUsize,
    last_messages: Mutex<Option<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    pub(crate) fn new(items: Vec<Result<&'static str, &'static str>>) -> Self {
        Self {
            items,
            fail_open: false,
            hang: false,
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(None),
        }
    }

    pub(crate) fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new(Vec::new())
        }
    }

    /// After the scripted items, never yield again and never finish.
    pub(crate) fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.last_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn chat_stream(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = Some(messages);
        if self.fail_open {
            return Err(LlmError::Api {
                status: 429,
                body: "rate limited".to_string(),
            });
        }
        let items: Vec<Result<String, LlmError>> = self
            .items
            .iter()
            .map(|r| match r {
                Ok(t) => Ok(t.to_string()),
                Err(e) => Err(LlmError::Stream(e.to_string())),
            })
            .collect();
        let scripted = futures_util::stream::iter(items);
        if self.hang {
            Ok(scripted.chain(futures_util::stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }
}
