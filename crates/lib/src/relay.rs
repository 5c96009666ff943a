//! Completion relay: stream one upstream completion into a turn's output sink.
//!
//! Every relayed turn owns a [`StreamSession`]. The session emits the end-of-stream marker
//! exactly once: through [`StreamSession::end`] on normal and error paths, or from `Drop` when
//! the turn future is cancelled mid-stream.

use crate::channels::{IncomingMessage, OutputSink, SinkError, SinkEvent, StreamFlags};
use crate::llm::{ChatMessage, LlmBackend, LlmError};
use futures_util::StreamExt;
use std::sync::Arc;

pub const SYSTEM_INSTRUCTION: &str =
    "You are a helpful AI assistant. Respond naturally and helpfully to user queries.";

/// The only failure text a user ever sees. Upstream details stay in the logs.
pub const ERROR_FRAGMENT: &str =
    "An error occurred while processing your message. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Errored,
    Ended,
}

/// One streamed reply. Not shared across turns.
pub struct StreamSession {
    sink: Arc<dyn OutputSink>,
    state: SessionState,
}

impl StreamSession {
    pub fn open(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Idle -> Streaming; announces the stream flags.
    pub async fn begin(&mut self, flags: StreamFlags) -> Result<(), SinkError> {
        self.state = SessionState::Streaming;
        self.sink
            .send(SinkEvent::StreamInfo {
                feedback_loop: flags.feedback_loop,
                generated_by_ai: flags.generated_by_ai,
            })
            .await
    }

    pub async fn forward(&mut self, text: &str) -> Result<(), SinkError> {
        debug_assert_eq!(self.state, SessionState::Streaming);
        self.sink.send(SinkEvent::chunk(text)).await
    }

    /// Streaming -> Errored; sends the generic error fragment.
    pub async fn fail(&mut self) -> Result<(), SinkError> {
        self.state = SessionState::Errored;
        self.sink.send(SinkEvent::chunk(ERROR_FRAGMENT)).await
    }

    /// Emit the terminal marker. Consumes the session, so it cannot run twice.
    /// The state flips to `Ended` only once the send resolved; if this future is dropped while
    /// the send is pending, `Drop` still schedules the marker.
    pub async fn end(mut self) -> SessionState {
        if let Err(e) = self.sink.send(SinkEvent::End).await {
            log::debug!("relay: end-of-stream not delivered: {}", e);
        }
        self.state = SessionState::Ended;
        self.state
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.state == SessionState::Ended {
            return;
        }
        self.state = SessionState::Ended;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::debug!("relay: session dropped mid-stream, ending it");
                let sink = self.sink.clone();
                handle.spawn(async move {
                    if let Err(e) = sink.send(SinkEvent::End).await {
                        log::debug!("relay: end-of-stream not delivered: {}", e);
                    }
                });
            }
            Err(_) => log::warn!("relay: session dropped outside a runtime; end-of-stream lost"),
        }
    }
}

enum RelayFailure {
    Upstream(LlmError),
    Sink(SinkError),
}

/// Relays completions from one backend. Shared by all turns; holds no per-turn state.
#[derive(Clone)]
pub struct CompletionRelay {
    backend: Arc<dyn LlmBackend>,
    flags: StreamFlags,
}

impl CompletionRelay {
    pub fn new(backend: Arc<dyn LlmBackend>, flags: StreamFlags) -> Self {
        Self { backend, flags }
    }

    /// Stream a reply to `message` into `sink`. Only call after the tenant gate allowed the
    /// message. Always returns [`SessionState::Ended`]; failures are logged, never propagated.
    pub async fn relay(&self, message: &IncomingMessage, sink: Arc<dyn OutputSink>) -> SessionState {
        let mut session = StreamSession::open(sink);
        if let Err(e) = session.begin(self.flags).await {
            log::debug!("relay: sink rejected stream start: {}", e);
            return session.end().await;
        }
        let messages = vec![
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user(message.text.clone()),
        ];
        match self.stream_into(&mut session, messages).await {
            Ok(count) => log::info!(
                "relay: streamed {} fragment(s) to {}",
                count,
                message.conversation_id
            ),
            Err(RelayFailure::Upstream(e)) => {
                log::error!(
                    "relay: upstream streaming failed for {}: {}",
                    message.conversation_id,
                    e
                );
                if let Err(e) = session.fail().await {
                    log::debug!("relay: error fragment not delivered: {}", e);
                }
            }
            Err(RelayFailure::Sink(e)) => {
                log::debug!(
                    "relay: output for {} stopped, cancelling upstream: {}",
                    message.conversation_id,
                    e
                );
            }
        }
        session.end().await
    }

    async fn stream_into(
        &self,
        session: &mut StreamSession,
        messages: Vec<ChatMessage>,
    ) -> Result<usize, RelayFailure> {
        let mut stream = self
            .backend
            .chat_stream(messages)
            .await
            .map_err(RelayFailure::Upstream)?;
        let mut count = 0;
        while let Some(item) = stream.next().await {
            let text = item.map_err(RelayFailure::Upstream)?;
            session.forward(&text).await.map_err(RelayFailure::Sink)?;
            count += 1;
        }
        Ok(count)
    }
}
