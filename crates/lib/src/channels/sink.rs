//! Outbound side of a turn: everything the bot says goes through an [`OutputSink`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// One outbound event. Serialized as one NDJSON line on the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SinkEvent {
    /// Sent once before the first chunk of a streamed reply.
    #[serde(rename_all = "camelCase")]
    StreamInfo {
        feedback_loop: bool,
        generated_by_ai: bool,
    },
    /// One fragment of a streamed reply.
    Chunk { text: String },
    /// End of a streamed reply. Exactly once per stream.
    End,
    /// A complete, non-streamed message (welcome, denial).
    Message { text: String },
    /// Acknowledgment for an invoke activity.
    InvokeResponse { status: u16 },
}

impl SinkEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        SinkEvent::Chunk { text: text.into() }
    }

    pub fn message(text: impl Into<String>) -> Self {
        SinkEvent::Message { text: text.into() }
    }
}

/// Informational flags for streamed replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFlags {
    pub feedback_loop: bool,
    pub generated_by_ai: bool,
}

impl From<crate::config::StreamConfig> for StreamFlags {
    fn from(c: crate::config::StreamConfig) -> Self {
        Self {
            feedback_loop: c.feedback_loop,
            generated_by_ai: c.generated_by_ai_label,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("output channel closed")]
    Closed,
    #[error("output channel did not accept event within {0:?}")]
    Timeout(Duration),
}

/// Destination for one turn's replies. Events must be delivered in call order.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn send(&self, event: SinkEvent) -> Result<(), SinkError>;
}

/// Sink backed by a bounded mpsc channel; the gateway drains the receiver into the HTTP body.
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
    send_timeout: Duration,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SinkEvent>, send_timeout: Duration) -> Self {
        Self { tx, send_timeout }
    }

    /// New sink plus the receiving end.
    pub fn channel(capacity: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, send_timeout), rx)
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn send(&self, event: SinkEvent) -> Result<(), SinkError> {
        self.tx
            .send_timeout(event, self.send_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SinkError::Timeout(self.send_timeout),
                mpsc::error::SendTimeoutError::Closed(_) => SinkError::Closed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let line = |e: SinkEvent| serde_json::to_string(&e).unwrap();
        assert_eq!(line(SinkEvent::chunk("Hel")), r#"{"type":"chunk","text":"Hel"}"#);
        assert_eq!(line(SinkEvent::End), r#"{"type":"end"}"#);
        assert_eq!(
            line(SinkEvent::StreamInfo {
                feedback_loop: true,
                generated_by_ai: false
            }),
            r#"{"type":"streamInfo","feedbackLoop":true,"generatedByAi":false}"#
        );
        assert_eq!(
            line(SinkEvent::InvokeResponse { status: 200 }),
            r#"{"type":"invokeResponse","status":200}"#
        );
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::channel(4, Duration::from_secs(1));
        sink.send(SinkEvent::chunk("a")).await.unwrap();
        sink.send(SinkEvent::chunk("b")).await.unwrap();
        assert_eq!(rx.recv().await, Some(SinkEvent::chunk("a")));
        assert_eq!(rx.recv().await, Some(SinkEvent::chunk("b")));
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (sink, rx) = ChannelSink::channel(1, Duration::from_secs(1));
        drop(rx);
        assert_eq!(sink.send(SinkEvent::End).await, Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn full_channel_times_out() {
        let (sink, _rx) = ChannelSink::channel(1, Duration::from_millis(20));
        sink.send(SinkEvent::chunk("a")).await.unwrap();
        assert_eq!(
            sink.send(SinkEvent::chunk("b")).await,
            Err(SinkError::Timeout(Duration::from_millis(20)))
        );
    }
}
