//! Conversation channel plumbing: inbound activities and the outbound sink.
//!
//! The gateway parses an [`Activity`], the turn handler classifies it, and every reply for the
//! turn goes through an [`OutputSink`].

mod activity;
mod inbound;
mod sink;

pub use activity::{Activity, ActivityAccount, ActivityConversation, ActivityKind};
pub use inbound::IncomingMessage;
pub use sink::{ChannelSink, OutputSink, SinkError, SinkEvent, StreamFlags};
