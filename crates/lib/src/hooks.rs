//! Lifecycle responders: welcome on member-added, acknowledgment on invoke.
//! Neither touches the tenant gate or the upstream service.

use crate::channels::{OutputSink, SinkError, SinkEvent};

pub const WELCOME_MESSAGE: &str = "👋 Welcome! I'm your AI assistant powered by Azure OpenAI.\n\n\
Ask me anything in plain language and I'll stream the answer back as I write it.\n\n\
Try: *'What is Azure?'*";

pub const INVOKE_OK_STATUS: u16 = 200;

pub async fn on_members_added(sink: &dyn OutputSink) -> Result<(), SinkError> {
    sink.send(SinkEvent::message(WELCOME_MESSAGE)).await
}

pub async fn on_invoke(sink: &dyn OutputSink, name: Option<&str>) -> Result<(), SinkError> {
    log::info!("invoke activity received: {}", name.unwrap_or("(unnamed)"));
    sink.send(SinkEvent::InvokeResponse {
        status: INVOKE_OK_STATUS,
    })
    .await
}
