//! Turn handler: classify one inbound activity and run the matching path.
//!
//! message → tenant gate → (denial | completion relay); conversationUpdate with new members →
//! welcome; invoke → acknowledgment; event → logged only.

use crate::channels::{Activity, ActivityKind, IncomingMessage, OutputSink, SinkEvent, StreamFlags};
use crate::config::TenantSettings;
use crate::hooks;
use crate::llm::LlmBackend;
use crate::relay::CompletionRelay;
use crate::tenant::{self, AuthorizationDecision};
use std::sync::Arc;

pub const DENIAL_MESSAGE: &str = "I'm sorry, but your organization is not authorized to use this bot. \
Please contact your administrator for access.";

const LOG_PREVIEW_CHARS: usize = 50;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Relayed,
    Denied,
    Welcomed,
    Acknowledged,
    Ignored,
}

/// Per-process handler; built once at startup and shared by every turn.
pub struct TurnHandler {
    tenants: TenantSettings,
    relay: CompletionRelay,
}

impl TurnHandler {
    pub fn new(tenants: TenantSettings, backend: Arc<dyn LlmBackend>, flags: StreamFlags) -> Self {
        Self {
            tenants,
            relay: CompletionRelay::new(backend, flags),
        }
    }

    /// True when a non-empty allow-list is configured.
    pub fn is_restricted(&self) -> bool {
        !self.tenants.allow_list.is_empty()
    }

    pub async fn handle_activity(&self, activity: &Activity, sink: Arc<dyn OutputSink>) -> TurnOutcome {
        let turn_id = uuid::Uuid::new_v4();
        match activity.classify() {
            ActivityKind::Message(msg) => {
                log::debug!("turn {}: message activity", turn_id);
                self.on_message(&msg, sink).await
            }
            ActivityKind::MembersAdded => {
                log::debug!("turn {}: members added", turn_id);
                if let Err(e) = hooks::on_members_added(sink.as_ref()).await {
                    log::debug!("turn {}: welcome not delivered: {}", turn_id, e);
                }
                TurnOutcome::Welcomed
            }
            ActivityKind::Invoke { name } => {
                if let Err(e) = hooks::on_invoke(sink.as_ref(), name.as_deref()).await {
                    log::debug!("turn {}: invoke response not delivered: {}", turn_id, e);
                }
                TurnOutcome::Acknowledged
            }
            ActivityKind::Event { name } => {
                log::info!("event activity received: {}", name.as_deref().unwrap_or("(unnamed)"));
                TurnOutcome::Ignored
            }
            ActivityKind::Other(typ) => {
                log::debug!("turn {}: ignoring activity type {:?}", turn_id, typ);
                TurnOutcome::Ignored
            }
        }
    }

    /// Gate then relay one user message.
    pub async fn on_message(&self, msg: &IncomingMessage, sink: Arc<dyn OutputSink>) -> TurnOutcome {
        log::info!(
            "received message from {}: {}",
            msg.conversation_id,
            msg.preview(LOG_PREVIEW_CHARS)
        );
        let allow_list = &self.tenants.allow_list;
        let decision = tenant::authorize(
            msg.tenant_id.as_deref(),
            allow_list,
            self.tenants.missing_tenant,
        );
        match (decision, msg.tenant_id.as_deref()) {
            (AuthorizationDecision::Deny, tenant_id) => {
                log::warn!(
                    "unauthorized tenant access attempt: {}. allowed tenants: {:?}",
                    tenant_id.unwrap_or("(none)"),
                    allow_list.ids()
                );
                if let Err(e) = sink.send(SinkEvent::message(DENIAL_MESSAGE)).await {
                    log::debug!("denial not delivered to {}: {}", msg.conversation_id, e);
                }
                return TurnOutcome::Denied;
            }
            (AuthorizationDecision::Allow, None) if !allow_list.is_empty() => {
                log::warn!(
                    "tenant check skipped for {}: message carries no tenant id (set REQUIRE_TENANT_ID to deny)",
                    msg.conversation_id
                );
            }
            (AuthorizationDecision::Allow, Some(tenant_id)) if !allow_list.is_empty() => {
                log::info!("tenant {} authorized successfully", tenant_id);
            }
            (AuthorizationDecision::Allow, _) => {}
        }

        self.relay.relay(msg, sink).await;
        TurnOutcome::Relayed
    }
}
