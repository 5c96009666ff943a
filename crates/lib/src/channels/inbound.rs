//! Inbound message from a channel: delivered to the turn handler for gating and relay.

/// A user message for one turn. Read-only; dropped when the turn completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub text: String,
    pub conversation_id: String,
    /// Organizational directory id; `None` on channels that do not supply one.
    pub tenant_id: Option<String>,
    /// For log correlation only.
    pub activity_id: Option<String>,
    pub from_id: Option<String>,
}

impl IncomingMessage {
    pub fn new(text: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            conversation_id: conversation_id.into(),
            tenant_id: None,
            activity_id: None,
            from_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        let t = tenant_id.into();
        self.tenant_id = if t.trim().is_empty() { None } else { Some(t) };
        self
    }

    /// First `max` characters of the text for logs (char-safe).
    pub fn preview(&self, max: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max).collect();
        if chars.next().is_some() {
            format!("{}...", head)
        } else {
            head
        }
    }
}
