use serde::{Deserialize, Serialize};

use crate::channels::inbound::IncomingMessage;

/// Inbound Bot Framework activity (the subset the turn handler reads).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<ActivityAccount>,
    #[serde(default)]
    pub conversation: Option<ActivityConversation>,
    #[serde(default)]
    pub members_added: Option<Vec<ActivityAccount>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityAccount {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityConversation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// What the turn handler should do with an activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityKind {
    Message(IncomingMessage),
    MembersAdded,
    Invoke { name: Option<String> },
    Event { name: Option<String> },
    /// Anything else (typing, conversationUpdate without new members, ...). Ignored.
    Other(String),
}

impl Activity {
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref()?.id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.conversation
            .as_ref()?
            .tenant_id
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn classify(&self) -> ActivityKind {
        let typ = self.activity_type.as_str();
        if typ.eq_ignore_ascii_case("message") {
            let mut msg = IncomingMessage::new(
                self.text.clone().unwrap_or_default(),
                self.conversation_id().unwrap_or_default(),
            );
            msg.tenant_id = self.tenant_id().map(str::to_string);
            msg.activity_id = self.id.clone();
            msg.from_id = self.from.as_ref().and_then(|f| f.id.clone());
            ActivityKind::Message(msg)
        } else if typ.eq_ignore_ascii_case("conversationUpdate")
            && self.members_added.as_ref().is_some_and(|m| !m.is_empty())
        {
            ActivityKind::MembersAdded
        } else if typ.eq_ignore_ascii_case("invoke") {
            ActivityKind::Invoke {
                name: self.name.clone(),
            }
        } else if typ.eq_ignore_ascii_case("event") {
            ActivityKind::Event {
                name: self.name.clone(),
            }
        } else {
            ActivityKind::Other(self.activity_type.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(v: serde_json::Value) -> Activity {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn message_with_tenant() {
        let a = parse(serde_json::json!({
            "type": "message",
            "id": "a1",
            "text": "hello",
            "from": {"id": "u1"},
            "conversation": {"id": "c1", "tenantId": "t1"}
        }));
        let ActivityKind::Message(m) = a.classify() else {
            panic!("expected message");
        };
        assert_eq!(m.text, "hello");
        assert_eq!(m.conversation_id, "c1");
        assert_eq!(m.tenant_id.as_deref(), Some("t1"));
        assert_eq!(m.activity_id.as_deref(), Some("a1"));
        assert_eq!(m.from_id.as_deref(), Some("u1"));
    }

    #[test]
    fn message_without_tenant() {
        let a = parse(serde_json::json!({
            "type": "message",
            "text": "hello",
            "conversation": {"id": "c1", "tenantId": ""}
        }));
        let ActivityKind::Message(m) = a.classify() else {
            panic!("expected message");
        };
        assert_eq!(m.tenant_id, None);
    }

    #[test]
    fn conversation_update_needs_new_members() {
        let added = parse(serde_json::json!({
            "type": "conversationUpdate",
            "membersAdded": [{"id": "u1"}],
            "conversation": {"id": "c1"}
        }));
        assert_eq!(added.classify(), ActivityKind::MembersAdded);

        let removed = parse(serde_json::json!({
            "type": "conversationUpdate",
            "membersRemoved": [{"id": "u1"}],
            "conversation": {"id": "c1"}
        }));
        assert_eq!(
            removed.classify(),
            ActivityKind::Other("conversationUpdate".to_string())
        );
    }

    #[test]
    fn invoke_and_event() {
        let inv = parse(serde_json::json!({"type": "invoke", "name": "adaptiveCard/action"}));
        assert_eq!(
            inv.classify(),
            ActivityKind::Invoke {
                name: Some("adaptiveCard/action".to_string())
            }
        );
        let ev = parse(serde_json::json!({"type": "event", "name": "token/response"}));
        assert_eq!(
            ev.classify(),
            ActivityKind::Event {
                name: Some("token/response".to_string())
            }
        );
    }
}
