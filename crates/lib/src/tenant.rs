//! Tenant gate: decide whether a caller's organization may use the bot.
//!
//! An empty allow-list is public mode and permits everyone. A non-empty list permits only its
//! members. Messages without a tenant id (non-organizational channels) are governed by
//! [`MissingTenantPolicy`].

/// Tenant ids allowed to use the bot, in configuration order. Immutable after start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    ids: Vec<String>,
}

impl AllowList {
    /// Parse a comma-separated list: entries are trimmed, empty entries dropped, duplicates
    /// collapsed to their first occurrence.
    pub fn parse(raw: &str) -> Self {
        let mut ids: Vec<String> = Vec::new();
        for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }
        Self { ids }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.ids.iter().any(|id| id == tenant_id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// What to do with a message that carries no tenant id while the allow-list is non-empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingTenantPolicy {
    /// Skip the check. Lets any non-organizational channel through a restricted bot.
    #[default]
    Allow,
    /// Treat the missing id as unauthorized.
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allow,
    Deny,
}

impl AuthorizationDecision {
    pub fn is_allowed(self) -> bool {
        self == AuthorizationDecision::Allow
    }
}

/// Decide whether `tenant_id` may use the bot. Pure; no logging or I/O.
pub fn authorize(
    tenant_id: Option<&str>,
    allow_list: &AllowList,
    missing: MissingTenantPolicy,
) -> AuthorizationDecision {
    if allow_list.is_empty() {
        return AuthorizationDecision::Allow;
    }
    match tenant_id {
        Some(id) if allow_list.contains(id) => AuthorizationDecision::Allow,
        Some(_) => AuthorizationDecision::Deny,
        None => match missing {
            MissingTenantPolicy::Allow => AuthorizationDecision::Allow,
            MissingTenantPolicy::Deny => AuthorizationDecision::Deny,
        },
    }
}
