use std::fmt;

use uuid::Uuid;

/// Caller role as handed over by the authentication gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Manager,
    /// Field seller: may only move leads they own.
    Seller,
    Viewer,
    Other(String),
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            "seller" => Role::Seller,
            "viewer" => Role::Viewer,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Seller => "seller",
            Role::Viewer => "viewer",
            Role::Other(raw) => raw,
        }
    }

    pub fn is_restricted_to_own_leads(&self) -> bool {
        matches!(self, Role::Seller)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is acting on a request. `user_id` is `None` for automated callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<Uuid>,
    pub role: Role,
}

impl RequestContext {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id: Some(user_id),
            role,
        }
    }

    /// Webhooks, sweeps and other jobs without a human behind them.
    pub fn system() -> Self {
        Self {
            user_id: None,
            role: Role::Admin,
        }
    }

    /// Whether the caller may act on a lead with the given owners.
    pub fn may_touch(&self, owners: &[Uuid]) -> bool {
        if !self.role.is_restricted_to_own_leads() {
            return true;
        }
        self.user_id.is_some_and(|id| owners.contains(&id))
    }
}
