use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::UserId;

/// The acting user. Supplied by the identity collaborator at the boundary;
/// there is no implicit or thread-local identity anywhere in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Option<UserId>,
    pub is_active: bool,
    pub is_superuser: bool,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            is_active: false,
            is_superuser: false,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            is_active: true,
            is_superuser: false,
        }
    }

    pub fn superuser(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            is_active: true,
            is_superuser: true,
        }
    }

    pub fn inactive(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            is_active: false,
            is_superuser: false,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Identified and active. Inactive accounts are treated as anonymous
    /// for visibility purposes.
    pub fn active_user(&self) -> Option<UserId> {
        self.user_id.filter(|_| self.is_active)
    }

    /// Superuser rights only apply while the account is active.
    pub fn is_effective_superuser(&self) -> bool {
        self.is_superuser && self.is_active
    }

    pub fn require_user(&self) -> Result<UserId, RegistryError> {
        self.active_user()
            .ok_or_else(|| RegistryError::PermissionDenied("an active user is required".into()))
    }

    /// Cache key; anonymous principals share one slot. An id gets a
    /// separate slot per active/superuser combination so a decision made
    /// for one never answers for another.
    pub fn cache_key(&self) -> String {
        match (self.user_id, self.is_active, self.is_superuser) {
            (None, _, _) => "anonymous".to_string(),
            (Some(id), true, true) => format!("su:{id}"),
            (Some(id), true, false) => id.to_string(),
            (Some(id), false, _) => format!("inactive:{id}"),
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.user_id {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "anonymous"),
        }
    }
}
