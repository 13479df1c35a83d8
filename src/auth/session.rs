use serde::{Deserialize, Serialize};

use crate::auth::provider::Principal;

/// Storage key the session record is persisted under.
pub const SESSION_KEY: &str = "user";

/// The signed-in user as persisted to local storage.
///
/// Exists exactly while the identity provider reports a principal. The
/// controller is the only writer; everyone else reads snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Session {
    pub fn from_principal(principal: &Principal, token: String) -> Self {
        Self {
            uid: principal.uid.clone(),
            email: principal.email.clone(),
            name: principal.display_name.clone(),
            token,
            role: principal.role.clone(),
        }
    }

    /// Rebuild for a fresh notification, carrying the existing role label
    /// over when the principal is the same user and brings no claim of its own.
    pub fn rotated(&self, principal: &Principal, token: String) -> Self {
        let mut next = Session::from_principal(principal, token);
        if next.role.is_none() && self.uid == next.uid {
            next.role = self.role.clone();
        }
        next
    }

    /// Best display label for the UI: name, then email, then uid.
    pub fn display_label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.uid)
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}
