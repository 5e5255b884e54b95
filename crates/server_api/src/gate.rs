use serde::{Deserialize, Serialize};
use shared::{
    domain::{Outcome, SessionContext},
    error::ErrorKind,
};

/// Which sessions may invoke mutating operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPolicy {
    /// Host group whose members may sign in. `None` disables the gate.
    pub group: Option<String>,
}

impl AuthPolicy {
    pub fn group(group: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.group.is_some()
    }
}

/// Read-only authorization check run before any mutating backend call.
///
/// Identities only enter a session after a successful credential check
/// against the configured group, so a present identity is sufficient here.
pub fn authorize(session: &SessionContext, policy: &AuthPolicy) -> Outcome {
    match &policy.group {
        None => Outcome::success("authorized"),
        Some(_) if session.is_authenticated() => Outcome::success("authorized"),
        Some(group) => {
            Outcome::failure(ErrorKind::AuthorizationDenied.code()).with("group", group.as_str())
        }
    }
}
