use async_trait::async_trait;
use serde::Deserialize;
use shared::{
    domain::{Category, SessionContext},
    error::ErrorKind,
};
use tracing::info;

use super::present;
use crate::{
    orchestrator::{OperationResult, Template},
    ApiContext,
};

/// Checks a username and password against the host's accounts and group
/// membership.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str, group: &str) -> bool;
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LanguageForm {
    pub locale: Option<String>,
}

/// Result of an operation that changes the session, plus the new value the
/// caller must store.
#[derive(Debug)]
pub struct SessionChange {
    pub result: OperationResult,
    pub value: Option<String>,
}

/// Signs a user in. On success `value` is the identity to store in the
/// session.
pub async fn login(
    ctx: &ApiContext,
    session: &SessionContext,
    verifier: &dyn CredentialVerifier,
    form: LoginForm,
) -> SessionChange {
    let mut orch = ctx.orchestrator(session);
    let Some(group) = ctx.auth.group.as_deref() else {
        orch.reject(ErrorKind::ValidationFailed, Template::new("auth_disabled"));
        return SessionChange {
            result: orch.finish(),
            value: None,
        };
    };

    let username = present(&form.username).unwrap_or_default();
    let password = form.password.as_deref().unwrap_or_default();
    if username.is_empty() || !verifier.verify(username, password, group).await {
        info!(username, "login rejected");
        orch.reject_with_status(
            ErrorKind::AuthorizationDenied,
            Template::new("login_failed").param("group", group),
            401,
        );
        return SessionChange {
            result: orch.finish(),
            value: None,
        };
    }

    info!(username, "login accepted");
    orch.note(
        Category::Success,
        Template::new("logged_in").param("username", username),
    );
    orch.expose_value("username", username);
    SessionChange {
        result: orch.finish(),
        value: Some(username.to_string()),
    }
}

/// The caller drops the identity from the session record.
pub fn logout(ctx: &ApiContext, session: &SessionContext) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    orch.note(Category::Success, Template::new("logged_out"));
    orch.finish()
}

/// Switches the session language. The confirmation is phrased in the new
/// language; `value` is the locale to store.
pub fn change_language(
    ctx: &ApiContext,
    session: &SessionContext,
    form: LanguageForm,
) -> SessionChange {
    let mut orch = ctx.orchestrator(session);
    let locale = present(&form.locale).unwrap_or_default().to_string();
    let Some(display_name) = ctx.localizer.display_name(&locale) else {
        orch.reject(
            ErrorKind::ValidationFailed,
            Template::new("unsupported_locale").param("locale", locale),
        );
        return SessionChange {
            result: orch.finish(),
            value: None,
        };
    };

    orch.relocalize(locale.as_str());
    orch.note(
        Category::Success,
        Template::new("language_changed").param("locale", display_name),
    );
    orch.expose_value("locale", locale.as_str());
    SessionChange {
        result: orch.finish(),
        value: Some(locale),
    }
}

#[cfg(test)]
#[path = "../tests/account_tests.rs"]
mod tests;
