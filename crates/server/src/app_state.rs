use std::sync::Arc;

use server_api::{operations::CredentialVerifier, ApiContext};

use crate::{render::PageRenderer, session::SessionStore};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) sessions: SessionStore,
    pub(crate) verifier: Arc<dyn CredentialVerifier>,
    pub(crate) renderer: Arc<dyn PageRenderer>,
}
