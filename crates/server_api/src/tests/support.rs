use std::sync::Arc;

use backend_link::ScriptedBackend;
use shared::{
    domain::{Category, SessionContext},
    protocol::DriveProfile,
};

use crate::{ApiContext, AuthPolicy, Catalog, OperationResult};

pub(crate) fn context_with(backend: Arc<ScriptedBackend>) -> ApiContext {
    let catalog = Catalog::builtin().expect("builtin catalog");
    ApiContext::new(backend, Arc::new(catalog))
}

pub(crate) fn gated_context(backend: Arc<ScriptedBackend>) -> ApiContext {
    let mut ctx = context_with(backend);
    ctx.auth = AuthPolicy::group("emuweb");
    ctx
}

pub(crate) fn locale_en() -> SessionContext {
    SessionContext::anonymous("en")
}

pub(crate) fn texts(result: &OperationResult) -> Vec<(String, Category)> {
    result
        .log
        .iter()
        .map(|message| (message.text.clone(), message.category))
        .collect()
}

pub(crate) fn hard_disk_profile() -> DriveProfile {
    DriveProfile {
        name: "DEC RZ22".into(),
        device_type: "SCHD".into(),
        vendor: Some("DEC".into()),
        product: Some("RZ22".into()),
        revision: Some("0A16".into()),
        block_size: Some(512),
        size: Some(52_445_184),
        file_type: Some("hds".into()),
        description: None,
    }
}
