use std::{path::Path, sync::Arc};

use backend_link::Backend;
use serde_json::Value;
use shared::{
    domain::{Outcome, SessionContext},
    protocol::BackendCommand,
};

pub mod compose;
pub mod environment;
pub mod gate;
pub mod i18n;
pub mod locale;
pub mod operations;
pub mod orchestrator;
pub mod params;
pub mod state;

pub use compose::{compose, ContentPreference, Envelope, RenderContext, Response, View};
pub use environment::{environment, EnvSnapshot};
pub use gate::{authorize, AuthPolicy};
pub use i18n::{Catalog, Localizer};
pub use orchestrator::{Criticality, OperationResult, Orchestrator, Step, Template};
pub use state::{DriveCatalog, Reservations};

/// Where auxiliary files live on the backend host, and how they are named.
#[derive(Debug, Clone)]
pub struct FileLayout {
    pub cfg_dir: String,
    pub afp_dir: String,
    pub doc_dir: String,
    pub properties_suffix: String,
    pub config_suffix: String,
    pub man_pages: Vec<String>,
}

impl Default for FileLayout {
    fn default() -> Self {
        Self {
            cfg_dir: "/etc/emu-web/config".into(),
            afp_dir: "/srv/afpshare".into(),
            doc_dir: "/usr/share/doc/emu".into(),
            properties_suffix: "properties".into(),
            config_suffix: "json".into(),
            man_pages: vec![
                "emulator".into(),
                "emuctl".into(),
                "emudump".into(),
                "emumon".into(),
            ],
        }
    }
}

impl FileLayout {
    /// Path of the properties sidecar belonging to `file_name`.
    pub fn sidecar(&self, file_name: &str) -> String {
        self.in_cfg_dir(&format!("{file_name}.{}", self.properties_suffix))
    }

    pub fn in_cfg_dir(&self, file_name: &str) -> String {
        join(&self.cfg_dir, file_name)
    }

    pub fn config_file_name(&self, name: &str) -> String {
        format!("{name}.{}", self.config_suffix)
    }

    pub fn man_page(&self, app: &str) -> String {
        join(&self.doc_dir, &format!("{app}.1"))
    }
}

pub(crate) fn join(dir: &str, file_name: &str) -> String {
    Path::new(dir).join(file_name).to_string_lossy().into_owned()
}

/// Everything an operation needs besides its parameters and session.
#[derive(Clone)]
pub struct ApiContext {
    pub backend: Arc<dyn Backend>,
    pub localizer: Arc<dyn Localizer>,
    pub auth: AuthPolicy,
    pub layout: FileLayout,
    pub drives: DriveCatalog,
    pub reservations: Reservations,
    /// Token the web layer presents to the backend, if one was configured.
    pub backend_token: Option<String>,
}

impl ApiContext {
    pub fn new(backend: Arc<dyn Backend>, localizer: Arc<dyn Localizer>) -> Self {
        Self {
            backend,
            localizer,
            auth: AuthPolicy::default(),
            layout: FileLayout::default(),
            drives: DriveCatalog::default(),
            reservations: Reservations::default(),
            backend_token: None,
        }
    }

    pub fn orchestrator<'a>(&'a self, session: &'a SessionContext) -> Orchestrator<'a> {
        Orchestrator::new(self.localizer.as_ref(), session)
    }

    pub async fn call(&self, command: BackendCommand, session: &SessionContext) -> Outcome {
        self.backend.call(command, &session.locale).await
    }
}

pub(crate) fn detail_str<'a>(outcome: Option<&'a Outcome>, key: &str) -> Option<&'a str> {
    outcome.and_then(|outcome| outcome.get_str(key))
}

pub(crate) fn detail_value<'a>(outcome: Option<&'a Outcome>, key: &str) -> Option<&'a Value> {
    outcome.and_then(|outcome| outcome.get(key))
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod support;
