use serde::Serialize;
use serde_json::Value;
use shared::{
    domain::{Outcome, SessionContext},
    protocol::BackendCommand,
};

use crate::ApiContext;

/// Session and host metadata echoed into every response. Fetched per
/// response since disk space and versions change between calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvSnapshot {
    pub locale: String,
    pub username: Option<String>,
    pub authenticated: bool,
    pub auth_active: bool,
    pub version: Option<String>,
    pub image_dir: Option<String>,
    pub free_disk_space_mb: Option<u64>,
    pub host: Option<String>,
    pub ip_addr: Option<String>,
    /// File suffixes the backend treats as CD-ROM, removable and
    /// magneto-optical images.
    pub cd_suffixes: Vec<String>,
    pub rm_suffixes: Vec<String>,
    pub mo_suffixes: Vec<String>,
    pub running_env: Option<String>,
    pub netatalk_configured: bool,
    pub macproxy_configured: bool,
}

/// Builds the snapshot. Backend failures leave the backend-sourced fields
/// empty instead of failing the response.
pub async fn environment(ctx: &ApiContext, session: &SessionContext) -> EnvSnapshot {
    let server = ctx.call(BackendCommand::ServerInfo, session).await;
    let host = ctx.call(BackendCommand::HostInfo, session).await;

    let text = |outcome: &Outcome, key: &str| {
        outcome
            .ok
            .then(|| outcome.get_str(key).map(str::to_string))
            .flatten()
    };
    let suffixes = |key: &str| -> Vec<String> {
        server
            .ok
            .then(|| server.get(key).and_then(Value::as_array))
            .flatten()
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let flag = |key: &str| host.ok && host.get(key).and_then(Value::as_bool).unwrap_or(false);

    EnvSnapshot {
        locale: session.locale.clone(),
        username: session.identity.clone(),
        authenticated: session.is_authenticated(),
        auth_active: ctx.auth.is_active(),
        version: text(&server, "version"),
        image_dir: text(&server, "image_dir"),
        free_disk_space_mb: host
            .ok
            .then(|| host.get("free_disk_space_mb").and_then(Value::as_u64))
            .flatten(),
        host: text(&host, "host"),
        ip_addr: text(&host, "ip_addr"),
        cd_suffixes: suffixes("cd_suffixes"),
        rm_suffixes: suffixes("rm_suffixes"),
        mo_suffixes: suffixes("mo_suffixes"),
        running_env: text(&host, "running_env"),
        netatalk_configured: flag("netatalk_configured"),
        macproxy_configured: flag("macproxy_configured"),
    }
}
