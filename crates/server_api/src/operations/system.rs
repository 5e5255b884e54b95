use serde::Deserialize;
use shared::{
    domain::SessionContext,
    error::ErrorKind,
    protocol::{BackendCommand, ShutdownMode},
};

use super::{contained, present, relative_name};
use crate::{
    orchestrator::{OperationResult, Step, Template},
    ApiContext,
};

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_CONFIG_NAME: &str = "default";

#[derive(Debug, Default, Deserialize)]
pub struct LogLevelForm {
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigForm {
    pub name: Option<String>,
    /// Presence selects the action; the value is ignored.
    pub load: Option<String>,
    pub delete: Option<String>,
}

pub async fn set_log_level(
    ctx: &ApiContext,
    session: &SessionContext,
    form: LogLevelForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let level = present(&form.level).unwrap_or(DEFAULT_LOG_LEVEL).to_string();
    orch.proceed(
        Step::required(ctx.call(
            BackendCommand::SetLogLevel {
                level: level.clone(),
            },
            session,
        ))
        .announce(Template::new("log_level_set").param("value", level)),
    )
    .await;
    orch.finish()
}

/// Reboots or powers off the host.
pub async fn power(
    ctx: &ApiContext,
    session: &SessionContext,
    mode: ShutdownMode,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let announce = match mode {
        ShutdownMode::Reboot => Template::new("rebooting"),
        ShutdownMode::System => Template::new("shutting_down"),
    };
    orch.proceed(
        Step::required(ctx.call(BackendCommand::Shutdown { mode }, session)).announce(announce),
    )
    .await;
    orch.finish()
}

/// Snapshots the attached devices into a named configuration file.
pub async fn save_config(
    ctx: &ApiContext,
    session: &SessionContext,
    form: ConfigForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let name = present(&form.name).unwrap_or(DEFAULT_CONFIG_NAME);
    if orch.require(contained(name, "name")).is_none() {
        return orch.finish();
    }
    let file_name = ctx.layout.config_file_name(name);
    orch.proceed(
        Step::required(ctx.call(
            BackendCommand::WriteConfig {
                file_name: file_name.clone(),
            },
            session,
        ))
        .announce(Template::new("config_saved").param("file_name", file_name.as_str()))
        .expose(&["file_name"]),
    )
    .await;
    orch.finish()
}

/// Loads or deletes a configuration file, depending on which action field
/// the form carries.
pub async fn load_config(
    ctx: &ApiContext,
    session: &SessionContext,
    form: ConfigForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(file_name) = orch.require(relative_name(&form.name, "name")) else {
        return orch.finish();
    };

    if form.load.is_some() {
        orch.proceed(
            Step::required(ctx.call(
                BackendCommand::ReadConfig {
                    file_name: file_name.clone(),
                },
                session,
            ))
            .announce(Template::new("config_loaded").param("file_name", file_name.as_str())),
        )
        .await;
    } else if form.delete.is_some() {
        let path = ctx.layout.in_cfg_dir(&file_name);
        orch.proceed(
            Step::required(ctx.call(BackendCommand::DeleteFile { path: path.clone() }, session))
                .announce(Template::new("file_deleted").param("path", path.as_str())),
        )
        .await;
    } else {
        orch.reject(ErrorKind::ValidationFailed, Template::new("config_action_missing"));
    }
    orch.finish()
}
