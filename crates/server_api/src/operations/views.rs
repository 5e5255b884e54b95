use serde::Deserialize;
use serde_json::{json, Value};
use shared::{domain::SessionContext, error::ErrorKind, protocol::BackendCommand};

use super::{present, relative_name, MAX_SCSI_ID};
use crate::{
    environment::environment,
    orchestrator::{OperationResult, Step, Template},
    ApiContext,
};

#[derive(Debug, Default, Deserialize)]
pub struct DiskInfoForm {
    pub file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManPageQuery {
    pub app: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsForm {
    pub lines: Option<String>,
    pub scope: Option<String>,
}

fn array(value: Option<&Value>) -> Vec<Value> {
    value
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn device_slot(device: &Value) -> (u64, u64) {
    let field = |key: &str| {
        device
            .get(key)
            .and_then(|value| value.as_u64().or_else(|| value.as_str()?.parse().ok()))
            .unwrap_or(0)
    };
    (field("id"), field("unit"))
}

/// SCSI IDs neither occupied by a device nor reserved, highest first.
pub(crate) fn free_scsi_ids(devices: &[Value], reserved: &[u8]) -> Vec<u8> {
    let occupied: Vec<u64> = devices.iter().map(|device| device_slot(device).0).collect();
    (0..=MAX_SCSI_ID)
        .rev()
        .filter(|id| !occupied.contains(&u64::from(*id)) && !reserved.contains(id))
        .collect()
}

/// Everything the main page shows.
pub async fn overview(ctx: &ApiContext, session: &SessionContext) -> OperationResult {
    let mut orch = ctx.orchestrator(session);

    let checked = orch
        .proceed(Step::required(ctx.call(BackendCommand::TokenCheck, session)).quiet())
        .await;
    if !checked {
        return orch.finish();
    }
    let token_required = crate::detail_value(orch.last_outcome(), "token_required")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if token_required && ctx.backend_token.is_none() {
        orch.reject_with_status(
            ErrorKind::PrerequisiteNotMet,
            Template::new("backend_password_protected"),
            403,
        );
        return orch.finish();
    }

    let lookups = [
        BackendCommand::ServerInfo,
        BackendCommand::ListDevices,
        BackendCommand::DeviceTypes,
        BackendCommand::ListImages,
        BackendCommand::ListConfigFiles,
        BackendCommand::NetworkInfo,
    ];
    let steps = lookups
        .into_iter()
        .map(|command| Step::required(ctx.call(command, session)).quiet())
        .collect();
    if !orch.run(steps).await {
        return orch.finish();
    }

    let carried = orch.carried().clone();
    let image_dir = carried
        .get("image_dir")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut devices = array(carried.get("device_list"));
    devices.sort_by_key(device_slot);
    let attached_images: Vec<String> = devices
        .iter()
        .filter_map(|device| device.get("image").and_then(Value::as_str))
        .filter(|image| !image.is_empty())
        .map(|image| {
            image
                .strip_prefix(&format!("{image_dir}/"))
                .unwrap_or(image)
                .to_string()
        })
        .collect();
    let units: u64 = devices.iter().map(|device| device_slot(device).1).sum();
    let reserved: Vec<u8> = array(carried.get("reserved_ids"))
        .iter()
        .filter_map(Value::as_u64)
        .filter_map(|id| u8::try_from(id).ok())
        .collect();
    ctx.reservations.sync(&reserved);
    let reservations: serde_json::Map<String, Value> = ctx
        .reservations
        .snapshot()
        .into_iter()
        .map(|(id, memo)| (id.to_string(), Value::String(memo)))
        .collect();

    orch.expose_value("scsi_ids", free_scsi_ids(&devices, &reserved));
    orch.expose_value("devices", devices);
    orch.expose_value("attached_images", attached_images);
    orch.expose_value("units", units);
    orch.expose_value("reserved_scsi_ids", reserved);
    orch.expose_value("reservations", reservations);
    for key in [
        "version",
        "image_dir",
        "log_levels",
        "current_log_level",
        "scan_depth",
        "device_types",
        "files",
        "config_files",
        "netinfo",
    ] {
        if let Some(value) = carried.get(key) {
            orch.expose_value(key, value.clone());
        }
    }
    orch.expose_value("drive_profiles", json!(ctx.drives.all()));
    orch.expose_value("locales", json!(ctx.localizer.supported()));
    orch.expose_value("properties_suffix", ctx.layout.properties_suffix.as_str());
    orch.expose_value("config_suffix", ctx.layout.config_suffix.as_str());
    orch.expose_value("cfg_dir", ctx.layout.cfg_dir.as_str());
    orch.expose_value("afp_dir", ctx.layout.afp_dir.as_str());
    orch.finish()
}

/// Environment snapshot as response data.
pub async fn environment_view(ctx: &ApiContext, session: &SessionContext) -> OperationResult {
    let snapshot = environment(ctx, session).await;
    let mut orch = ctx.orchestrator(session);
    if let Value::Object(fields) = json!(snapshot) {
        for (key, value) in fields {
            orch.expose_value(&key, value);
        }
    }
    orch.finish()
}

/// Images grouped for the drive profile page.
pub async fn drive_list(ctx: &ApiContext, session: &SessionContext) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    let listed = orch
        .proceed(
            Step::required(ctx.call(BackendCommand::ListImages, session))
                .quiet()
                .expose(&["files"]),
        )
        .await;
    if !listed {
        return orch.finish();
    }

    let profiles = ctx.drives.all();
    let of_type = |types: &[&str]| {
        json!(profiles
            .iter()
            .filter(|profile| types.contains(&profile.device_type.as_str()))
            .collect::<Vec<_>>())
    };
    orch.expose_value("hd_conf", of_type(&["SCHD"]));
    orch.expose_value("cd_conf", of_type(&["SCCD"]));
    orch.expose_value("rm_conf", of_type(&["SCRM", "SCMO"]));
    orch.finish()
}

/// Details of every attached device.
pub async fn device_info(ctx: &ApiContext, session: &SessionContext) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    let listed = orch
        .proceed(
            Step::required(ctx.call(BackendCommand::ListDevices, session))
                .quiet()
                .report_failure(Template::new("no_devices_attached"))
                .classify(ErrorKind::NotFound),
        )
        .await;
    if listed {
        let devices = array(crate::detail_value(orch.last_outcome(), "device_list"));
        orch.expose_value("devices", devices);
    }
    orch.finish()
}

pub async fn disk_info(
    ctx: &ApiContext,
    session: &SessionContext,
    form: DiskInfoForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    let Some(file_name) = orch.require(relative_name(&form.file_name, "file_name")) else {
        return orch.finish();
    };
    let looked_up = orch
        .proceed(Step::required(ctx.call(BackendCommand::ServerInfo, session)).quiet())
        .await;
    if !looked_up {
        return orch.finish();
    }
    let image_dir = crate::detail_str(orch.last_outcome(), "image_dir")
        .unwrap_or_default()
        .to_string();

    let inspected = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::DiskInfo {
                    path: crate::join(&image_dir, &file_name),
                },
                session,
            ))
            .quiet()
            .report_failure(Template::new("diskinfo_failed"))
            .expose(&["diskinfo"]),
        )
        .await;
    if inspected {
        orch.expose_value("file_name", file_name);
    }
    orch.finish()
}

const STRIPPED_MARKUP: [&str; 6] = [
    "Content-type",
    "!DOCTYPE",
    "<HTML>",
    "<HEAD>",
    "<BODY>",
    "<H1>",
];

/// Turns man2html output into a fragment that links back to this service.
pub fn format_manpage(raw: &str) -> String {
    raw.split_inclusive('\n')
        .map(|line| {
            if line.contains("/?1+") {
                line.replace("/?1+", "manpage?app=")
            } else if line.contains("man2html") {
                line.replace("<A HREF=\"/\">man2html</A>", "man2html")
            } else {
                line.to_string()
            }
        })
        .filter(|line| !STRIPPED_MARKUP.iter().any(|markup| line.contains(markup)))
        .collect()
}

pub async fn man_page(
    ctx: &ApiContext,
    session: &SessionContext,
    query: ManPageQuery,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    let app = present(&query.app).unwrap_or_default().to_string();
    if !ctx.layout.man_pages.contains(&app) {
        orch.reject(
            ErrorKind::ValidationFailed,
            Template::new("unknown_app").param("app", app),
        );
        return orch.finish();
    }

    let fetched = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::ManPage {
                    path: ctx.layout.man_page(&app),
                },
                session,
            ))
            .quiet()
            .report_failure(Template::new("manpage_failed")),
        )
        .await;
    if fetched {
        let manpage = crate::detail_str(orch.last_outcome(), "manpage")
            .map(format_manpage)
            .unwrap_or_default();
        orch.expose_value("app", app);
        orch.expose_value("manpage", manpage);
    }
    orch.finish()
}

pub async fn show_logs(
    ctx: &ApiContext,
    session: &SessionContext,
    form: LogsForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    let Some(lines) = orch.require(super::number(&form.lines, "lines")) else {
        return orch.finish();
    };
    let scope = present(&form.scope).map(str::to_string);

    let fetched = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::Logs {
                    lines: lines.to_string(),
                    scope: scope.clone(),
                },
                session,
            ))
            .quiet()
            .report_failure(Template::new("logs_failed"))
            .expose(&["logs"]),
        )
        .await;
    if fetched {
        orch.expose_value("lines", lines);
        orch.expose_value("scope", scope);
    }
    orch.finish()
}

#[cfg(test)]
#[path = "../tests/views_tests.rs"]
mod tests;
