use std::collections::BTreeMap;

use futures::future;
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{Outcome, SessionContext},
    error::ErrorKind,
    protocol::{BackendCommand, DeviceParams, DriveProperties},
};

use super::{contained, exists, present, required, scsi_id, unit};
use crate::{
    orchestrator::{OperationResult, Orchestrator, Step, Template},
    params::DeviceSchema,
    ApiContext,
};

/// Form fields carrying device parameters are named `param_<name>`.
pub const PARAM_PREFIX: &str = "param_";
pub const BRIDGE_GUIDE_URL: &str = "https://github.com/akuker/RASCSI/wiki/Dayna-Port-SCSI-Link";

#[derive(Debug, Default, Deserialize)]
pub struct AttachDeviceForm {
    pub scsi_id: Option<String>,
    pub unit: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub drive_name: Option<String>,
    /// Remaining fields; only `param_*` ones are considered.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl AttachDeviceForm {
    fn submitted_params(&self) -> BTreeMap<String, String> {
        self.extra
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(PARAM_PREFIX)
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AttachImageForm {
    pub file_name: Option<String>,
    /// Image size in bytes, as listed by the backend.
    pub file_size: Option<String>,
    pub scsi_id: Option<String>,
    pub unit: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SlotForm {
    pub scsi_id: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReserveForm {
    pub scsi_id: Option<String>,
    pub memo: Option<String>,
}

async fn device_schema(
    orch: &mut Orchestrator<'_>,
    ctx: &ApiContext,
    session: &SessionContext,
) -> Option<DeviceSchema> {
    let listed = orch
        .proceed(Step::required(ctx.call(BackendCommand::DeviceTypes, session)).quiet())
        .await;
    if !listed {
        return None;
    }
    let schema = match orch.last_outcome() {
        Some(outcome) => DeviceSchema::from_outcome(outcome),
        None => return None,
    };
    match schema {
        Ok(schema) => Some(schema),
        Err(error) => {
            orch.reject(ErrorKind::BackendRejected, error.template());
            None
        }
    }
}

/// Attaches a peripheral that takes parameters instead of an image.
///
/// Parameters are validated against the backend's schema for the type. An
/// `interface` parameter requires the network bridge to be configured; if it
/// is not, nothing is attached.
pub async fn attach_device(
    ctx: &ApiContext,
    session: &SessionContext,
    form: AttachDeviceForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(id) = orch.require(scsi_id(&form.scsi_id)) else {
        return orch.finish();
    };
    let Some(lun) = orch.require(unit(&form.unit)) else {
        return orch.finish();
    };
    let Some(device_type) = orch.require(required(&form.device_type, "type")) else {
        return orch.finish();
    };
    let properties = match present(&form.drive_name) {
        Some(name) => match ctx.drives.find(name) {
            Some(profile) => Some(profile.properties()),
            None => {
                orch.reject(
                    ErrorKind::ValidationFailed,
                    Template::new("drive_profile_unknown").param("drive_name", name),
                );
                return orch.finish();
            }
        },
        None => None,
    };

    let Some(schema) = device_schema(&mut orch, ctx, session).await else {
        return orch.finish();
    };
    let validated = schema
        .validate(&device_type, &form.submitted_params())
        .map_err(|error| error.template());
    let Some(params) = orch.require(validated) else {
        return orch.finish();
    };

    if let Some(interface) = params.get("interface").cloned() {
        let bridged = orch
            .proceed(
                Step::required(ctx.call(
                    BackendCommand::BridgeStatus {
                        interface: interface.clone(),
                    },
                    session,
                ))
                .quiet()
                .report_failure(
                    Template::new("bridge_not_configured").param("interface", interface.as_str()),
                )
                .followup(Template::new("bridge_instructions").param("url", BRIDGE_GUIDE_URL))
                .classify(ErrorKind::PrerequisiteNotMet),
            )
            .await;
        if !bridged {
            return orch.finish();
        }
    }

    orch.proceed(
        Step::required(ctx.call(
            BackendCommand::Attach {
                scsi_id: id,
                unit: lun,
                device_type: Some(device_type.clone()),
                params,
                properties,
            },
            session,
        ))
        .announce(
            slot_template("device_attached", id, lun).param("device_type", device_type.as_str()),
        )
        .report_failure(slot_template("attach_failed", id, lun)),
    )
    .await;
    orch.finish()
}

fn slot_template(code: &str, id: u8, lun: u8) -> Template {
    Template::new(code)
        .param("id_number", id)
        .param("unit_number", lun)
}

/// Outcome of comparing an image size with the block size it will be used
/// with. Fails when the size is not a whole number of blocks.
fn block_size_check(file_size: u64, block_size: u32) -> Outcome {
    let outcome = if block_size == 0 || file_size % u64::from(block_size) == 0 {
        Outcome::success("block_size_ok")
    } else {
        Outcome::failure("block_size_mismatch")
    };
    outcome
        .with("file_size", file_size)
        .with("block_size", block_size)
}

/// Attaches an image file. Drive identification comes from the image's
/// properties sidecar when there is one. A size that does not fit the block
/// size only produces a warning.
pub async fn attach_image(
    ctx: &ApiContext,
    session: &SessionContext,
    form: AttachImageForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(id) = orch.require(scsi_id(&form.scsi_id)) else {
        return orch.finish();
    };
    let file_name = present(&form.file_name)
        .map(str::to_string)
        .ok_or_else(|| Template::new("no_image_file"))
        .and_then(|name| contained(&name, "file_name").map(|()| name));
    let Some(file_name) = orch.require(file_name) else {
        return orch.finish();
    };
    let Some(lun) = orch.require(unit(&form.unit)) else {
        return orch.finish();
    };
    let file_size = present(&form.file_size).and_then(|size| size.parse::<u64>().ok());
    let device_type = present(&form.device_type).map(str::to_string);

    let mut expected_block_size = None;
    if let Some(device_type) = &device_type {
        let Some(schema) = device_schema(&mut orch, ctx, session).await else {
            return orch.finish();
        };
        if schema.spec(device_type).is_none() {
            orch.reject(
                ErrorKind::ValidationFailed,
                Template::new("device_type_unknown").param("device_type", device_type.as_str()),
            );
            return orch.finish();
        }
        expected_block_size = schema.min_block_size(device_type);
    }

    let sidecar = ctx.layout.sidecar(&file_name);
    let probed = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::FileExists {
                    path: sidecar.clone(),
                },
                session,
            ))
            .quiet()
            .report_failure(
                Template::new("sidecar_probe_failed").param("file_name", file_name.as_str()),
            ),
        )
        .await;
    if !probed {
        return orch.finish();
    }

    let mut properties = None;
    if exists(orch.last_outcome()) {
        let read = orch
            .proceed(
                Step::required(ctx.call(BackendCommand::ReadDriveProperties { path: sidecar }, session))
                    .quiet(),
            )
            .await;
        if !read {
            return orch.finish();
        }
        let conf: Option<DriveProperties> = crate::detail_value(orch.last_outcome(), "conf")
            .cloned()
            .and_then(|conf| serde_json::from_value(conf).ok());
        if let Some(conf) = conf {
            expected_block_size = conf.block_size.or(expected_block_size);
            properties = Some(conf);
        }
    }

    let mut params = DeviceParams::new();
    params.insert("file".into(), file_name.clone());
    let mut announce = slot_template("image_attached", id, lun).param("file_name", file_name.as_str());
    if let Some(device_type) = &device_type {
        announce = announce.param("device_type", device_type.as_str());
    }
    let attached = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::Attach {
                    scsi_id: id,
                    unit: lun,
                    device_type,
                    params,
                    properties,
                },
                session,
            ))
            .announce(announce)
            .report_failure(
                slot_template("image_attach_failed", id, lun).param("file_name", file_name.as_str()),
            ),
        )
        .await;

    if let (true, Some(file_size), Some(block_size)) = (attached, file_size, expected_block_size) {
        orch.proceed(Step::advisory(future::ready(block_size_check(file_size, block_size))).quiet())
            .await;
    }
    orch.finish()
}

pub async fn detach_all(ctx: &ApiContext, session: &SessionContext) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    orch.proceed(
        Step::required(ctx.call(BackendCommand::DetachAll, session))
            .announce(Template::new("detached_all")),
    )
    .await;
    orch.finish()
}

pub async fn detach(ctx: &ApiContext, session: &SessionContext, form: SlotForm) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(id) = orch.require(scsi_id(&form.scsi_id)) else {
        return orch.finish();
    };
    let Some(lun) = orch.require(unit(&form.unit)) else {
        return orch.finish();
    };
    orch.proceed(
        Step::required(ctx.call(BackendCommand::Detach { scsi_id: id, unit: lun }, session))
            .announce(slot_template("detached", id, lun))
            .report_failure(slot_template("detach_failed", id, lun)),
    )
    .await;
    orch.finish()
}

/// Removes the medium from a removable device but leaves it attached.
pub async fn eject(ctx: &ApiContext, session: &SessionContext, form: SlotForm) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(id) = orch.require(scsi_id(&form.scsi_id)) else {
        return orch.finish();
    };
    let Some(lun) = orch.require(unit(&form.unit)) else {
        return orch.finish();
    };
    orch.proceed(
        Step::required(ctx.call(BackendCommand::Eject { scsi_id: id, unit: lun }, session))
            .announce(slot_template("ejected", id, lun))
            .report_failure(slot_template("eject_failed", id, lun)),
    )
    .await;
    orch.finish()
}

async fn reserved_ids(
    orch: &mut Orchestrator<'_>,
    ctx: &ApiContext,
    session: &SessionContext,
) -> Option<Vec<u8>> {
    let listed = orch
        .proceed(Step::required(ctx.call(BackendCommand::ReservedIds, session)).quiet())
        .await;
    if !listed {
        return None;
    }
    let ids = crate::detail_value(orch.last_outcome(), "ids")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_u64)
                .filter_map(|id| u8::try_from(id).ok())
                .collect()
        })
        .unwrap_or_default();
    Some(ids)
}

/// Reserves a SCSI ID and keeps the memo that goes with it.
pub async fn reserve_id(
    ctx: &ApiContext,
    session: &SessionContext,
    form: ReserveForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(id) = orch.require(scsi_id(&form.scsi_id)) else {
        return orch.finish();
    };
    let Some(mut ids) = reserved_ids(&mut orch, ctx, session).await else {
        return orch.finish();
    };
    if !ids.contains(&id) {
        ids.push(id);
    }
    ids.sort_unstable();

    let reserved = orch
        .proceed(
            Step::required(ctx.call(BackendCommand::ReserveIds { ids }, session))
                .announce(Template::new("reserved").param("id_number", id))
                .report_failure(Template::new("reserve_failed").param("id_number", id)),
        )
        .await;
    if reserved {
        ctx.reservations
            .reserve(id, form.memo.unwrap_or_default().trim());
    }
    orch.finish()
}

pub async fn release_id(
    ctx: &ApiContext,
    session: &SessionContext,
    form: ReserveForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(id) = orch.require(scsi_id(&form.scsi_id)) else {
        return orch.finish();
    };
    let Some(mut ids) = reserved_ids(&mut orch, ctx, session).await else {
        return orch.finish();
    };
    if !ids.contains(&id) {
        orch.reject(
            ErrorKind::NotFound,
            Template::new("not_reserved").param("id_number", id),
        );
        return orch.finish();
    }
    ids.retain(|reserved| *reserved != id);

    let released = orch
        .proceed(
            Step::required(ctx.call(BackendCommand::ReserveIds { ids }, session))
                .announce(Template::new("released").param("id_number", id))
                .report_failure(Template::new("release_failed").param("id_number", id)),
        )
        .await;
    if released {
        ctx.reservations.release(id);
    }
    orch.finish()
}

#[cfg(test)]
#[path = "../tests/devices_tests.rs"]
mod tests;
