//! One function per user-facing operation. Each returns an
//! [`OperationResult`](crate::OperationResult) and never fails outright.

use serde_json::Value;
use shared::{
    domain::{Outcome, SessionContext},
    error::ErrorKind,
};

use crate::{
    orchestrator::{OperationResult, Template},
    ApiContext,
};

pub mod account;
pub mod devices;
pub mod images;
pub mod system;
pub mod views;

pub use account::{change_language, login, logout, CredentialVerifier, SessionChange};
pub use devices::{
    attach_device, attach_image, detach, detach_all, eject, release_id, reserve_id,
};
pub use images::{
    cdrom_properties, copy_image, create_drive, create_image, delete_image, download_to_dir,
    download_to_iso, extract_archive, rename_image,
};
pub use system::{load_config, power, save_config, set_log_level};
pub use views::{
    device_info, disk_info, drive_list, environment_view, man_page, overview, show_logs,
};

pub const MAX_SCSI_ID: u8 = 7;
pub const MAX_UNIT: u8 = 31;

/// Result for a request whose parameters could not be decoded at all.
pub fn unreadable_request(
    ctx: &ApiContext,
    session: &SessionContext,
    detail: &str,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    orch.reject(
        ErrorKind::ValidationFailed,
        Template::new("request_unreadable").param("detail", detail),
    );
    orch.finish()
}

/// Trimmed, non-empty form value.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

pub(crate) fn required(value: &Option<String>, field: &str) -> Result<String, Template> {
    present(value)
        .map(str::to_string)
        .ok_or_else(|| Template::new("field_missing").param("field", field))
}

/// Required name that stays inside the directory it is joined to: no
/// absolute paths, no `..` components.
pub(crate) fn relative_name(value: &Option<String>, field: &str) -> Result<String, Template> {
    let name = required(value, field)?;
    contained(&name, field)?;
    Ok(name)
}

pub(crate) fn contained(name: &str, field: &str) -> Result<(), Template> {
    let escapes = name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|component| component == "..");
    if escapes {
        return Err(Template::new("unsafe_name").param("field", field).param("value", name));
    }
    Ok(())
}

pub(crate) fn scsi_id(value: &Option<String>) -> Result<u8, Template> {
    let raw = present(value).ok_or_else(|| Template::new("no_scsi_id"))?;
    raw.parse::<u8>()
        .ok()
        .filter(|id| *id <= MAX_SCSI_ID)
        .ok_or_else(|| Template::new("invalid_scsi_id").param("value", raw))
}

/// LUN, defaulting to 0 when not given.
pub(crate) fn unit(value: &Option<String>) -> Result<u8, Template> {
    let Some(raw) = present(value) else {
        return Ok(0);
    };
    raw.parse::<u8>()
        .ok()
        .filter(|unit| *unit <= MAX_UNIT)
        .ok_or_else(|| Template::new("invalid_unit").param("value", raw))
}

pub(crate) fn number(value: &Option<String>, field: &str) -> Result<u64, Template> {
    let raw = required(value, field)?;
    raw.parse::<u64>().map_err(|_| {
        Template::new("invalid_number")
            .param("field", field)
            .param("value", raw.as_str())
    })
}

/// Boolean `exists` flag of a file probe. A failed probe counts as absent.
pub(crate) fn exists(outcome: Option<&Outcome>) -> bool {
    outcome
        .filter(|outcome| outcome.ok)
        .and_then(|outcome| outcome.get("exists"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Last path component of a `/`-separated name.
pub(crate) fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scsi_id_distinguishes_missing_from_invalid() {
        assert_eq!(scsi_id(&Some("5".into())), Ok(5));
        assert_eq!(scsi_id(&Some("  ".into())).map_err(|t| t.code), Err("no_scsi_id".into()));
        assert_eq!(scsi_id(&Some("8".into())).map_err(|t| t.code), Err("invalid_scsi_id".into()));
    }

    #[test]
    fn unit_defaults_to_zero() {
        assert_eq!(unit(&None), Ok(0));
        assert_eq!(unit(&Some("3".into())), Ok(3));
        assert!(unit(&Some("x".into())).is_err());
    }

    #[test]
    fn names_must_stay_inside_their_directory() {
        assert_eq!(relative_name(&Some("disk.hds".into()), "file_name"), Ok("disk.hds".into()));
        assert_eq!(relative_name(&Some("mac/disk.hds".into()), "file_name"), Ok("mac/disk.hds".into()));
        for name in ["/etc/passwd", "../secrets", "mac/../../x", "a\\b"] {
            assert_eq!(
                relative_name(&Some(name.into()), "name").map_err(|t| t.code),
                Err("unsafe_name".into()),
                "{name}"
            );
        }
    }

    #[test]
    fn unreadable_request_is_a_validation_failure() {
        let ctx = crate::support::context_with(std::sync::Arc::new(
            backend_link::ScriptedBackend::always_ok(),
        ));

        let result = unreadable_request(&ctx, &SessionContext::anonymous("en"), "bad body");

        assert!(!result.ok);
        assert_eq!(result.error, Some(ErrorKind::ValidationFailed));
        assert_eq!(result.http_status(), 400);
        assert_eq!(result.log.as_slice()[0].text, "The request could not be read: bad body");
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("/home/pi/images/disk.hds.properties"), "disk.hds.properties");
        assert_eq!(base_name("disk.hds"), "disk.hds");
    }
}
