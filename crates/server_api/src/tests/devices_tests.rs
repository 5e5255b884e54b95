use std::sync::Arc;

use backend_link::ScriptedBackend;
use serde_json::json;
use shared::domain::Category;

use super::*;
use crate::support::{context_with, locale_en, texts};

fn device_types() -> Outcome {
    Outcome::success("device_types").with(
        "device_types",
        json!({
            "SCHD": { "supports_file": true, "block_sizes": [512, 1024] },
            "SCBR": { "params": { "interface": "eth0,wlan0", "inet": "10.10.20.1/24" } },
        }),
    )
}

fn bridge_form(extra: &[(&str, &str)]) -> AttachDeviceForm {
    AttachDeviceForm {
        scsi_id: Some("6".into()),
        device_type: Some("SCBR".into()),
        extra: extra
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        ..AttachDeviceForm::default()
    }
}

#[tokio::test]
async fn unconfigured_bridge_prevents_attach() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::DeviceTypes => device_types(),
        BackendCommand::BridgeStatus { .. } => Outcome::failure("bridge_not_configured"),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = attach_device(&ctx, &locale_en(), bridge_form(&[("param_interface", "eth0")])).await;

    assert!(!result.ok);
    assert_eq!(result.error, Some(ErrorKind::PrerequisiteNotMet));
    assert_eq!(
        texts(&result),
        vec![
            (
                "The network bridge for eth0 is not configured".to_string(),
                Category::Error
            ),
            (format!("Please follow the instructions at {BRIDGE_GUIDE_URL}"), Category::Error),
        ]
    );
    assert_eq!(backend.count_of("attach"), 0);
}

#[tokio::test]
async fn configured_bridge_attaches_with_validated_params() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::DeviceTypes => device_types(),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = attach_device(
        &ctx,
        &locale_en(),
        bridge_form(&[("param_interface", "eth0"), ("param_inet", ""), ("csrf", "x")]),
    )
    .await;

    assert!(result.ok);
    assert_eq!(
        result.log.as_slice()[0].text,
        "Attached SCBR to SCSI ID 6 LUN 0"
    );
    let attach = backend
        .calls()
        .into_iter()
        .find(|command| command.name() == "attach")
        .expect("attach call");
    let BackendCommand::Attach { params, .. } = attach else {
        unreachable!();
    };
    assert_eq!(params.len(), 1);
    assert_eq!(params["interface"], "eth0");
}

#[tokio::test]
async fn unrecognized_parameter_mutates_nothing() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::DeviceTypes => device_types(),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = attach_device(&ctx, &locale_en(), bridge_form(&[("param_cmd", "reboot")])).await;

    assert!(!result.ok);
    assert_eq!(result.error, Some(ErrorKind::ValidationFailed));
    assert_eq!(result.http_status(), 400);
    assert_eq!(
        result.log.as_slice()[0].text,
        "Parameter 'cmd' is not supported by SCBR"
    );
    assert_eq!(backend.mutating_calls(), 0);
}

#[tokio::test]
async fn odd_image_size_only_warns() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::DeviceTypes => device_types(),
        BackendCommand::FileExists { .. } => Outcome::success("file_exists").with("exists", false),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = attach_image(
        &ctx,
        &locale_en(),
        AttachImageForm {
            file_name: Some("disk.hds".into()),
            file_size: Some("1000".into()),
            scsi_id: Some("1".into()),
            device_type: Some("SCHD".into()),
            ..AttachImageForm::default()
        },
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.error, None);
    assert_eq!(
        texts(&result),
        vec![
            (
                "Attached disk.hds as SCHD to SCSI ID 1 LUN 0".to_string(),
                Category::Success
            ),
            (
                "The image file size 1000 bytes is not a multiple of 512. The backend will \
                 ignore the trailing data. The image may be corrupted, so proceed with caution."
                    .to_string(),
                Category::Warning
            ),
        ]
    );
}

#[tokio::test]
async fn sidecar_properties_travel_with_attach() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::FileExists { .. } => Outcome::success("file_exists").with("exists", true),
        BackendCommand::ReadDriveProperties { .. } => Outcome::success("read_drive_properties")
            .with(
                "conf",
                json!({ "vendor": "APPLE", "product": "CD-ROM", "block_size": 2048 }),
            ),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = attach_image(
        &ctx,
        &locale_en(),
        AttachImageForm {
            file_name: Some("system.iso".into()),
            file_size: Some("4096".into()),
            scsi_id: Some("3".into()),
            ..AttachImageForm::default()
        },
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.log.count(Category::Warning), 0);
    assert_eq!(backend.count_of("device_types"), 0);
    let calls = backend.calls();
    assert_eq!(
        calls[1],
        BackendCommand::ReadDriveProperties {
            path: "/etc/emu-web/config/system.iso.properties".into()
        }
    );
    let BackendCommand::Attach { properties, params, .. } = &calls[2] else {
        panic!("third call should attach");
    };
    assert_eq!(params["file"], "system.iso");
    let properties = properties.as_ref().expect("properties");
    assert_eq!(properties.vendor.as_deref(), Some("APPLE"));
    assert_eq!(properties.block_size, Some(2048));
}

#[tokio::test]
async fn attach_without_scsi_id_is_a_validation_error() {
    let backend = Arc::new(ScriptedBackend::always_ok());
    let ctx = context_with(backend.clone());

    let result = attach_image(
        &ctx,
        &locale_en(),
        AttachImageForm {
            file_name: Some("disk.hds".into()),
            ..AttachImageForm::default()
        },
    )
    .await;

    assert_eq!(result.error, Some(ErrorKind::ValidationFailed));
    assert_eq!(result.log.as_slice()[0].text, "No SCSI ID specified");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn reservation_merges_ids_and_keeps_memo() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::ReservedIds => Outcome::success("reserved_ids").with("ids", json!([4])),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = reserve_id(
        &ctx,
        &locale_en(),
        ReserveForm {
            scsi_id: Some("1".into()),
            memo: Some(" Printer ".into()),
        },
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.log.as_slice()[0].text, "Reserved SCSI ID 1");
    assert_eq!(
        backend.calls()[1],
        BackendCommand::ReserveIds { ids: vec![1, 4] }
    );
    assert_eq!(ctx.reservations.memo(1).as_deref(), Some("Printer"));
}

#[tokio::test]
async fn releasing_unreserved_id_is_not_found() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::ReservedIds => Outcome::success("reserved_ids").with("ids", json!([4])),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = release_id(
        &ctx,
        &locale_en(),
        ReserveForm {
            scsi_id: Some("2".into()),
            memo: None,
        },
    )
    .await;

    assert!(!result.ok);
    assert_eq!(result.error, Some(ErrorKind::NotFound));
    assert_eq!(result.http_status(), 404);
    assert_eq!(result.log.as_slice()[0].text, "SCSI ID 2 is not reserved");
    assert_eq!(backend.count_of("reserve_ids"), 0);
}

#[tokio::test]
async fn release_drops_id_and_memo() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::ReservedIds => Outcome::success("reserved_ids").with("ids", json!([2, 4])),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());
    ctx.reservations.reserve(2, "Scanner");

    let result = release_id(
        &ctx,
        &locale_en(),
        ReserveForm {
            scsi_id: Some("2".into()),
            memo: None,
        },
    )
    .await;

    assert!(result.ok);
    assert_eq!(backend.calls()[1], BackendCommand::ReserveIds { ids: vec![4] });
    assert_eq!(ctx.reservations.memo(2), None);
}

#[tokio::test]
async fn detach_failure_carries_backend_reason() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::Detach { .. } => Outcome::failure("device_busy").with("msg", "device busy"),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = detach(
        &ctx,
        &locale_en(),
        SlotForm {
            scsi_id: Some("3".into()),
            unit: None,
        },
    )
    .await;

    assert!(!result.ok);
    assert_eq!(result.error, Some(ErrorKind::BackendRejected));
    assert_eq!(result.http_status(), 500);
    assert_eq!(
        texts(&result),
        vec![(
            "Failed to detach SCSI ID 3 LUN 0: device busy".to_string(),
            Category::Error
        )]
    );
}

#[tokio::test]
async fn eject_names_the_slot() {
    let backend = Arc::new(ScriptedBackend::always_ok());
    let ctx = context_with(backend.clone());

    let result = eject(
        &ctx,
        &locale_en(),
        SlotForm {
            scsi_id: Some("5".into()),
            unit: Some("1".into()),
        },
    )
    .await;

    assert!(result.ok);
    assert_eq!(backend.calls(), vec![BackendCommand::Eject { scsi_id: 5, unit: 1 }]);
    assert_eq!(
        texts(&result),
        vec![("Ejected SCSI ID 5 LUN 1".to_string(), Category::Success)]
    );
}
