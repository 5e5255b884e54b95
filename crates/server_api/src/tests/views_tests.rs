use std::sync::Arc;

use backend_link::ScriptedBackend;
use shared::{domain::Outcome, protocol::DriveProfile};

use super::*;
use crate::support::{context_with, hard_disk_profile, locale_en};

fn populated_backend(token_required: bool) -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new(move |command| match command {
        BackendCommand::TokenCheck => {
            Outcome::success("token_check").with("token_required", token_required)
        }
        BackendCommand::ServerInfo => Outcome::success("server_info")
            .with("version", "22.10.1")
            .with("image_dir", "/home/pi/images")
            .with("log_levels", json!(["trace", "debug", "info"]))
            .with("current_log_level", "info")
            .with("reserved_ids", json!([5])),
        BackendCommand::ListDevices => Outcome::success("list_devices").with(
            "device_list",
            json!([
                { "id": 2, "unit": 0, "device_type": "SCHD", "image": "/home/pi/images/b.hds" },
                { "id": 0, "unit": 1, "device_type": "SCCD", "image": "/home/pi/images/a.iso" },
                { "id": 4, "unit": 0, "device_type": "SCBR", "image": "" },
            ]),
        ),
        BackendCommand::DeviceTypes => {
            Outcome::success("device_types").with("device_types", json!({ "SCHD": {} }))
        }
        BackendCommand::ListImages => Outcome::success("list_images")
            .with("files", json!([{ "name": "b.hds", "size": 1024 }])),
        BackendCommand::ListConfigFiles => {
            Outcome::success("list_config_files").with("config_files", json!(["default.json"]))
        }
        BackendCommand::NetworkInfo => {
            Outcome::success("network_info").with("netinfo", json!({ "ifs": ["eth0"] }))
        }
        other => Outcome::success(other.name()),
    }))
}

#[tokio::test]
async fn overview_assembles_page_data() {
    let backend = populated_backend(false);
    let ctx = context_with(backend.clone());
    ctx.reservations.reserve(5, "Printer");
    ctx.reservations.reserve(6, "stale");

    let result = overview(&ctx, &locale_en()).await;

    assert!(result.ok);
    assert!(result.log.is_empty());
    assert_eq!(backend.call_count(), 7);
    let data = result.data.expect("data");
    assert_eq!(data["scsi_ids"], json!([7, 6, 3, 1]));
    assert_eq!(data["devices"][0]["id"], 0);
    assert_eq!(data["devices"][2]["id"], 4);
    assert_eq!(data["attached_images"], json!(["a.iso", "b.hds"]));
    assert_eq!(data["units"], 1);
    assert_eq!(data["reserved_scsi_ids"], json!([5]));
    assert_eq!(data["reservations"], json!({ "5": "Printer" }));
    assert_eq!(data["version"], "22.10.1");
    assert_eq!(data["config_files"], json!(["default.json"]));
    assert_eq!(data["netinfo"]["ifs"][0], "eth0");
    assert_eq!(data["cfg_dir"], "/etc/emu-web/config");
    assert_eq!(data["locales"][0]["language"], "de");
}

#[tokio::test]
async fn protected_backend_without_token_stops_after_check() {
    let backend = populated_backend(true);
    let ctx = context_with(backend.clone());

    let result = overview(&ctx, &locale_en()).await;

    assert!(!result.ok);
    assert_eq!(result.error, Some(ErrorKind::PrerequisiteNotMet));
    assert_eq!(result.http_status(), 403);
    assert_eq!(backend.calls(), vec![BackendCommand::TokenCheck]);
    assert!(result.log.as_slice()[0]
        .text
        .starts_with("The backend is password protected"));
}

#[tokio::test]
async fn protected_backend_with_token_proceeds() {
    let backend = populated_backend(true);
    let mut ctx = context_with(backend.clone());
    ctx.backend_token = Some("secret".into());

    let result = overview(&ctx, &locale_en()).await;

    assert!(result.ok);
    assert_eq!(backend.call_count(), 7);
}

#[tokio::test]
async fn overview_halts_on_unreachable_backend() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::ListDevices => Outcome::unreachable("connection refused"),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = overview(&ctx, &locale_en()).await;

    assert!(!result.ok);
    assert_eq!(result.error, Some(ErrorKind::BackendUnreachable));
    assert_eq!(result.http_status(), 503);
    assert_eq!(backend.count_of("device_types"), 0);
    assert_eq!(
        result.log.as_slice()[0].text,
        "Could not reach the emulation backend: connection refused"
    );
}

#[test]
fn free_ids_exclude_occupied_and_reserved() {
    let devices = vec![json!({ "id": "7", "unit": "0" }), json!({ "id": 3, "unit": 0 })];
    assert_eq!(free_scsi_ids(&devices, &[0, 1]), vec![6, 5, 4, 2]);
}

#[tokio::test]
async fn drive_list_groups_profiles_by_type() {
    let backend = populated_backend(false);
    let ctx = context_with(backend.clone());
    let cdrom = DriveProfile {
        name: "Apple CD 150".into(),
        device_type: "SCCD".into(),
        vendor: Some("SONY".into()),
        product: Some("CD-ROM CDU-8002".into()),
        revision: None,
        block_size: None,
        size: None,
        file_type: None,
        description: None,
    };
    ctx.drives.replace(vec![hard_disk_profile(), cdrom]);

    let result = drive_list(&ctx, &locale_en()).await;

    let data = result.data.expect("data");
    assert_eq!(data["hd_conf"][0]["name"], "DEC RZ22");
    assert_eq!(data["cd_conf"][0]["name"], "Apple CD 150");
    assert_eq!(data["rm_conf"], json!([]));
    assert_eq!(data["files"][0]["name"], "b.hds");
}

#[tokio::test]
async fn device_info_without_devices_is_not_found() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::ListDevices => Outcome::failure("no_devices"),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend);

    let result = device_info(&ctx, &locale_en()).await;

    assert_eq!(result.error, Some(ErrorKind::NotFound));
    assert_eq!(result.http_status(), 404);
    assert_eq!(result.log.as_slice()[0].text, "No devices attached");
}

#[tokio::test]
async fn disk_info_inspects_file_in_image_dir() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::ServerInfo => {
            Outcome::success("server_info").with("image_dir", "/home/pi/images")
        }
        BackendCommand::DiskInfo { .. } => {
            Outcome::success("disk_info").with("diskinfo", "Partition map: Apple")
        }
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = disk_info(
        &ctx,
        &locale_en(),
        DiskInfoForm {
            file_name: Some("disk.hds".into()),
        },
    )
    .await;

    assert_eq!(
        backend.calls()[1],
        BackendCommand::DiskInfo {
            path: "/home/pi/images/disk.hds".into()
        }
    );
    let data = result.data.expect("data");
    assert_eq!(data["diskinfo"], "Partition map: Apple");
    assert_eq!(data["file_name"], "disk.hds");
}

#[tokio::test]
async fn unknown_man_page_is_rejected_without_backend_call() {
    let backend = Arc::new(ScriptedBackend::always_ok());
    let ctx = context_with(backend.clone());

    let result = man_page(
        &ctx,
        &locale_en(),
        ManPageQuery {
            app: Some("rm".into()),
        },
    )
    .await;

    assert_eq!(result.error, Some(ErrorKind::ValidationFailed));
    assert_eq!(result.log.as_slice()[0].text, "rm is not a recognized application");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn man_page_is_formatted() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::ManPage { .. } => Outcome::success("man_page")
            .with("manpage", "<H1>EMUCTL</H1>\nSee <A HREF=\"/?1+emulator\">emulator</A>\n"),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = man_page(
        &ctx,
        &locale_en(),
        ManPageQuery {
            app: Some("emuctl".into()),
        },
    )
    .await;

    assert_eq!(
        backend.calls(),
        vec![BackendCommand::ManPage {
            path: "/usr/share/doc/emu/emuctl.1".into()
        }]
    );
    let data = result.data.expect("data");
    assert_eq!(data["app"], "emuctl");
    assert_eq!(data["manpage"], "See <A HREF=\"manpage?app=emulator\">emulator</A>\n");
}

#[test]
fn manpage_markup_is_stripped_and_links_rewritten() {
    let raw = "Content-type: text/html\n\
               <!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 3.2 Final//EN\">\n\
               <HTML><HEAD><TITLE>Man page of EMUCTL</TITLE>\n\
               <BODY>\n\
               Attach with <B>emuctl</B>, see <A HREF=\"/?1+emulator\">emulator</A>\n\
               Created by <A HREF=\"/\">man2html</A>, using the manual pages.\n";

    assert_eq!(
        format_manpage(raw),
        "Attach with <B>emuctl</B>, see <A HREF=\"manpage?app=emulator\">emulator</A>\n\
         Created by man2html, using the manual pages.\n"
    );
}

#[tokio::test]
async fn log_line_count_must_be_numeric() {
    let backend = Arc::new(ScriptedBackend::always_ok());
    let ctx = context_with(backend.clone());

    let result = show_logs(
        &ctx,
        &locale_en(),
        LogsForm {
            lines: Some("many".into()),
            scope: None,
        },
    )
    .await;

    assert_eq!(result.error, Some(ErrorKind::ValidationFailed));
    assert_eq!(result.log.as_slice()[0].text, "Invalid number for lines: many");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn logs_are_exposed_with_their_query() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::Logs { .. } => Outcome::success("logs").with("logs", "started\n"),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend.clone());

    let result = show_logs(
        &ctx,
        &locale_en(),
        LogsForm {
            lines: Some("200".into()),
            scope: Some("emuweb".into()),
        },
    )
    .await;

    assert_eq!(
        backend.calls(),
        vec![BackendCommand::Logs {
            lines: "200".into(),
            scope: Some("emuweb".into()),
        }]
    );
    let data = result.data.expect("data");
    assert_eq!(data["logs"], "started\n");
    assert_eq!(data["lines"], 200);
    assert_eq!(data["scope"], "emuweb");
}

#[tokio::test]
async fn environment_view_exposes_snapshot_fields() {
    let backend = Arc::new(ScriptedBackend::new(|command| match command {
        BackendCommand::HostInfo => Outcome::success("host_info")
            .with("host", "emupi")
            .with("free_disk_space_mb", 2048),
        other => Outcome::success(other.name()),
    }));
    let ctx = context_with(backend);

    let result = environment_view(&ctx, &locale_en()).await;

    assert!(result.ok);
    let data = result.data.expect("data");
    assert_eq!(data["locale"], "en");
    assert_eq!(data["authenticated"], false);
    assert_eq!(data["host"], "emupi");
    assert_eq!(data["free_disk_space_mb"], 2048);
    assert_eq!(data["version"], Value::Null);
}
