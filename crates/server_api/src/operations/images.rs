use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::SessionContext,
    error::ErrorKind,
    protocol::{BackendCommand, DriveProfile},
};
use url::Url;

use super::{base_name, exists, number, present, relative_name, required, scsi_id};
use crate::{
    orchestrator::{OperationResult, Orchestrator, Step, Template},
    ApiContext,
};

const BYTES_PER_MIB: u64 = 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct CreateImageForm {
    pub file_name: Option<String>,
    /// Size in MiB.
    pub size: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub drive_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DriveForm {
    pub drive_name: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileNameForm {
    pub file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RenameForm {
    pub file_name: Option<String>,
    pub new_file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CopyForm {
    pub file_name: Option<String>,
    pub copy_file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExtractForm {
    pub archive_file: Option<String>,
    /// `|`-separated member names; empty extracts everything.
    pub archive_members: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadForm {
    pub url: Option<String>,
    /// `afp` selects the file-sharing directory, anything else the image dir.
    pub destination: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadIsoForm {
    pub scsi_id: Option<String>,
    pub url: Option<String>,
    /// Arguments for the ISO builder, whitespace separated.
    #[serde(rename = "type")]
    pub iso_args: Option<String>,
}

fn drive_profile(ctx: &ApiContext, name: &str) -> Result<DriveProfile, Template> {
    ctx.drives
        .find(name)
        .ok_or_else(|| Template::new("drive_profile_unknown").param("drive_name", name))
}

/// Empty image, plus a properties sidecar when a drive profile is chosen.
/// A failed sidecar write leaves the image in place and is reported as an
/// error alongside the creation.
pub async fn create_image(
    ctx: &ApiContext,
    session: &SessionContext,
    form: CreateImageForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(file_name) = orch.require(relative_name(&form.file_name, "file_name")) else {
        return orch.finish();
    };
    let Some(file_type) = orch.require(required(&form.file_type, "type")) else {
        return orch.finish();
    };
    let Some(size_mib) = orch.require(number(&form.size, "size")) else {
        return orch.finish();
    };
    let profile = match present(&form.drive_name) {
        Some(name) => match orch.require(drive_profile(ctx, name)) {
            Some(profile) => Some(profile),
            None => return orch.finish(),
        },
        None => None,
    };

    let full_name = format!("{file_name}.{file_type}");
    let created = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::CreateImage {
                    file_name,
                    file_type,
                    size: size_mib.saturating_mul(BYTES_PER_MIB),
                },
                session,
            ))
            .announce(Template::new("image_created").param("file_name", full_name.as_str())),
        )
        .await;
    if !created {
        return orch.finish();
    }
    orch.expose_value("image", full_name.as_str());

    if let Some(profile) = profile {
        write_properties(&mut orch, ctx, session, &full_name, &profile).await;
    }
    orch.created();
    orch.finish()
}

async fn write_properties(
    orch: &mut Orchestrator<'_>,
    ctx: &ApiContext,
    session: &SessionContext,
    image: &str,
    profile: &DriveProfile,
) -> bool {
    let path = ctx.layout.sidecar(image);
    orch.proceed(
        Step::optional(ctx.call(
            BackendCommand::WriteDriveProperties {
                path: path.clone(),
                properties: profile.properties(),
            },
            session,
        ))
        .announce(Template::new("properties_written").param("path", path.as_str()))
        .report_failure(Template::new("properties_write_failed").param("path", path.as_str())),
    )
    .await
}

/// Image sized and typed by a drive profile, with its properties sidecar.
pub async fn create_drive(
    ctx: &ApiContext,
    session: &SessionContext,
    form: DriveForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(drive_name) = orch.require(required(&form.drive_name, "drive_name")) else {
        return orch.finish();
    };
    let Some(file_name) = orch.require(relative_name(&form.file_name, "file_name")) else {
        return orch.finish();
    };
    let Some(profile) = orch.require(drive_profile(ctx, &drive_name)) else {
        return orch.finish();
    };
    let (Some(file_type), Some(size)) = (profile.file_type.clone(), profile.size) else {
        orch.reject(
            ErrorKind::ValidationFailed,
            Template::new("drive_profile_incomplete").param("drive_name", drive_name),
        );
        return orch.finish();
    };

    let full_name = format!("{file_name}.{file_type}");
    let created = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::CreateImage {
                    file_name,
                    file_type,
                    size,
                },
                session,
            ))
            .announce(Template::new("image_created").param("file_name", full_name.as_str())),
        )
        .await;
    if created {
        orch.expose_value("image", full_name.as_str());
        write_properties(&mut orch, ctx, session, &full_name, &profile).await;
        orch.created();
    }
    orch.finish()
}

/// Properties sidecar for an existing CD-ROM image.
pub async fn cdrom_properties(
    ctx: &ApiContext,
    session: &SessionContext,
    form: DriveForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(drive_name) = orch.require(required(&form.drive_name, "drive_name")) else {
        return orch.finish();
    };
    let Some(file_name) = orch.require(relative_name(&form.file_name, "file_name")) else {
        return orch.finish();
    };
    let Some(profile) = orch.require(drive_profile(ctx, &drive_name)) else {
        return orch.finish();
    };

    let path = ctx.layout.sidecar(&file_name);
    orch.proceed(
        Step::required(ctx.call(
            BackendCommand::WriteDriveProperties {
                path: path.clone(),
                properties: profile.properties(),
            },
            session,
        ))
        .announce(Template::new("properties_written").param("path", path.as_str()))
        .report_failure(Template::new("properties_write_failed").param("path", path.as_str())),
    )
    .await;
    orch.finish()
}

/// Probes for the sidecar of `file_name` and, if one exists, runs `mirror`
/// on it as an optional step. Absence is not an error.
async fn mirror_sidecar<'s>(
    orch: &mut Orchestrator<'_>,
    ctx: &'s ApiContext,
    session: &'s SessionContext,
    file_name: &str,
    mirror: impl FnOnce(String) -> Step<'s>,
) {
    let path = ctx.layout.sidecar(file_name);
    let probed = orch
        .proceed(
            Step::optional(ctx.call(BackendCommand::FileExists { path: path.clone() }, session))
                .quiet()
                .report_failure(
                    Template::new("sidecar_probe_failed").param("file_name", file_name),
                ),
        )
        .await;
    if probed && exists(orch.last_outcome()) {
        orch.proceed(mirror(path)).await;
    }
}

pub async fn delete_image(
    ctx: &ApiContext,
    session: &SessionContext,
    form: FileNameForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(file_name) = orch.require(relative_name(&form.file_name, "file_name")) else {
        return orch.finish();
    };

    let deleted = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::DeleteImage {
                    file_name: file_name.clone(),
                },
                session,
            ))
            .announce(Template::new("image_deleted").param("file_name", file_name.as_str())),
        )
        .await;
    if deleted {
        mirror_sidecar(&mut orch, ctx, session, &file_name, move |path| {
            Step::optional(ctx.call(BackendCommand::DeleteFile { path: path.clone() }, session))
                .announce(Template::new("file_deleted").param("path", path))
        })
        .await;
    }
    orch.finish()
}

pub async fn rename_image(
    ctx: &ApiContext,
    session: &SessionContext,
    form: RenameForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(file_name) = orch.require(relative_name(&form.file_name, "file_name")) else {
        return orch.finish();
    };
    let Some(new_file_name) = orch.require(relative_name(&form.new_file_name, "new_file_name")) else {
        return orch.finish();
    };

    let renamed = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::RenameImage {
                    file_name: file_name.clone(),
                    new_file_name: new_file_name.clone(),
                },
                session,
            ))
            .announce(Template::new("image_renamed").param("file_name", new_file_name.as_str())),
        )
        .await;
    if renamed {
        let new_path = ctx.layout.sidecar(&new_file_name);
        mirror_sidecar(&mut orch, ctx, session, &file_name, move |path| {
            Step::optional(ctx.call(
                BackendCommand::RenameFile {
                    path,
                    new_path: new_path.clone(),
                },
                session,
            ))
            .announce(Template::new("file_renamed").param("new_path", new_path))
        })
        .await;
    }
    orch.finish()
}

pub async fn copy_image(
    ctx: &ApiContext,
    session: &SessionContext,
    form: CopyForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(file_name) = orch.require(relative_name(&form.file_name, "file_name")) else {
        return orch.finish();
    };
    let Some(new_file_name) = orch.require(relative_name(&form.copy_file_name, "copy_file_name")) else {
        return orch.finish();
    };

    let copied = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::CopyImage {
                    file_name: file_name.clone(),
                    new_file_name: new_file_name.clone(),
                },
                session,
            ))
            .announce(Template::new("image_copied").param("file_name", new_file_name.as_str())),
        )
        .await;
    if copied {
        let new_path = ctx.layout.sidecar(&new_file_name);
        mirror_sidecar(&mut orch, ctx, session, &file_name, move |path| {
            Step::optional(ctx.call(
                BackendCommand::CopyFile {
                    path,
                    new_path: new_path.clone(),
                },
                session,
            ))
            .announce(Template::new("file_copied").param("new_path", new_path))
        })
        .await;
    }
    orch.finish()
}

/// Expands an archive, then moves every properties file it contained into
/// the configuration directory. Each move succeeds or fails on its own.
pub async fn extract_archive(
    ctx: &ApiContext,
    session: &SessionContext,
    form: ExtractForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(archive_file) = orch.require(relative_name(&form.archive_file, "archive_file")) else {
        return orch.finish();
    };
    let members = present(&form.archive_members).map(|raw| {
        raw.split('|')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    let extracted = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::ExtractArchive {
                    archive_file: archive_file.clone(),
                    members,
                },
                session,
            ))
            .announce(Template::new("archive_extracted").param("archive_file", archive_file.as_str()))
            .report_failure(
                Template::new("extract_failed").param("archive_file", archive_file.as_str()),
            )
            .expose(&["extracted"]),
        )
        .await;
    if !extracted {
        return orch.finish();
    }

    let properties_files: Vec<String> = orch
        .last_outcome()
        .and_then(|outcome| outcome.get("properties_files"))
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for path in properties_files {
        let file = base_name(&path).to_string();
        let new_path = ctx.layout.in_cfg_dir(&file);
        let directory = ctx.layout.cfg_dir.as_str();
        orch.proceed(
            Step::optional(ctx.call(BackendCommand::RenameFile { path, new_path }, session))
                .announce(
                    Template::new("properties_relocated")
                        .param("file", file.as_str())
                        .param("directory", directory),
                )
                .report_failure(
                    Template::new("properties_relocation_failed")
                        .param("file", file.as_str())
                        .param("directory", directory),
                ),
        )
        .await;
    }
    orch.finish()
}

fn download_url(form_url: &Option<String>) -> Result<(String, String), Template> {
    let raw = required(form_url, "url")?;
    let invalid = || Template::new("invalid_url").param("url", raw.as_str());
    let url = Url::parse(&raw).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https" | "ftp") {
        return Err(invalid());
    }
    let file_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(invalid)?;
    Ok((raw, file_name))
}

/// Downloads a remote file into the image directory or the AFP share.
pub async fn download_to_dir(
    ctx: &ApiContext,
    session: &SessionContext,
    form: DownloadForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some((url, file_name)) = orch.require(download_url(&form.url)) else {
        return orch.finish();
    };

    let destination = if present(&form.destination) == Some("afp") {
        ctx.layout.afp_dir.clone()
    } else {
        let looked_up = orch
            .proceed(Step::required(ctx.call(BackendCommand::ServerInfo, session)).quiet())
            .await;
        if !looked_up {
            return orch.finish();
        }
        match crate::detail_str(orch.last_outcome(), "image_dir") {
            Some(dir) => dir.to_string(),
            None => {
                orch.reject(
                    ErrorKind::BackendRejected,
                    Template::new("backend_rejected").param("code", "image_dir"),
                );
                return orch.finish();
            }
        }
    };

    orch.proceed(
        Step::required(ctx.call(
            BackendCommand::DownloadToDir {
                url: url.clone(),
                destination: destination.clone(),
                file_name: file_name.clone(),
            },
            session,
        ))
        .announce(
            Template::new("downloaded")
                .param("file_name", file_name.as_str())
                .param("destination", destination.as_str()),
        )
        .report_failure(Template::new("download_failed").param("url", url.as_str())),
    )
    .await;
    orch.finish()
}

/// Downloads a file, wraps it in a CD-ROM image and attaches that image.
/// A failed attach is reported separately since the image already exists.
pub async fn download_to_iso(
    ctx: &ApiContext,
    session: &SessionContext,
    form: DownloadIsoForm,
) -> OperationResult {
    let mut orch = ctx.orchestrator(session);
    if !orch.admit(&ctx.auth) {
        return orch.finish();
    }
    let Some(id) = orch.require(scsi_id(&form.scsi_id)) else {
        return orch.finish();
    };
    let Some((url, _)) = orch.require(download_url(&form.url)) else {
        return orch.finish();
    };
    let iso_args: Vec<String> = form
        .iso_args
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let converted = orch
        .proceed(
            Step::required(ctx.call(
                BackendCommand::DownloadToIso {
                    url: url.clone(),
                    iso_args,
                },
                session,
            ))
            .announce(Template::new("iso_created"))
            .report_failure(Template::new("iso_creation_failed").param("url", url.as_str()))
            .expose(&["file_name"]),
        )
        .await;
    if !converted {
        return orch.finish();
    }
    let Some(image) = crate::detail_str(orch.last_outcome(), "file_name").map(str::to_string)
    else {
        orch.reject(
            ErrorKind::BackendRejected,
            Template::new("backend_rejected").param("code", "file_name"),
        );
        return orch.finish();
    };

    let params = [("file".to_string(), image)].into_iter().collect();
    orch.proceed(
        Step::required(ctx.call(
            BackendCommand::Attach {
                scsi_id: id,
                unit: 0,
                device_type: Some("SCCD".into()),
                params,
                properties: None,
            },
            session,
        ))
        .announce(Template::new("iso_attached").param("id_number", id))
        .report_failure(Template::new("iso_attach_failed").param("id_number", id)),
    )
    .await;
    orch.finish()
}

#[cfg(test)]
#[path = "../tests/images_tests.rs"]
mod tests;
