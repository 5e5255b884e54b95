use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named device parameters after schema validation (`interface`, `file`, ...).
pub type DeviceParams = BTreeMap<String, String>;

/// Identification written into an image's properties sidecar and passed
/// along with attach commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u32>,
}

/// Entry of the drive-profile catalog loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveProfile {
    pub name: String,
    pub device_type: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub block_size: Option<u32>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DriveProfile {
    pub fn properties(&self) -> DriveProperties {
        DriveProperties {
            vendor: self.vendor.clone(),
            product: self.product.clone(),
            revision: self.revision.clone(),
            block_size: self.block_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    Reboot,
    System,
}

/// Commands understood by the emulation backend. Serialized as
/// `{"command": "...", "args": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum BackendCommand {
    ServerInfo,
    HostInfo,
    TokenCheck,
    ListDevices,
    DeviceTypes,
    NetworkInfo,
    ListImages,
    ListConfigFiles,
    BridgeStatus {
        interface: String,
    },
    FileExists {
        path: String,
    },
    CreateImage {
        file_name: String,
        file_type: String,
        size: u64,
    },
    WriteDriveProperties {
        path: String,
        properties: DriveProperties,
    },
    ReadDriveProperties {
        path: String,
    },
    DeleteImage {
        file_name: String,
    },
    RenameImage {
        file_name: String,
        new_file_name: String,
    },
    CopyImage {
        file_name: String,
        new_file_name: String,
    },
    DeleteFile {
        path: String,
    },
    RenameFile {
        path: String,
        new_path: String,
    },
    CopyFile {
        path: String,
        new_path: String,
    },
    ExtractArchive {
        archive_file: String,
        members: Option<Vec<String>>,
    },
    WriteConfig {
        file_name: String,
    },
    ReadConfig {
        file_name: String,
    },
    Attach {
        scsi_id: u8,
        unit: u8,
        device_type: Option<String>,
        params: DeviceParams,
        properties: Option<DriveProperties>,
    },
    DetachAll,
    Detach {
        scsi_id: u8,
        unit: u8,
    },
    Eject {
        scsi_id: u8,
        unit: u8,
    },
    ReservedIds,
    ReserveIds {
        ids: Vec<u8>,
    },
    SetLogLevel {
        level: String,
    },
    Shutdown {
        mode: ShutdownMode,
    },
    DownloadToIso {
        url: String,
        iso_args: Vec<String>,
    },
    DownloadToDir {
        url: String,
        destination: String,
        file_name: String,
    },
    DiskInfo {
        path: String,
    },
    ManPage {
        path: String,
    },
    Logs {
        lines: String,
        scope: Option<String>,
    },
}

impl BackendCommand {
    /// Stable name used in logs and on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServerInfo => "server_info",
            Self::HostInfo => "host_info",
            Self::TokenCheck => "token_check",
            Self::ListDevices => "list_devices",
            Self::DeviceTypes => "device_types",
            Self::NetworkInfo => "network_info",
            Self::ListImages => "list_images",
            Self::ListConfigFiles => "list_config_files",
            Self::BridgeStatus { .. } => "bridge_status",
            Self::FileExists { .. } => "file_exists",
            Self::CreateImage { .. } => "create_image",
            Self::WriteDriveProperties { .. } => "write_drive_properties",
            Self::ReadDriveProperties { .. } => "read_drive_properties",
            Self::DeleteImage { .. } => "delete_image",
            Self::RenameImage { .. } => "rename_image",
            Self::CopyImage { .. } => "copy_image",
            Self::DeleteFile { .. } => "delete_file",
            Self::RenameFile { .. } => "rename_file",
            Self::CopyFile { .. } => "copy_file",
            Self::ExtractArchive { .. } => "extract_archive",
            Self::WriteConfig { .. } => "write_config",
            Self::ReadConfig { .. } => "read_config",
            Self::Attach { .. } => "attach",
            Self::DetachAll => "detach_all",
            Self::Detach { .. } => "detach",
            Self::Eject { .. } => "eject",
            Self::ReservedIds => "reserved_ids",
            Self::ReserveIds { .. } => "reserve_ids",
            Self::SetLogLevel { .. } => "set_log_level",
            Self::Shutdown { .. } => "shutdown",
            Self::DownloadToIso { .. } => "download_to_iso",
            Self::DownloadToDir { .. } => "download_to_dir",
            Self::DiskInfo { .. } => "disk_info",
            Self::ManPage { .. } => "man_page",
            Self::Logs { .. } => "logs",
        }
    }

    /// True for commands that change backend or file-system state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::ServerInfo
                | Self::HostInfo
                | Self::TokenCheck
                | Self::ListDevices
                | Self::DeviceTypes
                | Self::NetworkInfo
                | Self::ListImages
                | Self::ListConfigFiles
                | Self::BridgeStatus { .. }
                | Self::FileExists { .. }
                | Self::ReadDriveProperties { .. }
                | Self::ReservedIds
                | Self::DiskInfo { .. }
                | Self::ManPage { .. }
                | Self::Logs { .. }
        )
    }
}

/// Line sent to the backend: the command plus the caller's locale so the
/// backend can phrase its own messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    #[serde(flatten)]
    pub command: BackendCommand,
    pub locale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
