use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use backend_link::BackendConfig;
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use server_api::FileLayout;

use crate::credentials::UserAccount;

pub const DEFAULT_SETTINGS_FILE: &str = "server.toml";

/// Command-line flags. Each one given overrides the file and environment.
#[derive(Debug, Default, Parser)]
#[command(name = "emu-web", about = "Web control surface for the SCSI emulation backend")]
pub struct Cli {
    /// Port the web interface listens on.
    #[arg(long)]
    pub port: Option<u16>,
    /// Token presented to a password-protected backend.
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub backend_host: Option<String>,
    #[arg(long)]
    pub backend_port: Option<u16>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Settings file, `server.toml` when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Reload page templates on every render and log at debug level.
    #[arg(long)]
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub backend_timeout_secs: u64,
    pub backend_token: Option<String>,
    /// Host group allowed to sign in. Unset disables authentication.
    pub auth_group: Option<String>,
    pub users: Vec<UserAccount>,
    /// HS256 key for session cookies. A random one is generated when unset.
    pub session_secret: Option<String>,
    pub session_ttl_secs: i64,
    pub log_level: String,
    pub dev_mode: bool,
    pub cfg_dir: String,
    pub afp_dir: String,
    pub doc_dir: String,
    pub template_glob: String,
    pub drive_properties_file: String,
    pub default_config: String,
    pub max_body_bytes: usize,
    pub properties_suffix: String,
    pub config_suffix: String,
}

impl Default for Settings {
    fn default() -> Self {
        let layout = FileLayout::default();
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            backend_host: "localhost".into(),
            backend_port: 6868,
            backend_timeout_secs: 10,
            backend_token: None,
            auth_group: None,
            users: Vec::new(),
            session_secret: None,
            session_ttl_secs: 24 * 60 * 60,
            log_level: "warn".into(),
            dev_mode: false,
            cfg_dir: layout.cfg_dir,
            afp_dir: layout.afp_dir,
            doc_dir: layout.doc_dir,
            template_glob: "templates/**/*.html".into(),
            drive_properties_file: "/etc/emu-web/drive_properties.json".into(),
            default_config: "default".into(),
            max_body_bytes: 8 * 1024 * 1024,
            properties_suffix: layout.properties_suffix,
            config_suffix: layout.config_suffix,
        }
    }
}

impl Settings {
    pub fn backend(&self) -> BackendConfig {
        BackendConfig {
            host: self.backend_host.clone(),
            port: self.backend_port,
            timeout: Duration::from_secs(self.backend_timeout_secs),
            token: self.backend_token.clone(),
        }
    }

    pub fn layout(&self) -> FileLayout {
        FileLayout {
            cfg_dir: self.cfg_dir.clone(),
            afp_dir: self.afp_dir.clone(),
            doc_dir: self.doc_dir.clone(),
            properties_suffix: self.properties_suffix.clone(),
            config_suffix: self.config_suffix.clone(),
            ..FileLayout::default()
        }
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            let host = self
                .bind_addr
                .rsplit_once(':')
                .map_or(self.bind_addr.as_str(), |(host, _)| host);
            self.bind_addr = format!("{host}:{port}");
        }
        if let Some(password) = &cli.password {
            self.backend_token = Some(password.clone());
        }
        if let Some(host) = &cli.backend_host {
            self.backend_host = host.clone();
        }
        if let Some(port) = cli.backend_port {
            self.backend_port = port;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
        if cli.dev_mode {
            self.dev_mode = true;
        }
    }
}

/// Defaults, then the settings file, then `APP__*` variables, then flags.
pub fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let file = path.to_string_lossy();

    let layered = Config::builder()
        .add_source(Config::try_from(&Settings::default()).context("failed to encode default settings")?)
        .add_source(File::new(&file, FileFormat::Toml).required(cli.config.is_some()))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to read settings from {file}"))?;

    let mut settings: Settings = layered
        .try_deserialize()
        .context("settings are malformed")?;
    settings.apply(cli);
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
