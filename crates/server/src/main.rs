use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use axum::{
    routing::{get, post},
    Router,
};
use backend_link::TcpBackend;
use chrono::Duration;
use clap::Parser;
use serde_json::Value;
use server_api::{ApiContext, AuthPolicy, Catalog};
use shared::{domain::SessionContext, protocol::BackendCommand};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod credentials;
mod handlers;
mod render;
mod session;

use app_state::AppState;
use config::{load_settings, Cli};
use credentials::ConfigCredentials;
use render::TeraRenderer;
use session::SessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let level = if settings.dev_mode {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let backend = Arc::new(TcpBackend::new(settings.backend()));
    let catalog = Catalog::builtin().context("failed to load message catalog")?;
    let mut api = ApiContext::new(backend.clone(), Arc::new(catalog));
    api.auth = AuthPolicy {
        group: settings.auth_group.clone(),
    };
    api.layout = settings.layout();
    api.backend_token = settings.backend_token.clone();

    let locale = api.localizer.default_locale().to_string();
    match api
        .drives
        .load(backend.as_ref(), &settings.drive_properties_file, &locale)
        .await
    {
        Ok(count) => info!(count, "drive profiles ready"),
        Err(error) => warn!(%error, "starting without drive profiles"),
    }
    load_default_config(&api, &settings.default_config).await;

    let secret = match &settings.session_secret {
        Some(secret) => secret.clone(),
        None => {
            warn!("no session_secret configured, sessions will not survive a restart");
            uuid::Uuid::new_v4().to_string()
        }
    };
    let state = AppState {
        api,
        sessions: SessionStore::new(secret.as_bytes(), Duration::seconds(settings.session_ttl_secs)),
        verifier: Arc::new(ConfigCredentials::new(settings.users.clone())),
        renderer: Arc::new(TeraRenderer::new(&settings.template_glob, settings.dev_mode)?),
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.bind_addr))?;
    info!(%addr, backend = %backend.address(), "web interface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Attaches the devices of the default configuration, when one was saved.
async fn load_default_config(api: &ApiContext, name: &str) {
    let session = SessionContext::anonymous(api.localizer.default_locale());
    let file_name = api.layout.config_file_name(name);
    let probe = api
        .call(
            BackendCommand::FileExists {
                path: api.layout.in_cfg_dir(&file_name),
            },
            &session,
        )
        .await;
    let exists = probe.ok && probe.get("exists").and_then(Value::as_bool).unwrap_or(false);
    if !exists {
        debug!(%file_name, "no default configuration");
        return;
    }
    let outcome = api
        .call(
            BackendCommand::ReadConfig {
                file_name: file_name.clone(),
            },
            &session,
        )
        .await;
    if outcome.ok {
        info!(%file_name, "default configuration loaded");
    } else {
        warn!(%file_name, code = %outcome.code, "default configuration could not be loaded");
    }
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/", get(handlers::index))
        .route("/env", get(handlers::env_view))
        .route("/drive/list", get(handlers::drive_list))
        .route("/drive/create", post(handlers::create_drive))
        .route("/drive/cdrom", post(handlers::cdrom_properties))
        .route("/login", post(handlers::login))
        .route("/logout", get(handlers::logout))
        .route("/language", post(handlers::change_language))
        .route("/config/save", post(handlers::save_config))
        .route("/config/load", post(handlers::load_config))
        .route("/files/diskinfo", post(handlers::disk_info))
        .route("/sys/manpage", get(handlers::man_page))
        .route("/logs/show", post(handlers::show_logs))
        .route("/logs/level", post(handlers::set_log_level))
        .route("/scsi/attach_device", post(handlers::attach_device))
        .route("/scsi/attach", post(handlers::attach_image))
        .route("/scsi/detach_all", post(handlers::detach_all))
        .route("/scsi/detach", post(handlers::detach))
        .route("/scsi/eject", post(handlers::eject))
        .route("/scsi/info", post(handlers::device_info))
        .route("/scsi/reserve", post(handlers::reserve_id))
        .route("/scsi/release", post(handlers::release_id))
        .route("/pi/reboot", post(handlers::reboot))
        .route("/pi/shutdown", post(handlers::shutdown))
        .route("/files/download_to_iso", post(handlers::download_to_iso))
        .route("/files/download_url", post(handlers::download_url))
        .route("/files/create", post(handlers::create_image))
        .route("/files/delete", post(handlers::delete_image))
        .route("/files/rename", post(handlers::rename_image))
        .route("/files/copy", post(handlers::copy_image))
        .route("/files/extract_image", post(handlers::extract_archive))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
