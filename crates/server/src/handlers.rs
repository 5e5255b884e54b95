//! HTTP surface: one handler per operation. Handlers only parse the request,
//! run the operation and hand the result to [`respond`].

use std::{convert::Infallible, sync::Arc};

use axum::{
    async_trait,
    extract::{rejection::FormRejection, FromRequestParts, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde_json::{json, Value};
use server_api::{
    compose,
    environment,
    locale::resolve_locale,
    operations::{
        self,
        account::{LanguageForm, LoginForm},
        devices::{AttachDeviceForm, AttachImageForm, ReserveForm, SlotForm},
        images::{
            CopyForm, CreateImageForm, DownloadForm, DownloadIsoForm, DriveForm, ExtractForm,
            FileNameForm, RenameForm,
        },
        system::{ConfigForm, LogLevelForm},
        views::{DiskInfoForm, LogsForm, ManPageQuery},
    },
    ContentPreference, OperationResult, RenderContext, View,
};
use shared::{
    domain::SessionContext,
    protocol::ShutdownMode,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{app_state::AppState, session::SESSION_COOKIE};

const ERROR_PAGE: &str = "error.html";

/// The caller's session, created on first contact.
pub(crate) struct CurrentSession {
    id: Uuid,
    context: SessionContext,
}

fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find_map(|(key, value)| (key == name).then_some(value))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let id = match cookie(&parts.headers, SESSION_COOKIE).map(|token| state.sessions.resolve(token)) {
            Some(Ok(id)) => id,
            Some(Err(error)) => {
                debug!(%error, "starting a new session");
                state.sessions.create()
            }
            None => state.sessions.create(),
        };
        let record = state.sessions.get(id);
        let accept_language = parts
            .headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok());
        let stored = record.as_ref().and_then(|record| record.locale.as_deref());
        let locale = resolve_locale(stored, accept_language, state.api.localizer.as_ref());
        if stored != Some(locale.as_str()) {
            state.sessions.set_locale(id, locale.clone());
        }
        Ok(Self {
            id,
            context: SessionContext {
                identity: record.and_then(|record| record.identity),
                locale,
            },
        })
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn preference(headers: &HeaderMap) -> ContentPreference {
    ContentPreference::from_accept(headers.get(header::ACCEPT).and_then(|value| value.to_str().ok()))
}

fn with_cookie(state: &AppState, id: Uuid, mut response: Response) -> Response {
    match state.sessions.issue(id) {
        Ok(token) => {
            let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
        }
        Err(error) => warn!(%error, "could not issue session cookie"),
    }
    response
}

fn page(
    state: &AppState,
    id: Uuid,
    status_code: StatusCode,
    name: &str,
    context: RenderContext,
) -> Response {
    let mut messages = state.sessions.take_flashes(id);
    messages.extend(context.flashes.into_vec());
    let mut inputs = context.inputs;
    inputs.insert("status".into(), json!(context.status));
    inputs.insert("messages".into(), json!(messages));
    inputs.insert("env".into(), json!(context.env));

    match state.renderer.render(name, &Value::Object(inputs)) {
        Ok(html) => (status_code, Html(html)).into_response(),
        Err(error) => {
            error!(page = name, %error, "page rendering failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "page rendering failed").into_response()
        }
    }
}

fn render(state: &AppState, id: Uuid, status_code: u16, context: RenderContext) -> Response {
    match &context.view {
        View::Redirect(location) => {
            let location = location.clone();
            state.sessions.flash(id, context.flashes.into_vec());
            (status(status_code), [(header::LOCATION, location)]).into_response()
        }
        View::Page(name) => {
            let name = name.clone();
            page(state, id, status(status_code), &name, context)
        }
    }
}

/// Shapes `result` for the caller and refreshes the session cookie.
async fn respond(
    state: &AppState,
    session: &CurrentSession,
    headers: &HeaderMap,
    result: OperationResult,
    page_name: Option<&str>,
) -> Response {
    let env = environment(&state.api, &session.context).await;
    let response = match compose::compose(result, page_name, preference(headers), env) {
        compose::Response::Machine {
            status_code,
            envelope,
        } => (status(status_code), Json(envelope)).into_response(),
        compose::Response::Render {
            status_code,
            context,
        } => render(state, session.id, status_code, context),
    };
    with_cookie(state, session.id, response)
}

/// Answers a body that could not be read as a form like any other failed
/// operation.
async fn unreadable(
    state: &AppState,
    session: &CurrentSession,
    headers: &HeaderMap,
    rejection: &FormRejection,
) -> Response {
    debug!(%rejection, "unreadable form body");
    let result = operations::unreadable_request(&state.api, &session.context, &rejection.body_text());
    respond(state, session, headers, result, None).await
}

pub(crate) async fn healthz() -> &'static str {
    "ok"
}

/// Main page. A failed overview renders the error page directly, since the
/// usual redirect would lead back here.
pub(crate) async fn index(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
) -> Response {
    let result = operations::overview(&state.api, &session.context).await;
    if result.ok || preference(&headers) == ContentPreference::Machine {
        return respond(&state, &session, &headers, result, Some("index.html")).await;
    }
    let context = RenderContext {
        status: result.status(),
        view: View::Page(ERROR_PAGE.into()),
        flashes: result.log,
        inputs: Default::default(),
        env: environment(&state.api, &session.context).await,
    };
    let response = page(
        &state,
        session.id,
        status(result.status_code),
        ERROR_PAGE,
        context,
    );
    with_cookie(&state, session.id, response)
}

pub(crate) async fn env_view(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
) -> Response {
    let result = operations::environment_view(&state.api, &session.context).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn drive_list(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
) -> Response {
    let result = operations::drive_list(&state.api, &session.context).await;
    respond(&state, &session, &headers, result, Some("drives.html")).await
}

pub(crate) async fn login(
    State(state): State<Arc<AppState>>,
    mut session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let change =
        operations::login(&state.api, &session.context, state.verifier.as_ref(), form).await;
    if let Some(identity) = change.value {
        state.sessions.set_identity(session.id, Some(identity.clone()));
        session.context.identity = Some(identity);
    }
    respond(&state, &session, &headers, change.result, None).await
}

pub(crate) async fn logout(
    State(state): State<Arc<AppState>>,
    mut session: CurrentSession,
    headers: HeaderMap,
) -> Response {
    state.sessions.set_identity(session.id, None);
    session.context.identity = None;
    let result = operations::logout(&state.api, &session.context);
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn change_language(
    State(state): State<Arc<AppState>>,
    mut session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<LanguageForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let change = operations::change_language(&state.api, &session.context, form);
    if let Some(locale) = change.value {
        state.sessions.set_locale(session.id, locale.clone());
        session.context.locale = locale;
    }
    respond(&state, &session, &headers, change.result, None).await
}

pub(crate) async fn create_drive(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<DriveForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::create_drive(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn cdrom_properties(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<DriveForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::cdrom_properties(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn save_config(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<ConfigForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::save_config(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn load_config(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<ConfigForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::load_config(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn disk_info(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<DiskInfoForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::disk_info(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, Some("diskinfo.html")).await
}

pub(crate) async fn man_page(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    Query(query): Query<ManPageQuery>,
) -> Response {
    let result = operations::man_page(&state.api, &session.context, query).await;
    respond(&state, &session, &headers, result, Some("manpage.html")).await
}

pub(crate) async fn show_logs(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<LogsForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::show_logs(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, Some("logs.html")).await
}

pub(crate) async fn set_log_level(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<LogLevelForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::set_log_level(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn attach_device(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<AttachDeviceForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::attach_device(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn attach_image(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<AttachImageForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::attach_image(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn detach_all(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
) -> Response {
    let result = operations::detach_all(&state.api, &session.context).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn detach(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<SlotForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::detach(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn eject(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<SlotForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::eject(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn device_info(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
) -> Response {
    let result = operations::device_info(&state.api, &session.context).await;
    respond(&state, &session, &headers, result, Some("deviceinfo.html")).await
}

pub(crate) async fn reserve_id(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<ReserveForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::reserve_id(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn release_id(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<ReserveForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::release_id(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn reboot(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
) -> Response {
    let result = operations::power(&state.api, &session.context, ShutdownMode::Reboot).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn shutdown(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
) -> Response {
    let result = operations::power(&state.api, &session.context, ShutdownMode::System).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn download_to_iso(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<DownloadIsoForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::download_to_iso(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn download_url(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<DownloadForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::download_to_dir(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn create_image(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<CreateImageForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::create_image(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn delete_image(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<FileNameForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::delete_image(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn rename_image(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<RenameForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::rename_image(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn copy_image(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<CopyForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::copy_image(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}

pub(crate) async fn extract_archive(
    State(state): State<Arc<AppState>>,
    session: CurrentSession,
    headers: HeaderMap,
    form: Result<Form<ExtractForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, &session, &headers, &rejection).await,
    };
    let result = operations::extract_archive(&state.api, &session.context, form).await;
    respond(&state, &session, &headers, result, None).await
}
