use serde::Serialize;
use shared::{
    domain::{Detail, MessageLog, Status},
    error::ErrorKind,
};

use crate::{environment::EnvSnapshot, orchestrator::OperationResult};

pub const MACHINE_MEDIA_TYPE: &str = "application/json";

/// Shape the caller asked for, declared through its `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentPreference {
    Machine,
    Render,
}

impl ContentPreference {
    /// Only an explicit `application/json` media range with a non-zero
    /// q-value selects the machine shape; everything else, including a
    /// missing header, renders.
    pub fn from_accept(accept: Option<&str>) -> Self {
        let machine = accept.is_some_and(|accept| {
            accept.split(',').any(|range| {
                let mut parts = range.split(';');
                let media = parts.next().unwrap_or_default().trim();
                let quality = parts
                    .filter_map(|param| param.trim().strip_prefix("q="))
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0);
                media.eq_ignore_ascii_case(MACHINE_MEDIA_TYPE) && quality > 0.0
            })
        });
        if machine {
            Self::Machine
        } else {
            Self::Render
        }
    }
}

/// Machine-readable response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status: Status,
    pub messages: MessageLog,
    pub data: Option<Detail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub env: EnvSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Page(String),
    Redirect(String),
}

/// Everything the page layer needs: messages to flash on the next rendered
/// view and the operation data as named template inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub status: Status,
    pub view: View,
    pub flashes: MessageLog,
    pub inputs: Detail,
    pub env: EnvSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Machine { status_code: u16, envelope: Envelope },
    Render { status_code: u16, context: RenderContext },
}

impl Response {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Machine { status_code, .. } | Self::Render { status_code, .. } => *status_code,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Machine { envelope, .. } => envelope.status,
            Self::Render { context, .. } => context.status,
        }
    }

    pub fn messages(&self) -> &MessageLog {
        match self {
            Self::Machine { envelope, .. } => &envelope.messages,
            Self::Render { context, .. } => &context.flashes,
        }
    }
}

pub const HOME: &str = "/";
const SEE_OTHER: u16 = 303;

/// Shapes an operation result for the caller.
///
/// Render callers get `page` only when the operation succeeded; any other
/// result redirects home with the messages flashed.
pub fn compose(
    result: OperationResult,
    page: Option<&str>,
    preference: ContentPreference,
    env: EnvSnapshot,
) -> Response {
    let status = result.status();
    match preference {
        ContentPreference::Machine => Response::Machine {
            status_code: result.status_code,
            envelope: Envelope {
                status,
                messages: result.log,
                data: result.data,
                error: result.error,
                env,
            },
        },
        ContentPreference::Render => {
            let (view, status_code) = match page {
                Some(page) if result.ok => (View::Page(page.to_string()), result.status_code),
                _ => (View::Redirect(HOME.to_string()), SEE_OTHER),
            };
            Response::Render {
                status_code,
                context: RenderContext {
                    status,
                    view,
                    flashes: result.log,
                    inputs: result.data.unwrap_or_default(),
                    env,
                },
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/compose_tests.rs"]
mod tests;
