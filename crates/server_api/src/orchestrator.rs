//! Sequencing of backend calls into one user-facing operation.
//!
//! An operation is a list of [`Step`]s executed strictly in order. Each step
//! appends at most one message (plus an optional follow-up on failure) to the
//! operation's [`MessageLog`], so the log always reads in execution order.
//! What a failure does depends on the step's [`Criticality`]:
//!
//! * `Required` failures halt the operation and make it fail.
//! * `Optional` failures are logged as errors; the operation carries on and
//!   reports [`ErrorKind::PartialFailure`] if it otherwise succeeds.
//! * `Advisory` failures are logged as warnings and never affect the status.

use std::future::Future;

use futures::future::BoxFuture;
use serde_json::Value;
use shared::{
    domain::{Category, Detail, Message, MessageLog, Outcome, SessionContext, Status},
    error::ErrorKind,
};
use tracing::{debug, warn};

use crate::{
    gate::{authorize, AuthPolicy},
    i18n::Localizer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Required,
    Optional,
    Advisory,
}

/// Catalog code plus the parameters its placeholders refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub code: String,
    pub params: Detail,
}

impl Template {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            params: Detail::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
enum Report {
    Silent,
    /// Text derived from the outcome itself (catalog entry for its code, or
    /// the backend's own message).
    Outcome,
    Template(Template),
}

pub struct Step<'s> {
    action: BoxFuture<'s, Outcome>,
    criticality: Criticality,
    on_success: Report,
    on_failure: Report,
    followup: Option<Template>,
    expose: Vec<String>,
    kind: Option<ErrorKind>,
    failure_status: Option<u16>,
}

impl<'s> Step<'s> {
    fn with_criticality(
        action: impl Future<Output = Outcome> + Send + 's,
        criticality: Criticality,
    ) -> Self {
        Self {
            action: Box::pin(action),
            criticality,
            on_success: Report::Outcome,
            on_failure: Report::Outcome,
            followup: None,
            expose: Vec::new(),
            kind: None,
            failure_status: None,
        }
    }

    pub fn required(action: impl Future<Output = Outcome> + Send + 's) -> Self {
        Self::with_criticality(action, Criticality::Required)
    }

    pub fn optional(action: impl Future<Output = Outcome> + Send + 's) -> Self {
        Self::with_criticality(action, Criticality::Optional)
    }

    pub fn advisory(action: impl Future<Output = Outcome> + Send + 's) -> Self {
        Self::with_criticality(action, Criticality::Advisory)
    }

    /// Message logged when the step succeeds.
    pub fn announce(mut self, template: Template) -> Self {
        self.on_success = Report::Template(template);
        self
    }

    /// Log nothing on success. Failures are still reported.
    pub fn quiet(mut self) -> Self {
        self.on_success = Report::Silent;
        self
    }

    /// Message logged when the step fails. `%{reason}` expands to the
    /// outcome's own text.
    pub fn report_failure(mut self, template: Template) -> Self {
        self.on_failure = Report::Template(template);
        self
    }

    /// Extra error message appended after the failure message.
    pub fn followup(mut self, template: Template) -> Self {
        self.followup = Some(template);
        self
    }

    /// Detail keys handed to the caller as response data on success.
    pub fn expose(mut self, keys: &[&str]) -> Self {
        self.expose = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    /// Error kind reported on failure instead of the one derived from the
    /// outcome code.
    pub fn classify(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn status_on_failure(mut self, status: u16) -> Self {
        self.failure_status = Some(status);
        self
    }
}

/// Final result of an operation, before it is shaped into a response.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub ok: bool,
    pub log: MessageLog,
    pub data: Option<Detail>,
    /// Set on failure, and to `PartialFailure` when optional steps failed.
    pub error: Option<ErrorKind>,
    pub status_code: u16,
}

impl OperationResult {
    pub fn status(&self) -> Status {
        Status::from_ok(self.ok)
    }

    pub fn http_status(&self) -> u16 {
        self.status_code
    }
}

pub struct Orchestrator<'a> {
    localizer: &'a dyn Localizer,
    session: &'a SessionContext,
    locale: String,
    log: MessageLog,
    failed: bool,
    partial: bool,
    created: bool,
    error: Option<ErrorKind>,
    status_code: Option<u16>,
    data: Option<Detail>,
    carried: Detail,
    last: Option<Outcome>,
    executed: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(localizer: &'a dyn Localizer, session: &'a SessionContext) -> Self {
        Self {
            localizer,
            session,
            locale: session.locale.clone(),
            log: MessageLog::new(),
            failed: false,
            partial: false,
            created: false,
            error: None,
            status_code: None,
            data: None,
            carried: Detail::new(),
            last: None,
            executed: 0,
        }
    }

    pub fn session(&self) -> &SessionContext {
        self.session
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Messages logged from here on use `locale`. Earlier ones keep their text.
    pub fn relocalize(&mut self, locale: impl Into<String>) {
        self.locale = locale.into();
    }

    pub fn is_halted(&self) -> bool {
        self.failed
    }

    /// Runs the gate. On denial the operation fails with 403 before any
    /// backend call is made.
    pub fn admit(&mut self, policy: &AuthPolicy) -> bool {
        if self.failed {
            return false;
        }
        let outcome = authorize(self.session, policy);
        if outcome.ok {
            return true;
        }
        let template = Template {
            code: outcome.code.clone(),
            params: outcome.detail.clone().unwrap_or_default(),
        };
        self.reject_with_status(ErrorKind::AuthorizationDenied, template, 403);
        false
    }

    /// Fails the operation without a backend call.
    pub fn reject(&mut self, kind: ErrorKind, template: Template) {
        if self.failed {
            return;
        }
        let text = self.render(&template);
        self.log.error(text);
        self.halt(kind, None);
    }

    pub fn reject_with_status(&mut self, kind: ErrorKind, template: Template, status: u16) {
        if self.failed {
            return;
        }
        let text = self.render(&template);
        self.log.error(text);
        self.halt(kind, Some(status));
    }

    /// Unwraps a validated value, failing the operation with
    /// `ValidationFailed` otherwise.
    pub fn require<T>(&mut self, value: Result<T, Template>) -> Option<T> {
        match value {
            Ok(value) if !self.failed => Some(value),
            Ok(_) => None,
            Err(template) => {
                self.reject(ErrorKind::ValidationFailed, template);
                None
            }
        }
    }

    /// Appends a message that is not tied to a backend call.
    pub fn note(&mut self, category: Category, template: Template) {
        let text = self.render(&template);
        self.log.push(Message::new(text, category));
    }

    pub fn expose_value(&mut self, key: &str, value: impl Into<Value>) {
        self.data
            .get_or_insert_with(Detail::new)
            .insert(key.to_string(), value.into());
    }

    /// Successful completion is reported as "created".
    pub fn created(&mut self) {
        self.created = true;
    }

    /// Union of the details of every successful step so far.
    pub fn carried(&self) -> &Detail {
        &self.carried
    }

    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last.as_ref()
    }

    /// Executes one step. Returns whether it succeeded; a halted operation
    /// executes nothing and returns `false`.
    pub async fn proceed(&mut self, step: Step<'_>) -> bool {
        if self.failed {
            return false;
        }
        let Step {
            action,
            criticality,
            on_success,
            on_failure,
            followup,
            expose,
            kind,
            failure_status,
        } = step;

        let outcome = action.await;
        self.executed += 1;
        debug!(
            step = self.executed,
            ?criticality,
            ok = outcome.ok,
            code = %outcome.code,
            "operation step finished"
        );

        if outcome.ok {
            if let Some(text) = self.report(&on_success, &outcome) {
                self.log.success(text);
            }
            if let Some(detail) = &outcome.detail {
                if !expose.is_empty() {
                    let exposed: Detail = expose
                        .iter()
                        .filter_map(|key| detail.get(key).map(|value| (key.clone(), value.clone())))
                        .collect();
                    if !exposed.is_empty() {
                        self.data = Some(exposed);
                    }
                }
                self.carried
                    .extend(detail.iter().map(|(key, value)| (key.clone(), value.clone())));
            }
            self.last = Some(outcome);
            return true;
        }

        let category = match criticality {
            Criticality::Advisory => Category::Warning,
            Criticality::Required | Criticality::Optional => Category::Error,
        };
        let text = self
            .report(&on_failure, &outcome)
            .unwrap_or_else(|| self.outcome_text(&outcome));
        self.log.push(Message::new(text, category));
        if let Some(template) = &followup {
            let text = self.render(template);
            self.log.push(Message::new(text, category));
        }

        match criticality {
            Criticality::Required => {
                let kind = kind
                    .or_else(|| outcome.error_kind())
                    .unwrap_or(ErrorKind::BackendRejected);
                warn!(step = self.executed, code = %outcome.code, ?kind, "required step failed, halting");
                self.halt(kind, failure_status);
            }
            Criticality::Optional => self.partial = true,
            Criticality::Advisory => {}
        }
        self.last = Some(outcome);
        false
    }

    /// Executes `steps` in order until one required step fails.
    pub async fn run(&mut self, steps: Vec<Step<'_>>) -> bool {
        for step in steps {
            self.proceed(step).await;
            if self.failed {
                return false;
            }
        }
        true
    }

    pub fn finish(self) -> OperationResult {
        let ok = !self.failed;
        let error = if ok {
            self.partial.then_some(ErrorKind::PartialFailure)
        } else {
            self.error.or(Some(ErrorKind::BackendRejected))
        };
        let status_code = match (ok, self.status_code) {
            (_, Some(status)) => status,
            (true, None) if self.created => 201,
            (true, None) => 200,
            (false, None) => error.map_or(500, ErrorKind::default_status),
        };
        OperationResult {
            ok,
            log: self.log,
            data: self.data,
            error,
            status_code,
        }
    }

    fn halt(&mut self, kind: ErrorKind, status: Option<u16>) {
        self.failed = true;
        self.error = Some(kind);
        self.status_code = status;
    }

    fn report(&self, report: &Report, outcome: &Outcome) -> Option<String> {
        match report {
            Report::Silent => None,
            Report::Outcome => Some(self.outcome_text(outcome)),
            Report::Template(template) => {
                let mut params = outcome.detail.clone().unwrap_or_default();
                params.extend(template.params.clone());
                params
                    .entry("reason")
                    .or_insert_with(|| Value::String(self.outcome_text(outcome)));
                Some(self.translate(&template.code, &params))
            }
        }
    }

    /// The outcome's own description: the catalog entry for its code, else
    /// the backend's message, else a generic text.
    fn outcome_text(&self, outcome: &Outcome) -> String {
        let params = outcome.detail.clone().unwrap_or_default();
        if let Some(text) = self.localizer.translate(&self.locale, &outcome.code, &params) {
            return text;
        }
        if let Some(msg) = outcome.get_str("msg").filter(|msg| !msg.is_empty()) {
            return msg.to_string();
        }
        if outcome.ok {
            self.translate("operation_completed", &params)
        } else {
            self.translate(
                ErrorKind::BackendRejected.code(),
                &Detail::from_iter([("code".to_string(), Value::String(outcome.code.clone()))]),
            )
        }
    }

    fn render(&self, template: &Template) -> String {
        self.translate(&template.code, &template.params)
    }

    fn translate(&self, code: &str, params: &Detail) -> String {
        self.localizer
            .translate(&self.locale, code, params)
            .unwrap_or_else(|| code.to_string())
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
