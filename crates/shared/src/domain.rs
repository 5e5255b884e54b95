use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// Structured key/value payload attached to an [`Outcome`]. Doubles as the
/// parameter set for message templates.
pub type Detail = Map<String, Value>;

/// Normalized result of a single backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub ok: bool,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Detail>,
}

impl Outcome {
    pub fn success(code: impl Into<String>) -> Self {
        Self {
            ok: true,
            code: code.into(),
            detail: None,
        }
    }

    pub fn failure(code: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: code.into(),
            detail: None,
        }
    }

    pub fn unreachable(reason: impl std::fmt::Display) -> Self {
        Self::failure(ErrorKind::BackendUnreachable.code()).with("msg", reason.to_string())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail
            .get_or_insert_with(Detail::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.detail.as_ref().and_then(|detail| detail.get(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// `None` for successful outcomes.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        (!self.ok).then(|| ErrorKind::from_code(&self.code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Success,
    Warning,
    Error,
}

/// One localized line item. The text is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub category: Category,
}

impl Message {
    pub fn new(text: impl Into<String>, category: Category) -> Self {
        Self {
            text: text.into(),
            category,
        }
    }
}

/// Messages in the order the producing steps executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog(Vec<Message>);

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.0.push(message);
    }

    pub fn success(&mut self, text: impl Into<String>) {
        self.push(Message::new(text, Category::Success));
    }

    pub fn warning(&mut self, text: impl Into<String>) {
        self.push(Message::new(text, Category::Warning));
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(Message::new(text, Category::Error));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.0.iter()
    }

    pub fn count(&self, category: Category) -> usize {
        self.0.iter().filter(|m| m.category == category).count()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Message> {
        self.0
    }
}

impl From<Vec<Message>> for MessageLog {
    fn from(messages: Vec<Message>) -> Self {
        Self(messages)
    }
}

impl<'a> IntoIterator for &'a MessageLog {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Overall status of a response. Exactly one per response, regardless of
/// the categories mixed in its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

impl Status {
    pub fn from_ok(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Error
        }
    }
}

/// Identity and locale of the session an operation runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub identity: Option<String>,
    pub locale: String,
}

impl SessionContext {
    pub fn anonymous(locale: impl Into<String>) -> Self {
        Self {
            identity: None,
            locale: locale.into(),
        }
    }

    pub fn signed_in(identity: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            locale: locale.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}
