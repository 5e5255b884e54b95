//! Server-side sessions. The cookie only carries a signed session id; the
//! identity, language and pending flash messages stay in memory here.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::Message;
use thiserror::Error;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "emuweb_session";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token rejected: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("unknown session {0}")]
    Unknown(Uuid),
    #[error("session {0} has expired")]
    Expired(Uuid),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sid: Uuid,
    exp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub identity: Option<String>,
    pub locale: Option<String>,
    pub flashes: Vec<Message>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    records: Arc<Mutex<HashMap<Uuid, SessionRecord>>>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            records: Arc::default(),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<Uuid, SessionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let record = SessionRecord {
            identity: None,
            locale: None,
            flashes: Vec::new(),
            expires_at: Utc::now() + self.ttl,
        };
        let mut records = self.records();
        let now = Utc::now();
        records.retain(|_, record| record.expires_at > now);
        records.insert(id, record);
        id
    }

    /// Session id named by a cookie token, if the token verifies and the
    /// session is still live.
    pub fn resolve(&self, token: &str) -> Result<Uuid, SessionError> {
        let claims = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?.claims;
        let records = self.records();
        let record = records
            .get(&claims.sid)
            .ok_or(SessionError::Unknown(claims.sid))?;
        if record.expires_at <= Utc::now() {
            return Err(SessionError::Expired(claims.sid));
        }
        Ok(claims.sid)
    }

    /// Signed cookie token for `id`, expiring with the session.
    pub fn issue(&self, id: Uuid) -> Result<String, SessionError> {
        let exp = self
            .get(id)
            .map(|record| record.expires_at)
            .ok_or(SessionError::Unknown(id))?
            .timestamp();
        Ok(encode(&Header::default(), &Claims { sid: id, exp }, &self.encoding)?)
    }

    pub fn get(&self, id: Uuid) -> Option<SessionRecord> {
        self.records().get(&id).cloned()
    }

    pub fn set_identity(&self, id: Uuid, identity: Option<String>) {
        if let Some(record) = self.records().get_mut(&id) {
            record.identity = identity;
        }
    }

    pub fn set_locale(&self, id: Uuid, locale: String) {
        if let Some(record) = self.records().get_mut(&id) {
            record.locale = Some(locale);
        }
    }

    pub fn flash(&self, id: Uuid, messages: impl IntoIterator<Item = Message>) {
        if let Some(record) = self.records().get_mut(&id) {
            record.flashes.extend(messages);
        }
    }

    pub fn take_flashes(&self, id: Uuid) -> Vec<Message> {
        self.records()
            .get_mut(&id)
            .map(|record| std::mem::take(&mut record.flashes))
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
