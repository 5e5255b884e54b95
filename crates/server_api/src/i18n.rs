//! Message templates keyed by stable codes.
//!
//! Templates use `%{name}` placeholders filled from a [`Detail`] map, so the
//! same outcome can be rendered in any locale the catalog knows.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::domain::Detail;
use thiserror::Error;

/// Locale lookup capability injected into the orchestrator.
pub trait Localizer: Send + Sync {
    /// `None` when no locale, including the default, has a template for `code`.
    fn translate(&self, locale: &str, code: &str, params: &Detail) -> Option<String>;

    fn supported(&self) -> Vec<LocaleInfo>;

    fn default_locale(&self) -> &str;

    fn display_name(&self, locale: &str) -> Option<String> {
        self.supported()
            .into_iter()
            .find(|info| info.language == locale)
            .map(|info| info.display_name)
    }

    fn is_supported(&self, locale: &str) -> bool {
        self.supported().iter().any(|info| info.language == locale)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocaleInfo {
    pub language: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse locale '{locale}': {source}")]
    Parse {
        locale: String,
        source: toml::de::Error,
    },
    #[error("default locale '{0}' is not in the catalog")]
    MissingDefault(String),
}

#[derive(Debug, Deserialize)]
struct LocaleFile {
    name: String,
    #[serde(default)]
    messages: HashMap<String, String>,
}

/// String catalog parsed from per-locale TOML documents.
#[derive(Debug)]
pub struct Catalog {
    default_locale: String,
    locales: BTreeMap<String, LocaleFile>,
}

const BUILTIN: &[(&str, &str)] = &[
    ("de", include_str!("../locales/de.toml")),
    ("en", include_str!("../locales/en.toml")),
];

impl Catalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_sources("en", BUILTIN)
    }

    pub fn from_sources(default_locale: &str, sources: &[(&str, &str)]) -> Result<Self, CatalogError> {
        let mut locales = BTreeMap::new();
        for (locale, raw) in sources {
            let file: LocaleFile = toml::from_str(raw).map_err(|source| CatalogError::Parse {
                locale: (*locale).to_string(),
                source,
            })?;
            locales.insert((*locale).to_string(), file);
        }
        if !locales.contains_key(default_locale) {
            return Err(CatalogError::MissingDefault(default_locale.to_string()));
        }
        Ok(Self {
            default_locale: default_locale.to_string(),
            locales,
        })
    }

    fn template(&self, locale: &str, code: &str) -> Option<&str> {
        self.locales
            .get(locale)
            .and_then(|file| file.messages.get(code))
            .or_else(|| {
                self.locales
                    .get(&self.default_locale)
                    .and_then(|file| file.messages.get(code))
            })
            .map(String::as_str)
    }
}

impl Localizer for Catalog {
    fn translate(&self, locale: &str, code: &str, params: &Detail) -> Option<String> {
        self.template(locale, code)
            .map(|template| interpolate(template, params))
    }

    fn supported(&self) -> Vec<LocaleInfo> {
        self.locales
            .iter()
            .map(|(language, file)| LocaleInfo {
                language: language.clone(),
                display_name: file.name.clone(),
            })
            .collect()
    }

    fn default_locale(&self) -> &str {
        &self.default_locale
    }
}

/// Replaces `%{key}` with the matching parameter. Unknown keys are left as-is.
pub fn interpolate(template: &str, params: &Detail) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        match params.get(key) {
            Some(value) => out.push_str(&display_value(value)),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/i18n_tests.rs"]
mod tests;
