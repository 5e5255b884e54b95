use std::sync::{PoisonError, RwLock};

use anyhow::Context as _;
use serde_json::Value;
use tera::{Context, Tera};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("page input must be a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Template(#[from] tera::Error),
}

/// Turns a page name plus its inputs into HTML.
pub trait PageRenderer: Send + Sync {
    fn render(&self, page: &str, inputs: &Value) -> Result<String, RenderError>;
}

pub struct TeraRenderer {
    tera: RwLock<Tera>,
    reload: bool,
}

impl TeraRenderer {
    /// Loads every template matching `glob`. With `reload` set, templates are
    /// re-read before each render.
    pub fn new(glob: &str, reload: bool) -> anyhow::Result<Self> {
        let tera = Tera::new(glob).with_context(|| format!("failed to load templates from {glob}"))?;
        Ok(Self {
            tera: RwLock::new(tera),
            reload,
        })
    }
}

impl PageRenderer for TeraRenderer {
    fn render(&self, page: &str, inputs: &Value) -> Result<String, RenderError> {
        if !inputs.is_object() {
            return Err(RenderError::NotAnObject);
        }
        if self.reload {
            self.tera
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .full_reload()?;
        }
        let context = Context::from_serialize(inputs)?;
        Ok(self
            .tera
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .render(page, &context)?)
    }
}
