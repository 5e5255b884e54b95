use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use shared::{domain::Outcome, protocol::DeviceParams};
use thiserror::Error;

use crate::orchestrator::Template;

/// What the backend accepts for one device type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceTypeSpec {
    /// Parameter names with their default values.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub block_sizes: Vec<u32>,
    #[serde(default)]
    pub removable: bool,
    #[serde(default)]
    pub supports_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("unknown device type {0}")]
    UnknownDeviceType(String),
    #[error("parameter {name} is not supported by {device_type}")]
    Unrecognized { name: String, device_type: String },
    #[error("malformed device type list: {0}")]
    Malformed(String),
}

impl ParamError {
    pub fn template(&self) -> Template {
        match self {
            Self::UnknownDeviceType(device_type) => {
                Template::new("device_type_unknown").param("device_type", device_type.as_str())
            }
            Self::Unrecognized { name, device_type } => Template::new("device_param_unrecognized")
                .param("name", name.as_str())
                .param("device_type", device_type.as_str()),
            Self::Malformed(_) => Template::new("device_types_malformed"),
        }
    }
}

/// Device parameter schema reported by the backend's `device_types` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSchema {
    types: BTreeMap<String, DeviceTypeSpec>,
}

impl DeviceSchema {
    pub fn from_outcome(outcome: &Outcome) -> Result<Self, ParamError> {
        let listing = outcome
            .get("device_types")
            .cloned()
            .ok_or_else(|| ParamError::Malformed("missing device_types".into()))?;
        let types = serde_json::from_value(listing)
            .map_err(|error| ParamError::Malformed(error.to_string()))?;
        Ok(Self { types })
    }

    pub fn spec(&self, device_type: &str) -> Option<&DeviceTypeSpec> {
        self.types.get(device_type)
    }

    /// Checks submitted parameters against the schema of `device_type`.
    /// Blank values are dropped so the backend applies its defaults; names
    /// the type does not declare are rejected.
    pub fn validate(
        &self,
        device_type: &str,
        submitted: &BTreeMap<String, String>,
    ) -> Result<DeviceParams, ParamError> {
        let spec = self
            .spec(device_type)
            .ok_or_else(|| ParamError::UnknownDeviceType(device_type.to_string()))?;

        let mut params = DeviceParams::new();
        for (name, value) in submitted {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if !spec.params.contains_key(name) {
                return Err(ParamError::Unrecognized {
                    name: name.clone(),
                    device_type: device_type.to_string(),
                });
            }
            params.insert(name.clone(), value.to_string());
        }
        Ok(params)
    }

    /// Smallest block size the type supports, used to sanity-check image sizes.
    pub fn min_block_size(&self, device_type: &str) -> Option<u32> {
        self.spec(device_type)?.block_sizes.iter().copied().min()
    }
}
