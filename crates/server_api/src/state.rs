//! Process-wide state shared by all requests: the drive-profile catalog and
//! the SCSI ID reservation memos. Both are loaded at startup and replaced as
//! a whole when they change.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use backend_link::Backend;
use shared::{domain::Outcome, protocol::{BackendCommand, DriveProfile}};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("backend could not read {path}: {code}")]
    Backend { path: String, code: String },
    #[error("drive profile list is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct DriveCatalog {
    profiles: Arc<RwLock<Vec<DriveProfile>>>,
}

impl DriveCatalog {
    pub fn new(profiles: Vec<DriveProfile>) -> Self {
        Self {
            profiles: Arc::new(RwLock::new(profiles)),
        }
    }

    pub fn replace(&self, profiles: Vec<DriveProfile>) {
        *self.profiles.write().unwrap_or_else(PoisonError::into_inner) = profiles;
    }

    pub fn find(&self, name: &str) -> Option<DriveProfile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|profile| profile.name == name)
            .cloned()
    }

    pub fn all(&self) -> Vec<DriveProfile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reads the profile list at `path` through the backend and replaces the
    /// catalog with it.
    pub async fn load(&self, backend: &dyn Backend, path: &str, locale: &str) -> Result<usize, StateError> {
        let outcome = backend
            .call(
                BackendCommand::ReadDriveProperties {
                    path: path.to_string(),
                },
                locale,
            )
            .await;
        let profiles = parse_profiles(path, &outcome)?;
        let count = profiles.len();
        self.replace(profiles);
        info!(path, count, "drive profiles loaded");
        Ok(count)
    }
}

fn parse_profiles(path: &str, outcome: &Outcome) -> Result<Vec<DriveProfile>, StateError> {
    if !outcome.ok {
        return Err(StateError::Backend {
            path: path.to_string(),
            code: outcome.code.clone(),
        });
    }
    let conf = outcome.get("conf").cloned().unwrap_or_default();
    Ok(serde_json::from_value(conf)?)
}

/// Memos for reserved SCSI IDs. The backend owns the reservation itself.
#[derive(Debug, Clone, Default)]
pub struct Reservations {
    memos: Arc<RwLock<BTreeMap<u8, String>>>,
}

impl Reservations {
    pub fn reserve(&self, id: u8, memo: impl Into<String>) {
        self.memos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, memo.into());
    }

    pub fn release(&self, id: u8) -> Option<String> {
        self.memos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn memo(&self, id: u8) -> Option<String> {
        self.memos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Drops memos for IDs the backend no longer reports as reserved and
    /// adds empty memos for ones reserved elsewhere.
    pub fn sync(&self, reserved: &[u8]) {
        let mut memos = self.memos.write().unwrap_or_else(PoisonError::into_inner);
        memos.retain(|id, _| reserved.contains(id));
        for id in reserved {
            memos.entry(*id).or_default();
        }
    }

    pub fn snapshot(&self) -> BTreeMap<u8, String> {
        self.memos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use backend_link::ScriptedBackend;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn catalog_loads_profiles_through_backend() {
        let backend = ScriptedBackend::new(|_| {
            Outcome::success("read_drive_properties").with(
                "conf",
                json!([
                    { "name": "DEC RZ22", "device_type": "SCHD", "vendor": "DEC", "size": 52445184, "file_type": "hds" },
                    { "name": "Apple CD 300", "device_type": "SCCD", "block_size": 2048 },
                ]),
            )
        });
        let catalog = DriveCatalog::default();

        let count = catalog.load(&backend, "drives.json", "en").await.expect("load");

        assert_eq!(count, 2);
        let rz22 = catalog.find("DEC RZ22").expect("profile");
        assert_eq!(rz22.size, Some(52445184));
        assert_eq!(rz22.properties().vendor.as_deref(), Some("DEC"));
        assert!(catalog.find("Unknown").is_none());
    }

    #[tokio::test]
    async fn failed_read_keeps_previous_catalog() {
        let backend = ScriptedBackend::new(|_| Outcome::failure("file_not_found"));
        let catalog = DriveCatalog::new(Vec::new());

        let error = catalog.load(&backend, "drives.json", "en").await.expect_err("fails");

        assert!(matches!(error, StateError::Backend { ref code, .. } if code == "file_not_found"));
        assert!(catalog.all().is_empty());
    }

    #[test]
    fn reservations_follow_backend_list() {
        let reservations = Reservations::default();
        reservations.reserve(3, "printer");
        reservations.reserve(5, "scanner");

        reservations.sync(&[3, 6]);

        assert_eq!(reservations.memo(3).as_deref(), Some("printer"));
        assert_eq!(reservations.memo(5), None);
        assert_eq!(reservations.memo(6).as_deref(), Some(""));
        assert_eq!(reservations.release(3).as_deref(), Some("printer"));
        assert_eq!(reservations.snapshot().len(), 1);
    }
}
