use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use server_api::operations::CredentialVerifier;
use sha2::{Digest, Sha256};

/// Account entry from the settings file. Passwords are stored as lowercase
/// hex SHA-256 digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    pub password_sha256: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigCredentials {
    accounts: Vec<UserAccount>,
}

impl ConfigCredentials {
    pub fn new(accounts: Vec<UserAccount>) -> Self {
        Self { accounts }
    }
}

pub fn password_digest(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

#[async_trait]
impl CredentialVerifier for ConfigCredentials {
    async fn verify(&self, username: &str, password: &str, group: &str) -> bool {
        let digest = password_digest(password);
        self.accounts.iter().any(|account| {
            account.username == username
                && account.groups.iter().any(|member_of| member_of == group)
                && account.password_sha256.eq_ignore_ascii_case(&digest)
        })
    }
}
