//! Durable credential storage and the encryption capability, both consumed
//! as external collaborators. An in-memory store ships for tests and for
//! embedders without their own persistence.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::slots::AgentSlot;
use crate::error::{PerpdeskError, Result};

/// A provisioned delegated-agent credential.
///
/// The private key is held only in encrypted form; decryption happens at
/// signer construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCredential {
    pub user_address: String,
    pub agent_address: String,
    pub agent_name: AgentSlot,
    pub encrypted_private_key: String,
    /// Epoch milliseconds.
    pub valid_until: i64,
}

/// Reversible encryption for key material at rest.
#[async_trait]
pub trait SecretCipher: Send + Sync {
    async fn encode(&self, plaintext: &str) -> Result<String>;
    async fn decode(&self, opaque: &str) -> Result<String>;
}

/// Key-value credential storage keyed by `(user_address, agent_name)`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch one credential. The passphrase authorizes access; a wrong
    /// passphrase is an error, a missing credential is `None`.
    async fn get(
        &self,
        user_address: &str,
        agent_name: AgentSlot,
        passphrase: &str,
    ) -> Result<Option<AgentCredential>>;

    async fn get_all(&self, user_address: &str) -> Result<Vec<AgentCredential>>;

    /// Insert or replace, returning the credential id.
    async fn upsert(&self, credential: AgentCredential) -> Result<String>;

    async fn remove_many(&self, credentials: &[AgentCredential]) -> Result<()>;
}

/// Passphrase-gated in-memory store.
pub struct InMemoryCredentialStore {
    passphrase: String,
    entries: DashMap<(String, AgentSlot), (String, AgentCredential)>,
}

impl InMemoryCredentialStore {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            entries: DashMap::new(),
        }
    }

    fn key(user_address: &str, agent_name: AgentSlot) -> (String, AgentSlot) {
        (user_address.to_lowercase(), agent_name)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(
        &self,
        user_address: &str,
        agent_name: AgentSlot,
        passphrase: &str,
    ) -> Result<Option<AgentCredential>> {
        if passphrase != self.passphrase {
            return Err(PerpdeskError::Authorization(
                "Invalid passphrase".to_string(),
            ));
        }
        Ok(self
            .entries
            .get(&Self::key(user_address, agent_name))
            .map(|entry| entry.value().1.clone()))
    }

    async fn get_all(&self, user_address: &str) -> Result<Vec<AgentCredential>> {
        let user = user_address.to_lowercase();
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == user)
            .map(|entry| entry.value().1.clone())
            .collect())
    }

    async fn upsert(&self, credential: AgentCredential) -> Result<String> {
        let key = Self::key(&credential.user_address, credential.agent_name);
        let id = self
            .entries
            .get(&key)
            .map(|entry| entry.value().0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.entries.insert(key, (id.clone(), credential));
        Ok(id)
    }

    async fn remove_many(&self, credentials: &[AgentCredential]) -> Result<()> {
        for credential in credentials {
            self.entries
                .remove(&Self::key(&credential.user_address, credential.agent_name));
        }
        Ok(())
    }
}

/// Identity cipher for tests and development. Production embedders supply
/// their own implementation backed by the wallet's sensitive-text encoding.
pub struct PlainTextCipher;

#[async_trait]
impl SecretCipher for PlainTextCipher {
    async fn encode(&self, plaintext: &str) -> Result<String> {
        Ok(format!("enc:{plaintext}"))
    }

    async fn decode(&self, opaque: &str) -> Result<String> {
        opaque
            .strip_prefix("enc:")
            .map(str::to_string)
            .ok_or_else(|| PerpdeskError::CredentialStore("Malformed ciphertext".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(user: &str, slot: AgentSlot) -> AgentCredential {
        AgentCredential {
            user_address: user.to_string(),
            agent_address: "0x00000000000000000000000000000000000000aa".to_string(),
            agent_name: slot,
            encrypted_private_key: "enc:deadbeef".to_string(),
            valid_until: 1_000,
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_user_and_slot() {
        let store = InMemoryCredentialStore::new("pw");
        let first = store
            .upsert(credential("0xAAAA", AgentSlot::Agent1))
            .await
            .unwrap();
        let second = store
            .upsert(credential("0xaaaa", AgentSlot::Agent1))
            .await
            .unwrap();
        assert_eq!(first, second, "same key keeps its id");
        assert_eq!(store.get_all("0xAAAA").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_rejects_wrong_passphrase() {
        let store = InMemoryCredentialStore::new("pw");
        store
            .upsert(credential("0xaaaa", AgentSlot::Agent1))
            .await
            .unwrap();
        assert!(store.get("0xaaaa", AgentSlot::Agent1, "nope").await.is_err());
        assert!(store
            .get("0xaaaa", AgentSlot::Agent1, "pw")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn remove_many_clears_entries() {
        let store = InMemoryCredentialStore::new("pw");
        let cred = credential("0xaaaa", AgentSlot::Agent1);
        store.upsert(cred.clone()).await.unwrap();
        store.remove_many(&[cred]).await.unwrap();
        assert!(store.get_all("0xaaaa").await.unwrap().is_empty());
    }
}
