//! Account credential storage.
//!
//! The relational store is an external collaborator; `MemoryCredentialStore` backs
//! single-process deployments and tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Account {0} is already registered")]
    AlreadyRegistered(String),
    #[error("Secret must be at least {min} characters")]
    SecretTooShort { min: usize },
    #[error("Hashing failed: {0}")]
    Hashing(String),
}

/// A verified account and the capabilities its tokens carry
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub account_id: String,
    pub permissions: Vec<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` for an unknown account or a wrong secret.
    async fn verify(
        &self,
        account_id: &str,
        secret: &str,
    ) -> Result<Option<AccountRecord>, CredentialError>;

    async fn register(
        &self,
        account_id: &str,
        secret: &str,
        permissions: Vec<String>,
    ) -> Result<AccountRecord, CredentialError>;

    async fn permissions(&self, account_id: &str) -> Option<Vec<String>>;
}

struct StoredAccount {
    secret_hash: String,
    permissions: Vec<String>,
}

pub struct MemoryCredentialStore {
    accounts: DashMap<String, StoredAccount>,
    cost: u32,
    min_secret_length: usize,
}

impl MemoryCredentialStore {
    pub fn new(cost: u32, min_secret_length: usize) -> Self {
        Self {
            accounts: DashMap::new(),
            cost,
            min_secret_length,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

async fn hash_secret(secret: &str, cost: u32) -> Result<String, CredentialError> {
    let secret = secret.to_string();

    // bcrypt is CPU bound
    tokio::task::spawn_blocking(move || {
        bcrypt::hash(secret, cost).map_err(|e| CredentialError::Hashing(e.to_string()))
    })
    .await
    .map_err(|e| CredentialError::Hashing(format!("Task join error: {}", e)))?
}

async fn verify_secret(secret: &str, hash: String) -> Result<bool, CredentialError> {
    let secret = secret.to_string();

    tokio::task::spawn_blocking(move || {
        bcrypt::verify(secret, &hash).map_err(|e| CredentialError::Hashing(e.to_string()))
    })
    .await
    .map_err(|e| CredentialError::Hashing(format!("Task join error: {}", e)))?
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn verify(
        &self,
        account_id: &str,
        secret: &str,
    ) -> Result<Option<AccountRecord>, CredentialError> {
        // Clone out of the map so no shard lock is held across the await
        let stored = self
            .accounts
            .get(account_id)
            .map(|a| (a.secret_hash.clone(), a.permissions.clone()));

        let Some((hash, permissions)) = stored else {
            return Ok(None);
        };

        if verify_secret(secret, hash).await? {
            Ok(Some(AccountRecord {
                account_id: account_id.to_string(),
                permissions,
            }))
        } else {
            Ok(None)
        }
    }

    async fn register(
        &self,
        account_id: &str,
        secret: &str,
        permissions: Vec<String>,
    ) -> Result<AccountRecord, CredentialError> {
        if secret.chars().count() < self.min_secret_length {
            return Err(CredentialError::SecretTooShort {
                min: self.min_secret_length,
            });
        }

        if self.accounts.contains_key(account_id) {
            return Err(CredentialError::AlreadyRegistered(account_id.to_string()));
        }

        let secret_hash = hash_secret(secret, self.cost).await?;

        match self.accounts.entry(account_id.to_string()) {
            Entry::Occupied(_) => Err(CredentialError::AlreadyRegistered(account_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(StoredAccount {
                    secret_hash,
                    permissions: permissions.clone(),
                });

                tracing::info!(account_id = %account_id, "Account registered");

                Ok(AccountRecord {
                    account_id: account_id.to_string(),
                    permissions,
                })
            }
        }
    }

    async fn permissions(&self, account_id: &str) -> Option<Vec<String>> {
        self.accounts
            .get(account_id)
            .map(|a| a.permissions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryCredentialStore {
        // lowest cost bcrypt accepts
        MemoryCredentialStore::new(4, 4)
    }

    #[tokio::test]
    async fn test_register_and_verify() {
        let store = store();
        store
            .register("mod-1", "1234", vec!["cases:read".to_string()])
            .await
            .unwrap();

        let record = store.verify("mod-1", "1234").await.unwrap().unwrap();
        assert_eq!(record.account_id, "mod-1");
        assert_eq!(record.permissions, vec!["cases:read"]);

        assert!(store.verify("mod-1", "4321").await.unwrap().is_none());
        assert!(store.verify("nobody", "1234").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_secret_rejected() {
        let store = store();
        let result = store.register("mod-1", "123", vec![]).await;
        assert!(matches!(result, Err(CredentialError::SecretTooShort { min: 4 })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let store = store();
        store.register("mod-1", "1234", vec![]).await.unwrap();
        let result = store.register("mod-1", "5678", vec![]).await;
        assert!(matches!(result, Err(CredentialError::AlreadyRegistered(_))));

        // original secret still valid
        assert!(store.verify("mod-1", "1234").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_permissions_lookup() {
        let store = store();
        store
            .register("mod-1", "1234", vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(
            store.permissions("mod-1").await,
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(store.permissions("mod-2").await, None);
    }
}
