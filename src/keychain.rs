//! The OS keychain collaborator, modeled as a small async trait so secret
//! materialization can be deferred to just before a config is applied and
//! bounded by a hard timeout, matching the original's `async`-task-with-
//! timeout keychain reads.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Keychain reads are given this long to complete; on timeout the resolved
/// secret is treated as empty ("missing"), never surfaced as an error.
pub const KEYCHAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Three operations over a secret store, keyed by an opaque `service`
/// reference (as stored in `HttpConfig`'s `*_keychain` fields) and a `user`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Reads a secret. Implementations should return an error (not panic)
    /// on backend failure; timeout handling is the caller's concern via
    /// [`load_with_timeout`].
    async fn load(&self, service: &str, user: &str) -> Result<String>;

    /// Stores a secret, returning the service reference to persist as the
    /// corresponding `*_keychain` field.
    async fn store(&self, service: &str, user: &str, password: &str) -> Result<String>;

    /// Deletes a secret, returning whether one was actually removed.
    async fn remove(&self, service: &str, user: &str) -> Result<bool>;
}

/// Runs `store.load` with a [`KEYCHAIN_TIMEOUT`] deadline. On timeout or
/// backend error, returns an empty string rather than propagating — the
/// engine's error taxonomy treats an empty secret as "missing" and lets
/// downstream logic decide whether that's fatal.
pub async fn load_with_timeout(store: &dyn SecretStore, service: &str, user: &str) -> Result<String> {
    match tokio::time::timeout(KEYCHAIN_TIMEOUT, store.load(service, user)).await {
        Ok(Ok(secret)) => Ok(secret),
        Ok(Err(_)) | Err(_) => Ok(String::new()),
    }
}

/// An in-memory keychain, useful for tests and for embedders who have no
/// OS-level secret store to delegate to.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    entries: tokio::sync::Mutex<std::collections::HashMap<(String, String), String>>,
}

impl InMemorySecretStore {
    /// Builds an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn load(&self, service: &str, user: &str) -> Result<String> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&(service.to_string(), user.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn store(&self, service: &str, user: &str, password: &str) -> Result<String> {
        let mut entries = self.entries.lock().await;
        entries.insert((service.to_string(), user.to_string()), password.to_string());
        Ok(service.to_string())
    }

    async fn remove(&self, service: &str, user: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(&(service.to_string(), user.to_string())).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_store() {
        let store = InMemorySecretStore::new();
        store.store("svc", "user", "secret").await.unwrap();
        assert_eq!(load_with_timeout(&store, "svc", "user").await.unwrap(), "secret");
    }

    #[tokio::test]
    async fn missing_entry_loads_as_empty() {
        let store = InMemorySecretStore::new();
        assert_eq!(load_with_timeout(&store, "svc", "user").await.unwrap(), "");
    }

    #[tokio::test]
    async fn removed_entry_loads_as_empty() {
        let store = InMemorySecretStore::new();
        store.store("svc", "user", "secret").await.unwrap();
        assert!(store.remove("svc", "user").await.unwrap());
        assert_eq!(load_with_timeout(&store, "svc", "user").await.unwrap(), "");
    }
}
