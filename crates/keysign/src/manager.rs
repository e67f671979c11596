//! Key lifecycle: load-or-create, registration, rotation, deletion and the
//! active owner.
//!
//! Operations on one owner are serialized by a per-owner lock, so concurrent
//! `load_or_create` calls in one process generate a single key. Separate
//! processes sharing a store still race with last-write-wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::canonical::SignableRequest;
use crate::config::KeyOptions;
use crate::error::{KeysignError, Result};
use crate::keys::{KeyGenerator, KeyPair};
use crate::registration::{LoginRequest, LoginResponse};
use crate::signer::{self, RequestSigner, SignatureHeaders};
use crate::store::{KeyStore, StoredKeyRecord};

pub struct KeyManager {
    store: KeyStore,
    options: KeyOptions,
    owner_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyManager {
    pub fn new(store: KeyStore, options: KeyOptions) -> Self {
        Self {
            store,
            options,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn options(&self) -> KeyOptions {
        self.options
    }

    /// True iff `key` is registered and `valid_until > now`.
    pub fn is_usable(key: &KeyPair, now: DateTime<Utc>) -> bool {
        key.is_usable(now)
    }

    pub async fn load(&self, owner: &str) -> Result<Option<KeyPair>> {
        self.store
            .get(owner)
            .await?
            .map(|record| record.to_key_pair())
            .transpose()
    }

    /// Load with the manager's default key options.
    pub async fn load_or_create(&self, owner: &str, regenerate: bool) -> Result<KeyPair> {
        self.load_or_create_with(owner, regenerate, self.options).await
    }

    /// Return the stored key for `owner`. When absent, generate and persist a
    /// new one if `regenerate`, otherwise fail with `KeyNotFound`.
    pub async fn load_or_create_with(
        &self,
        owner: &str,
        regenerate: bool,
        options: KeyOptions,
    ) -> Result<KeyPair> {
        let lock = self.owner_lock(owner)?;
        let _guard = lock.lock().await;

        if let Some(key) = self.load(owner).await? {
            debug!(owner, "Loaded existing key");
            return Ok(key);
        }
        if !regenerate {
            return Err(KeysignError::KeyNotFound(owner.to_string()));
        }

        let key = KeyGenerator::generate(options).await?;
        self.save_unlocked(owner, &key).await?;
        Ok(key)
    }

    pub async fn save(&self, owner: &str, key: &KeyPair) -> Result<()> {
        let lock = self.owner_lock(owner)?;
        let _guard = lock.lock().await;
        self.save_unlocked(owner, key).await
    }

    /// Attach the server-issued identity to the stored key and persist it.
    pub async fn register(
        &self,
        owner: &str,
        key_id: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<KeyPair> {
        let lock = self.owner_lock(owner)?;
        let _guard = lock.lock().await;
        self.register_unlocked(owner, key_id, valid_until).await
    }

    /// Replace the owner's key with a fresh local-only one. The new key
    /// must be registered before it can sign.
    pub async fn rotate(&self, owner: &str) -> Result<KeyPair> {
        let lock = self.owner_lock(owner)?;
        let _guard = lock.lock().await;

        let key = KeyGenerator::generate(self.options).await?;
        self.save_unlocked(owner, &key).await?;
        info!(owner, "Rotated key");
        Ok(key)
    }

    /// Remove the owner's key; clears the active slot if it pointed at them.
    pub async fn delete(&self, owner: &str) -> Result<()> {
        let lock = self.owner_lock(owner)?;
        let _guard = lock.lock().await;
        self.store.delete_owner(owner).await?;
        Ok(())
    }

    /// Make `owner` the session's default. The owner must have a stored key.
    pub async fn set_active(&self, owner: &str) -> Result<()> {
        let lock = self.owner_lock(owner)?;
        let _guard = lock.lock().await;
        if self.store.get(owner).await?.is_none() {
            return Err(KeysignError::KeyNotFound(owner.to_string()));
        }
        self.store.set_active_owner(owner).await
    }

    pub async fn get_active(&self) -> Result<KeyPair> {
        Ok(self.resume().await?.key)
    }

    /// Session for the active owner.
    pub async fn resume(&self) -> Result<Session> {
        let owner = self.store.get_active_owner().await?;
        let key = self
            .load(&owner)
            .await?
            .ok_or_else(|| KeysignError::KeyNotFound(owner.clone()))?;
        Ok(Session { owner, key })
    }

    /// Login payload for `owner`, creating their key if needed.
    pub async fn login_request(&self, owner: &str, password: &str) -> Result<LoginRequest> {
        let key = self.load_or_create(owner, true).await?;
        Ok(LoginRequest {
            username: owner.to_string(),
            password: password.to_string(),
            public_key: key.public_jwk(),
        })
    }

    /// Record a successful login: register the key and make `owner` active.
    pub async fn complete_login(&self, owner: &str, response: LoginResponse) -> Result<Session> {
        let lock = self.owner_lock(owner)?;
        let _guard = lock.lock().await;
        let key = self
            .register_unlocked(owner, &response.key_id, response.valid_until)
            .await?;
        self.store.set_active_owner(owner).await?;
        Ok(Session {
            owner: owner.to_string(),
            key,
        })
    }

    async fn register_unlocked(
        &self,
        owner: &str,
        key_id: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<KeyPair> {
        let mut key = self
            .load(owner)
            .await?
            .ok_or_else(|| KeysignError::KeyNotFound(owner.to_string()))?;
        key.register(key_id, valid_until);
        self.save_unlocked(owner, &key).await?;
        info!(owner, key_id, %valid_until, "Registered key");
        Ok(key)
    }

    async fn save_unlocked(&self, owner: &str, key: &KeyPair) -> Result<()> {
        let record = StoredKeyRecord::from_key_pair(key)?;
        self.store.put(owner, &record).await
    }

    fn owner_lock(&self, owner: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .owner_locks
            .lock()
            .map_err(|_| KeysignError::Store("owner lock table poisoned".to_string()))?;
        // Entries only the table references have no holder or waiter.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(locks.entry(owner.to_string()).or_default().clone())
    }
}

/// The owner and key a running session signs with.
#[derive(Debug, Clone)]
pub struct Session {
    owner: String,
    key: KeyPair,
}

impl Session {
    pub fn new(owner: impl Into<String>, key: KeyPair) -> Self {
        Self {
            owner: owner.into(),
            key,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    pub fn sign(&self, request: &SignableRequest) -> Result<SignatureHeaders> {
        signer::sign(Some(&self.key), request)
    }
}

impl RequestSigner for Session {
    fn sign_request(&self, request: &SignableRequest) -> Result<SignatureHeaders> {
        self.sign(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generator::tests::TEST_BITS;
    use crate::keys::{DigestAlgorithm, KeyState};
    use crate::store::tests::temp_store;
    use chrono::Duration;
    use tempfile::TempDir;

    fn test_manager() -> (TempDir, KeyManager) {
        let (dir, store) = temp_store();
        let options = KeyOptions {
            modulus_bits: TEST_BITS,
            digest: DigestAlgorithm::Sha256,
        };
        (dir, KeyManager::new(store, options))
    }

    #[tokio::test]
    async fn missing_key_without_regenerate_fails() {
        let (_dir, manager) = test_manager();
        let error = manager.load_or_create("alice", false).await.unwrap_err();
        assert!(matches!(error, KeysignError::KeyNotFound(owner) if owner == "alice"));
    }

    #[tokio::test]
    async fn regenerate_creates_and_persists_local_key() {
        let (_dir, manager) = test_manager();
        let created = manager.load_or_create("alice", true).await.unwrap();
        assert_eq!(created.state(Utc::now()), KeyState::Local);

        let loaded = manager.load_or_create("alice", false).await.unwrap();
        assert_eq!(loaded.public_key(), created.public_key());
    }

    #[tokio::test]
    async fn existing_key_is_returned_not_regenerated() {
        let (_dir, manager) = test_manager();
        let first = manager.load_or_create("alice", true).await.unwrap();
        let second = manager.load_or_create("alice", true).await.unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[tokio::test]
    async fn concurrent_load_or_create_generates_once() {
        let (_dir, manager) = test_manager();
        let (a, b) = tokio::join!(
            manager.load_or_create("alice", true),
            manager.load_or_create("alice", true)
        );
        assert_eq!(a.unwrap().public_key(), b.unwrap().public_key());
    }

    #[tokio::test]
    async fn register_persists_identity() {
        let (_dir, manager) = test_manager();
        manager.load_or_create("alice", true).await.unwrap();
        let until = Utc::now() + Duration::hours(1);
        manager.register("alice", "k1", until).await.unwrap();

        let loaded = manager.load_or_create("alice", false).await.unwrap();
        assert_eq!(loaded.key_id(), Some("k1"));
        assert!(KeyManager::is_usable(&loaded, Utc::now()));
    }

    #[tokio::test]
    async fn register_unknown_owner_fails() {
        let (_dir, manager) = test_manager();
        let error = manager
            .register("ghost", "k1", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(error, KeysignError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn delete_then_load_without_regenerate_fails() {
        let (_dir, manager) = test_manager();
        manager.load_or_create("alice", true).await.unwrap();
        manager.delete("alice").await.unwrap();
        let error = manager.load_or_create("alice", false).await.unwrap_err();
        assert!(matches!(error, KeysignError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn deleting_active_owner_clears_slot() {
        let (_dir, manager) = test_manager();
        manager.load_or_create("alice", true).await.unwrap();
        manager.set_active("alice").await.unwrap();
        manager.delete("alice").await.unwrap();
        assert!(matches!(
            manager.get_active().await.unwrap_err(),
            KeysignError::NoActiveOwner
        ));
    }

    #[tokio::test]
    async fn set_active_requires_stored_key() {
        let (_dir, manager) = test_manager();
        let error = manager.set_active("nobody").await.unwrap_err();
        assert!(matches!(error, KeysignError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn get_active_returns_active_owners_key() {
        let (_dir, manager) = test_manager();
        manager.load_or_create("alice", true).await.unwrap();
        let bob = manager.load_or_create("bob", true).await.unwrap();
        manager.set_active("bob").await.unwrap();
        assert_eq!(manager.get_active().await.unwrap().public_key(), bob.public_key());
    }

    #[tokio::test]
    async fn rotate_replaces_key_with_local_one() {
        let (_dir, manager) = test_manager();
        let old = manager.load_or_create("alice", true).await.unwrap();
        manager
            .register("alice", "k1", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        let rotated = manager.rotate("alice").await.unwrap();
        assert_ne!(rotated.public_key(), old.public_key());
        assert_eq!(rotated.state(Utc::now()), KeyState::Local);

        let stored = manager.load_or_create("alice", false).await.unwrap();
        assert_eq!(stored.public_key(), rotated.public_key());
        assert!(stored.key_id().is_none());
    }

    #[tokio::test]
    async fn login_flow_produces_signing_session() {
        let (_dir, manager) = test_manager();
        let request = manager.login_request("alice", "hunter2").await.unwrap();
        assert_eq!(request.username, "alice");
        assert_eq!(request.public_key.e, "AQAB");

        let response = LoginResponse {
            key_id: "k1".into(),
            valid_until: Utc::now() + Duration::hours(1),
        };
        let session = manager.complete_login("alice", response).await.unwrap();
        assert_eq!(session.owner(), "alice");

        let resumed = manager.resume().await.unwrap();
        assert_eq!(resumed.owner(), "alice");
        assert_eq!(resumed.key().key_id(), Some("k1"));

        let headers = resumed
            .sign(&SignableRequest::now("GET", "/keys", ""))
            .unwrap();
        assert!(headers.authorization.contains(r#"id="k1""#));
    }

    #[tokio::test]
    async fn set_active_racing_delete_never_leaves_dangling_slot() {
        let (_dir, manager) = test_manager();
        manager.load_or_create("alice", true).await.unwrap();
        let (activated, deleted) = tokio::join!(manager.set_active("alice"), manager.delete("alice"));
        deleted.unwrap();

        match activated {
            Ok(()) => {}
            Err(error) => assert!(matches!(error, KeysignError::KeyNotFound(_))),
        }
        assert!(matches!(
            manager.resume().await.unwrap_err(),
            KeysignError::NoActiveOwner
        ));
    }

    #[tokio::test]
    async fn idle_owner_locks_are_pruned() {
        let (_dir, manager) = test_manager();
        for owner in ["a", "b", "c"] {
            manager.load_or_create(owner, true).await.unwrap();
            manager.delete(owner).await.unwrap();
        }
        let held = manager.owner_lock("d").unwrap();
        let locks = manager.owner_locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(Arc::ptr_eq(&held, &locks["d"]));
    }

    #[tokio::test]
    async fn resume_without_active_owner_fails() {
        let (_dir, manager) = test_manager();
        assert!(matches!(
            manager.resume().await.unwrap_err(),
            KeysignError::NoActiveOwner
        ));
    }
}
