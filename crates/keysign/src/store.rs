//! Durable key storage.
//!
//! One sled database with two partitions:
//! - `keys`: owner -> JSON [`StoredKeyRecord`]
//! - `meta`: the active-owner slot and the schema version
//!
//! Single-key writes are atomic; removing a key together with the active
//! slot runs as one transaction over both partitions. Concurrent writers to
//! the same owner resolve as last-write-wins.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{KeysignError, Result};
use crate::keys::{
    DigestAlgorithm, KeyPair, Registration, decode_private_key_pem, encode_private_key_pem,
    encode_public_key_pem,
};

const KEYS_PARTITION: &str = "keys";
const META_PARTITION: &str = "meta";
const ACTIVE_OWNER: &[u8] = b"active_owner";
const SCHEMA_VERSION: &[u8] = b"schema_version";

/// Persisted form of a [`KeyPair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyRecord {
    /// PKCS#8 PEM
    pub private_key: String,
    /// SubjectPublicKeyInfo PEM
    pub public_key: String,
    pub digest: DigestAlgorithm,
    pub salt_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<Registration>,
}

impl StoredKeyRecord {
    pub fn from_key_pair(key: &KeyPair) -> Result<Self> {
        Ok(Self {
            private_key: encode_private_key_pem(key.private_key())?,
            public_key: encode_public_key_pem(key.public_key())?,
            digest: key.digest(),
            salt_length: key.salt_length(),
            registration: key.registration().cloned(),
        })
    }

    pub fn to_key_pair(&self) -> Result<KeyPair> {
        let private_key = decode_private_key_pem(&self.private_key)?;
        Ok(KeyPair::from_parts(
            private_key,
            self.digest,
            self.salt_length,
            self.registration.clone(),
        ))
    }
}

#[derive(Clone)]
struct Partitions {
    db: Db,
    keys: Tree,
    meta: Tree,
}

/// Handle over the key database. Opens lazily on first use; the open itself
/// runs on the blocking pool.
pub struct KeyStore {
    config: StoreConfig,
    handle: Mutex<Option<Partitions>>,
}

impl KeyStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open or create the database and both partitions. Idempotent.
    pub async fn open(&self) -> Result<()> {
        self.partitions().await.map(|_| ())
    }

    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Flush and release the handle. Safe to call when never opened.
    pub async fn close(&self) -> Result<()> {
        let partitions = self.handle.lock().await.take();
        if let Some(partitions) = partitions {
            partitions.db.flush_async().await?;
            info!(path = %self.config.path.display(), "Closed key store");
        }
        Ok(())
    }

    pub async fn get(&self, owner: &str) -> Result<Option<StoredKeyRecord>> {
        let partitions = self.partitions().await?;
        match partitions.keys.get(owner.as_bytes())? {
            Some(value) => {
                debug!(owner, "Found stored key");
                Ok(Some(serde_json::from_slice(&value)?))
            }
            None => {
                debug!(owner, "No stored key");
                Ok(None)
            }
        }
    }

    pub async fn put(&self, owner: &str, record: &StoredKeyRecord) -> Result<()> {
        let partitions = self.partitions().await?;
        let value = serde_json::to_vec(record)?;
        partitions.keys.insert(owner.as_bytes(), value)?;
        partitions.keys.flush_async().await?;
        info!(owner, registered = record.registration.is_some(), "Stored key");
        Ok(())
    }

    /// Remove an owner's key. Missing owners are a no-op.
    pub async fn delete(&self, owner: &str) -> Result<()> {
        let partitions = self.partitions().await?;
        partitions.keys.remove(owner.as_bytes())?;
        partitions.keys.flush_async().await?;
        info!(owner, "Deleted stored key");
        Ok(())
    }

    /// Remove an owner's key and, if they are the active owner, clear the
    /// active slot in the same transaction. Returns whether the slot was
    /// cleared.
    pub async fn delete_owner(&self, owner: &str) -> Result<bool> {
        let partitions = self.partitions().await?;
        let cleared = (&partitions.keys, &partitions.meta)
            .transaction(|(keys, meta)| {
                keys.remove(owner.as_bytes())?;
                let was_active = meta
                    .get(ACTIVE_OWNER)?
                    .is_some_and(|active| active.as_ref() == owner.as_bytes());
                if was_active {
                    meta.remove(ACTIVE_OWNER)?;
                }
                Ok::<_, ConflictableTransactionError<()>>(was_active)
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Storage(e) => KeysignError::from(e),
                TransactionError::Abort(()) => {
                    KeysignError::Store("delete transaction aborted".to_string())
                }
            })?;
        partitions.db.flush_async().await?;
        info!(owner, cleared_active = cleared, "Deleted owner");
        Ok(cleared)
    }

    pub async fn owners(&self) -> Result<Vec<String>> {
        let partitions = self.partitions().await?;
        partitions
            .keys
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key.to_vec())
                    .map_err(|e| KeysignError::Store(format!("owner is not utf-8: {e}")))
            })
            .collect()
    }

    pub async fn get_active_owner(&self) -> Result<String> {
        let partitions = self.partitions().await?;
        let owner = partitions
            .meta
            .get(ACTIVE_OWNER)?
            .ok_or(KeysignError::NoActiveOwner)?;
        String::from_utf8(owner.to_vec())
            .map_err(|e| KeysignError::Store(format!("active owner is not utf-8: {e}")))
    }

    pub async fn set_active_owner(&self, owner: &str) -> Result<()> {
        let partitions = self.partitions().await?;
        partitions.meta.insert(ACTIVE_OWNER, owner.as_bytes())?;
        partitions.meta.flush_async().await?;
        info!(owner, "Set active owner");
        Ok(())
    }

    async fn partitions(&self) -> Result<Partitions> {
        let mut handle = self.handle.lock().await;
        if let Some(partitions) = handle.as_ref() {
            return Ok(partitions.clone());
        }
        let config = self.config.clone();
        let partitions = tokio::task::spawn_blocking(move || open_partitions(&config))
            .await
            .map_err(|e| KeysignError::Store(format!("open task failed: {e}")))??;
        *handle = Some(partitions.clone());
        Ok(partitions)
    }
}

fn open_partitions(config: &StoreConfig) -> Result<Partitions> {
    let path = &config.path;
    let db = sled::Config::new()
        .path(path)
        .temporary(config.temporary)
        .open()
        .map_err(|e| open_error(path, e))?;
    let keys = db.open_tree(KEYS_PARTITION)?;
    let meta = db.open_tree(META_PARTITION)?;

    let expected = config.schema_version;
    match meta.get(SCHEMA_VERSION)? {
        None => {
            meta.insert(SCHEMA_VERSION, &expected.to_be_bytes()[..])?;
        }
        Some(stored) => {
            let found = <[u8; 4]>::try_from(stored.as_ref())
                .map(u32::from_be_bytes)
                .map_err(|_| KeysignError::Store("corrupt schema version".to_string()))?;
            if found != expected {
                return Err(KeysignError::StoreBlocked(format!(
                    "{} has schema version {found}, expected {expected}",
                    path.display()
                )));
            }
        }
    }

    info!(path = %path.display(), schema_version = expected, "Opened key store");
    Ok(Partitions { db, keys, meta })
}

fn open_error(path: &Path, error: sled::Error) -> KeysignError {
    match error {
        // sled reports a database locked by another handle as an io error
        sled::Error::Io(e)
            if e.kind() == io::ErrorKind::WouldBlock
                || e.to_string().contains("could not acquire lock") =>
        {
            KeysignError::StoreBlocked(format!("{} is already open: {e}", path.display()))
        }
        other => other.into(),
    }
}
