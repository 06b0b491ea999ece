//! Session persistence.
//!
//! Cookie jars are kept per account identifier. `set` merges into whatever is
//! already stored so cookies the portal set on earlier calls survive a partial
//! refresh.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cookies::SessionCookies;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable mapping from account identifier to its cookie jar.
///
/// Implementations must be safe for concurrent use: last writer wins per
/// account, and writes for one account never affect another.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, account_id: &str) -> Result<Option<SessionCookies>, StoreError>;

    /// Merge `cookies` into the stored jar for `account_id`.
    async fn set(&self, account_id: &str, cookies: &SessionCookies) -> Result<(), StoreError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionCookies>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, account_id: &str) -> Result<Option<SessionCookies>, StoreError> {
        Ok(self.sessions.get(account_id).map(|entry| entry.clone()))
    }

    async fn set(&self, account_id: &str, cookies: &SessionCookies) -> Result<(), StoreError> {
        // The entry guard holds the shard lock for the whole merge.
        self.sessions
            .entry(account_id.to_string())
            .or_default()
            .merge(cookies.iter().cloned());
        Ok(())
    }
}

/// One JSON file per account under a directory.
///
/// Read-merge-write cycles for the same account are serialized by a per-account
/// lock, dropped again once no call holds or waits on it. Each write lands in a
/// temporary file that is then renamed over the previous one.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the account's lock when the map holds the only reference.
    fn release_lock(&self, account_id: &str) {
        self.locks
            .remove_if(account_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// File name for an account; bytes outside `[A-Za-z0-9.-]` become `_xx`.
    fn path_for(&self, account_id: &str) -> PathBuf {
        let mut name = String::with_capacity(account_id.len() + 5);
        for byte in account_id.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' => name.push(byte as char),
                _ => name.push_str(&format!("_{:02x}", byte)),
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }

    async fn read(&self, path: &Path) -> Result<Option<SessionCookies>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_merged(
        &self,
        account_id: &str,
        cookies: &SessionCookies,
    ) -> Result<(), StoreError> {
        let path = self.path_for(account_id);
        let mut jar = self.read(&path).await?.unwrap_or_default();
        jar.merge(cookies.iter().cloned());

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&jar)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), cookies = jar.len(), "Session persisted");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, account_id: &str) -> Result<Option<SessionCookies>, StoreError> {
        let result = {
            let lock = self.lock_for(account_id);
            let _guard = lock.lock().await;
            self.read(&self.path_for(account_id)).await
        };
        self.release_lock(account_id);
        result
    }

    async fn set(&self, account_id: &str, cookies: &SessionCookies) -> Result<(), StoreError> {
        let result = {
            let lock = self.lock_for(account_id);
            let _guard = lock.lock().await;
            self.write_merged(account_id, cookies).await
        };
        self.release_lock(account_id);
        result
    }
}
