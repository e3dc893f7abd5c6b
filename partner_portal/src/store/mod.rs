//! Persisted session storage.
//!
//! A [`SessionStore`] is a small synchronous key/value medium holding the live
//! credential, the serialized identity and (while an admin is viewing the portal as
//! someone else) the impersonation record. Two backends ship with the crate:
//!
//! - [`MemoryStore`]: process-local, used by tests and embedders with their own persistence
//! - [`FileStore`]: JSON file on disk, survives restarts
//!
//! Writes are never buffered. A [`WriteBatch`] is applied as one step so a reader
//! never sees a token without its matching user.
//!
//! [`load_session`] is the typed, self-healing read path used on rehydration:
//! malformed entries are cleared and reported as absent instead of failing.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::auth::PortalUser;
use crate::impersonation::ImpersonationRecord;
use log::warn;
use thiserror::Error;

/// Key of the bearer credential
pub const TOKEN_KEY: &str = "token";

/// Key of the serialized identity currently in control
pub const USER_KEY: &str = "user";

/// Key of the serialized impersonation record
pub const IMPERSONATION_KEY: &str = "impersonation";

/// Every key owned by the session
pub const SESSION_KEYS: [&str; 3] = [TOKEN_KEY, USER_KEY, IMPERSONATION_KEY];

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying medium failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One pending change in a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put(String, String),
    Remove(String),
}

/// Group of writes committed together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<StoreOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: &str, value: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Put(key.to_string(), value.into()));
        self
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.ops.push(StoreOp::Remove(key.to_string()));
        self
    }

    /// Batch clearing every session key
    pub fn clear_session() -> Self {
        SESSION_KEYS
            .iter()
            .fold(Self::new(), |batch, key| batch.remove(key))
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Durable key/value medium for session state
pub trait SessionStore: Send + Sync {
    /// Last written value, or `None` if absent
    fn read(&self, key: &str) -> StoreResult<Option<String>>;

    /// Overwrite a single key
    fn write(&self, key: &str, value: &str) -> StoreResult<()> {
        self.apply(WriteBatch::new().put(key, value))
    }

    /// Remove a single key
    fn clear(&self, key: &str) -> StoreResult<()> {
        self.apply(WriteBatch::new().remove(key))
    }

    /// Remove every session key
    fn clear_all(&self) -> StoreResult<()> {
        self.apply(WriteBatch::clear_session())
    }

    /// Apply every op of `batch` as one step; readers see all of it or none of it
    fn apply(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// Session state as found in storage
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSession {
    pub token: String,
    pub user: PortalUser,
    pub impersonation: Option<ImpersonationRecord>,
}

impl PersistedSession {
    /// Batch writing this session, replacing whatever was stored before
    pub fn to_batch(&self) -> StoreResult<WriteBatch> {
        let batch = WriteBatch::new()
            .put(TOKEN_KEY, self.token.clone())
            .put(USER_KEY, serde_json::to_string(&self.user)?);

        Ok(match &self.impersonation {
            Some(record) => batch.put(IMPERSONATION_KEY, serde_json::to_string(record)?),
            None => batch.remove(IMPERSONATION_KEY),
        })
    }
}

/// Read and validate the persisted session.
///
/// Returns `None` when nothing usable is stored. Any malformed entry is treated as
/// absent and the whole session is cleared, since a token without a trustworthy
/// identity (or the reverse) cannot be used. A store that cannot be read at all is
/// left untouched; the session stays on disk for the next attempt.
pub fn load_session(store: &dyn SessionStore) -> Option<PersistedSession> {
    let entries = match read_entries(store) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not read stored session, leaving it in place: {}", e);
            return None;
        }
    };

    match parse_session(entries) {
        Ok(session) => session,
        Err(reason) => {
            warn!("Discarding corrupted session state: {}", reason);
            if let Err(e) = store.clear_all() {
                warn!("Failed to clear corrupted session state: {}", e);
            }
            None
        }
    }
}

/// Raw token, user and impersonation entries
type RawSession = (Option<String>, Option<String>, Option<String>);

fn read_entries(store: &dyn SessionStore) -> StoreResult<RawSession> {
    Ok((
        store.read(TOKEN_KEY)?,
        store.read(USER_KEY)?,
        store.read(IMPERSONATION_KEY)?,
    ))
}

fn parse_session(
    (token, user, impersonation): RawSession,
) -> Result<Option<PersistedSession>, String> {
    let (token, user) = match (token, user) {
        (Some(token), Some(user)) => (token, user),
        (None, None) if impersonation.is_none() => return Ok(None),
        _ => return Err("partial session state".to_string()),
    };

    if token.trim().is_empty() {
        return Err("empty token".to_string());
    }

    let user: PortalUser =
        serde_json::from_str(&user).map_err(|e| format!("malformed user: {}", e))?;
    if !user.is_well_formed() {
        return Err("user record is missing required fields".to_string());
    }

    let impersonation = impersonation
        .map(|raw| serde_json::from_str::<ImpersonationRecord>(&raw))
        .transpose()
        .map_err(|e| format!("malformed impersonation record: {}", e))?;

    Ok(Some(PersistedSession {
        token,
        user,
        impersonation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn user() -> PortalUser {
        PortalUser {
            uuid: "u1".to_string(),
            full_name: "A B".to_string(),
            email: "a@b.com".to_string(),
            role: Role::User,
            partner_id: None,
            compensation_link: None,
            created_at: None,
        }
    }

    #[test]
    fn test_load_empty_store() {
        let store = MemoryStore::new();
        assert!(load_session(&store).is_none());
    }

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        let session = PersistedSession {
            token: "tok1".to_string(),
            user: user(),
            impersonation: None,
        };
        store.apply(session.to_batch().unwrap()).unwrap();

        assert_eq!(load_session(&store), Some(session));
    }

    #[test]
    fn test_malformed_user_clears_everything() {
        let store = MemoryStore::new();
        store.write(TOKEN_KEY, "tok1").unwrap();
        store.write(USER_KEY, "{not json").unwrap();

        assert!(load_session(&store).is_none());
        assert_eq!(store.read(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.read(USER_KEY).unwrap(), None);
    }

    #[test]
    fn test_token_without_user_is_cleared() {
        let store = MemoryStore::new();
        store.write(TOKEN_KEY, "tok1").unwrap();

        assert!(load_session(&store).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_user_missing_uuid_is_cleared() {
        let store = MemoryStore::new();
        store.write(TOKEN_KEY, "tok1").unwrap();
        store
            .write(
                USER_KEY,
                r#"{"uuid":"","role":"user","full_name":"A","email":"a@b.com"}"#,
            )
            .unwrap();

        assert!(load_session(&store).is_none());
        assert!(store.is_empty());
    }

    /// Store whose reads fail, counting every attempted write
    struct UnreadableStore {
        writes: std::sync::atomic::AtomicUsize,
    }

    impl SessionStore for UnreadableStore {
        fn read(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked").into())
        }

        fn apply(&self, _batch: WriteBatch) -> StoreResult<()> {
            self.writes
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_read_failure_leaves_session_in_place() {
        let store = UnreadableStore {
            writes: std::sync::atomic::AtomicUsize::new(0),
        };

        assert!(load_session(&store).is_none());
        assert_eq!(store.writes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_impersonation_record_is_cleared() {
        let store = MemoryStore::new();
        let session = PersistedSession {
            token: "tok1".to_string(),
            user: user(),
            impersonation: None,
        };
        store.apply(session.to_batch().unwrap()).unwrap();
        store.write(IMPERSONATION_KEY, "[]").unwrap();

        assert!(load_session(&store).is_none());
        assert!(store.is_empty());
    }
}
