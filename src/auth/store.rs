// Token stores: in-memory and JSON file backed

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::types::StoredSession;

/// Opaque key-value store for session credentials.
///
/// Contents are never validated. Implementations must not panic; a store that
/// cannot read its backing medium behaves as empty.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    fn set_access_token(&self, token: String);
    fn set_refresh_token(&self, token: String);

    fn user_profile(&self) -> Option<Value> {
        None
    }

    fn set_user_profile(&self, _user: Option<Value>) {}

    /// Discard access token, refresh token and cached user profile
    fn clear_tokens(&self);

    /// Store a rotated token pair
    fn set_tokens(&self, access_token: String, refresh_token: String) {
        self.set_access_token(access_token);
        self.set_refresh_token(refresh_token);
    }
}

fn read(lock: &RwLock<StoredSession>) -> RwLockReadGuard<'_, StoredSession> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write(lock: &RwLock<StoredSession>) -> RwLockWriteGuard<'_, StoredSession> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: RwLock<StoredSession>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            session: RwLock::new(StoredSession {
                access_token: Some(access_token.into()),
                refresh_token: Some(refresh_token.into()),
                user: None,
                updated_at: Some(Utc::now()),
            }),
        }
    }

    pub fn snapshot(&self) -> StoredSession {
        read(&self.session).clone()
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        read(&self.session).access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        read(&self.session).refresh_token.clone()
    }

    fn set_access_token(&self, token: String) {
        let mut s = write(&self.session);
        s.access_token = Some(token);
        s.updated_at = Some(Utc::now());
    }

    fn set_refresh_token(&self, token: String) {
        let mut s = write(&self.session);
        s.refresh_token = Some(token);
        s.updated_at = Some(Utc::now());
    }

    fn set_tokens(&self, access_token: String, refresh_token: String) {
        let mut s = write(&self.session);
        s.access_token = Some(access_token);
        s.refresh_token = Some(refresh_token);
        s.updated_at = Some(Utc::now());
    }

    fn user_profile(&self) -> Option<Value> {
        read(&self.session).user.clone()
    }

    fn set_user_profile(&self, user: Option<Value>) {
        write(&self.session).user = user;
    }

    fn clear_tokens(&self) {
        *write(&self.session) = StoredSession::default();
    }
}

/// Session persisted as JSON, rewritten on every mutation
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    session: RwLock<StoredSession>,
}

impl FileTokenStore {
    /// Open the store at `path`. A missing or unreadable file yields an empty session.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = match load_session(&path) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable session file"
                );
                StoredSession::default()
            }
        };
        Self {
            path,
            session: RwLock::new(session),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, f: impl FnOnce(&mut StoredSession)) {
        let mut s = write(&self.session);
        f(&mut s);
        if let Err(e) = save_session(&self.path, &s) {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to persist session");
        }
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        read(&self.session).access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        read(&self.session).refresh_token.clone()
    }

    fn set_access_token(&self, token: String) {
        self.update(|s| {
            s.access_token = Some(token);
            s.updated_at = Some(Utc::now());
        });
    }

    fn set_refresh_token(&self, token: String) {
        self.update(|s| {
            s.refresh_token = Some(token);
            s.updated_at = Some(Utc::now());
        });
    }

    fn set_tokens(&self, access_token: String, refresh_token: String) {
        self.update(|s| {
            s.access_token = Some(access_token);
            s.refresh_token = Some(refresh_token);
            s.updated_at = Some(Utc::now());
        });
    }

    fn user_profile(&self) -> Option<Value> {
        read(&self.session).user.clone()
    }

    fn set_user_profile(&self, user: Option<Value>) {
        self.update(|s| s.user = user);
    }

    fn clear_tokens(&self) {
        self.update(|s| *s = StoredSession::default());
    }
}

fn load_session(path: &Path) -> Result<StoredSession> {
    if !path.exists() {
        return Ok(StoredSession::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(StoredSession::default());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse session file: {}", path.display()))
}

fn save_session(path: &Path, session: &StoredSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(session).context("Failed to serialize session")?;

    // Write to a temporary file first, then swap it in
    let temp_path = path.with_extension("tmp");
    write_private(&temp_path, json.as_bytes())
        .with_context(|| format!("Failed to write session file: {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace session file: {}", path.display()))
}

/// Write `contents` to a file readable by the owner only
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    // A leftover temp file keeps its old mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryTokenStore::new();
        assert!(store.access_token().is_none());

        store.set_tokens("a1".to_string(), "r1".to_string());
        store.set_user_profile(Some(serde_json::json!({"id": 7})));
        assert_eq!(store.access_token().as_deref(), Some("a1"));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));
        assert!(store.snapshot().updated_at.is_some());

        store.clear_tokens();
        assert_eq!(store.snapshot(), StoredSession::default());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = FileTokenStore::open(&path);
        store.set_tokens("a1".to_string(), "r1".to_string());
        store.set_user_profile(Some(serde_json::json!({"email": "ops@acme.test"})));

        let reopened = FileTokenStore::open(&path);
        assert_eq!(reopened.access_token().as_deref(), Some("a1"));
        assert_eq!(reopened.refresh_token().as_deref(), Some("r1"));
        assert_eq!(
            reopened.user_profile(),
            Some(serde_json::json!({"email": "ops@acme.test"}))
        );

        reopened.clear_tokens();
        let cleared = FileTokenStore::open(&path);
        assert!(cleared.access_token().is_none());
        assert!(cleared.user_profile().is_none());
    }

    #[test]
    fn test_memory_store_swaps_token_pair_together() {
        let store = Arc::new(MemoryTokenStore::with_tokens("a0", "r0"));

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 1..=500 {
                    store.set_tokens(format!("a{}", i), format!("r{}", i));
                }
            })
        };

        for _ in 0..500 {
            let s = store.snapshot();
            let access = s.access_token.unwrap();
            let refresh = s.refresh_token.unwrap();
            assert_eq!(access[1..], refresh[1..], "torn pair {} / {}", access, refresh);
        }
        writer.join().unwrap();
        assert_eq!(store.access_token().as_deref(), Some("a500"));
    }

    #[test]
    fn test_file_store_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileTokenStore::open(&path);
        store.set_tokens("a1".to_string(), "r1".to_string());
        store.set_tokens("a2".to_string(), "r2".to_string());

        assert!(!path.with_extension("tmp").exists());
        let saved: StoredSession =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.access_token.as_deref(), Some("a2"));
        assert_eq!(saved.refresh_token.as_deref(), Some("r2"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        // Stale temp file from an interrupted write
        std::fs::write(path.with_extension("tmp"), "{}").unwrap();

        FileTokenStore::open(&path).set_tokens("a1".to_string(), "r1".to_string());

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_tolerates_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileTokenStore::open(&path);
        assert!(store.access_token().is_none());

        store.set_access_token("a2".to_string());
        assert_eq!(FileTokenStore::open(&path).access_token().as_deref(), Some("a2"));
    }
}
