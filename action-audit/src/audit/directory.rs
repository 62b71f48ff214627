//! User directory: id → display name
//!
//! The directory is read from a [`UserSource`] the first time a name is
//! needed and kept for the lifetime of the process. It is never refreshed
//! automatically; [`UserDirectory::reset`] drops the cache so the next lookup
//! reloads (used between tests).

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Name returned when a request carries no user id
pub const UNAUTHENTICATED: &str = "unauthenticated";

/// One user from the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawEntry")]
pub struct UserDirectoryEntry {
    /// User id, as it appears in requests
    pub id: String,
    /// Human-readable name
    pub display_name: String,
}

/// Snapshot record as found on disk; user lists carry several name fields
#[derive(Deserialize)]
struct RawEntry {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(rename = "displayName")]
    display_name_camel: Option<String>,
    display_name: Option<String>,
    name: Option<String>,
    username: Option<String>,
}

impl TryFrom<RawEntry> for UserDirectoryEntry {
    type Error = String;

    fn try_from(raw: RawEntry) -> std::result::Result<Self, Self::Error> {
        let display_name = non_blank(raw.display_name_camel)
            .or_else(|| non_blank(raw.display_name))
            .or_else(|| non_blank(raw.name))
            .or_else(|| non_blank(raw.username))
            .ok_or_else(|| format!("user {} has no display name", raw.id))?;
        Ok(Self {
            id: raw.id,
            display_name,
        })
    }
}

fn non_blank(name: Option<String>) -> Option<String> {
    name.filter(|name| !name.trim().is_empty())
}

impl UserDirectoryEntry {
    /// Create an entry
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Where the user snapshot comes from
#[async_trait]
pub trait UserSource: Send + Sync {
    /// Load every user entry
    async fn load(&self) -> Result<Vec<UserDirectoryEntry>>;
}

/// Snapshot stored as a JSON array of users
///
/// Also accepts `{"users": [...]}`. Entries without a usable id or name are
/// skipped with a warning; the rest of the snapshot still loads.
#[derive(Debug, Clone)]
pub struct JsonFileUserSource {
    path: PathBuf,
}

impl JsonFileUserSource {
    /// Read users from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Snapshot {
    List(Vec<serde_json::Value>),
    Wrapped { users: Vec<serde_json::Value> },
}

#[async_trait]
impl UserSource for JsonFileUserSource {
    async fn load(&self) -> Result<Vec<UserDirectoryEntry>> {
        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            Error::Directory(format!(
                "failed to read user snapshot {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let snapshot: Snapshot = serde_json::from_slice(&raw).map_err(|e| {
            Error::Directory(format!(
                "failed to parse user snapshot {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let (Snapshot::List(users) | Snapshot::Wrapped { users }) = snapshot;
        Ok(users
            .into_iter()
            .enumerate()
            .filter_map(|(index, user)| {
                serde_json::from_value::<UserDirectoryEntry>(user)
                    .map_err(|e| {
                        tracing::warn!(
                            path = %self.path.display(),
                            index,
                            error = %e,
                            "Skipping invalid user snapshot entry"
                        );
                    })
                    .ok()
            })
            .collect())
    }
}

/// Fixed in-memory user list
#[derive(Debug, Clone, Default)]
pub struct StaticUserSource {
    users: Vec<UserDirectoryEntry>,
}

impl StaticUserSource {
    /// Serve `users`
    pub fn new(users: Vec<UserDirectoryEntry>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserSource for StaticUserSource {
    async fn load(&self) -> Result<Vec<UserDirectoryEntry>> {
        Ok(self.users.clone())
    }
}

/// Read-through cache over a [`UserSource`]
#[derive(Clone)]
pub struct UserDirectory {
    source: Option<Arc<dyn UserSource>>,
    cache: Arc<RwLock<Option<Arc<HashMap<String, String>>>>>,
}

impl std::fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDirectory")
            .field("source", &self.source.is_some())
            .finish()
    }
}

impl UserDirectory {
    /// Directory backed by `source`, loaded on first lookup
    pub fn new(source: Arc<dyn UserSource>) -> Self {
        Self {
            source: Some(source),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Directory with no snapshot; lookups fall back to raw ids
    pub fn empty() -> Self {
        Self {
            source: None,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Resolve a display name
    ///
    /// Returns the display name when known, the raw id otherwise, and
    /// `"unauthenticated"` when there is no id.
    pub async fn display_name(&self, user_id: Option<&str>) -> String {
        let Some(id) = user_id.filter(|id| !id.is_empty()) else {
            return UNAUTHENTICATED.to_string();
        };
        let users = self.users().await;
        users
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    /// Whether the snapshot has been loaded
    pub async fn is_loaded(&self) -> bool {
        self.cache.read().await.is_some()
    }

    /// Forget the cached snapshot; the next lookup reloads it
    pub async fn reset(&self) {
        *self.cache.write().await = None;
    }

    async fn users(&self) -> Arc<HashMap<String, String>> {
        if let Some(users) = self.cache.read().await.as_ref() {
            return Arc::clone(users);
        }

        let mut guard = self.cache.write().await;
        if let Some(users) = guard.as_ref() {
            return Arc::clone(users);
        }

        let users = Arc::new(self.load().await);
        *guard = Some(Arc::clone(&users));
        users
    }

    async fn load(&self) -> HashMap<String, String> {
        let Some(source) = &self.source else {
            return HashMap::new();
        };
        match source.load().await {
            Ok(entries) => {
                tracing::info!(users = entries.len(), "User directory loaded");
                entries
                    .into_iter()
                    .map(|entry| (entry.id, entry.display_name))
                    .collect()
            }
            Err(e) => {
                // cached as empty: the directory is loaded once per process
                tracing::warn!(error = %e, "Failed to load user directory, using raw ids");
                HashMap::new()
            }
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(d)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: AtomicUsize,
        users: Vec<UserDirectoryEntry>,
    }

    #[async_trait]
    impl UserSource for CountingSource {
        async fn load(&self) -> Result<Vec<UserDirectoryEntry>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.users.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl UserSource for FailingSource {
        async fn load(&self) -> Result<Vec<UserDirectoryEntry>> {
            Err(Error::Directory("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_lookup_rules() {
        let directory = UserDirectory::new(Arc::new(StaticUserSource::new(vec![
            UserDirectoryEntry::new("u1", "Alice Martin"),
        ])));

        assert_eq!(directory.display_name(Some("u1")).await, "Alice Martin");
        assert_eq!(directory.display_name(Some("u2")).await, "u2");
        assert_eq!(directory.display_name(None).await, UNAUTHENTICATED);
        assert_eq!(directory.display_name(Some("")).await, UNAUTHENTICATED);
    }

    #[tokio::test]
    async fn test_loaded_once_until_reset() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            users: vec![UserDirectoryEntry::new("7", "Bob")],
        });
        let directory = UserDirectory::new(source.clone());
        assert!(!directory.is_loaded().await);

        let lookups: Vec<_> = (0..16)
            .map(|_| {
                let directory = directory.clone();
                tokio::spawn(async move { directory.display_name(Some("7")).await })
            })
            .collect();
        for lookup in lookups {
            assert_eq!(lookup.await.unwrap(), "Bob");
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert!(directory.is_loaded().await);

        directory.reset().await;
        assert!(!directory.is_loaded().await);
        assert_eq!(directory.display_name(Some("7")).await, "Bob");
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_load_falls_back_to_ids() {
        let directory = UserDirectory::new(Arc::new(FailingSource));
        assert_eq!(directory.display_name(Some("u9")).await, "u9");
        assert!(directory.is_loaded().await);
    }

    #[tokio::test]
    async fn test_json_file_source_formats() {
        let dir = tempfile::tempdir().unwrap();

        let list = dir.path().join("users.json");
        tokio::fs::write(
            &list,
            r#"[
                {"id": "u1", "displayName": "Alice", "username": "alice"},
                {"id": 2, "name": "Bob", "username": "bob", "email": "bob@example.com"},
                {"id": "u3", "username": "carol"}
            ]"#,
        )
        .await
        .unwrap();
        let users = JsonFileUserSource::new(&list).load().await.unwrap();
        assert_eq!(
            users,
            vec![
                UserDirectoryEntry::new("u1", "Alice"),
                UserDirectoryEntry::new("2", "Bob"),
                UserDirectoryEntry::new("u3", "carol"),
            ]
        );

        let wrapped = dir.path().join("wrapped.json");
        tokio::fs::write(&wrapped, r#"{"users": [{"id": "x", "display_name": "Xavier"}]}"#)
            .await
            .unwrap();
        let users = JsonFileUserSource::new(&wrapped).load().await.unwrap();
        assert_eq!(users, vec![UserDirectoryEntry::new("x", "Xavier")]);
    }

    #[tokio::test]
    async fn test_invalid_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        tokio::fs::write(
            &path,
            r#"[
                {"id": "u1", "name": "Alice"},
                {"id": "u2", "email": "b@example.com"},
                {"name": "No Id"},
                {"id": "u4", "username": "dave"}
            ]"#,
        )
        .await
        .unwrap();

        let users = JsonFileUserSource::new(&path).load().await.unwrap();
        assert_eq!(
            users,
            vec![
                UserDirectoryEntry::new("u1", "Alice"),
                UserDirectoryEntry::new("u4", "dave"),
            ]
        );

        let directory = UserDirectory::new(Arc::new(JsonFileUserSource::new(&path)));
        assert_eq!(directory.display_name(Some("u1")).await, "Alice");
        assert_eq!(directory.display_name(Some("u2")).await, "u2");
    }

    #[test]
    fn test_blank_name_fields_fall_through() {
        let entry: UserDirectoryEntry = serde_json::from_str(
            r#"{"id": "u1", "displayName": "", "display_name": "  ", "name": "Alice"}"#,
        )
        .unwrap();
        assert_eq!(entry.display_name, "Alice");

        let entry: UserDirectoryEntry =
            serde_json::from_str(r#"{"id": "u2", "name": "", "username": "bob"}"#).unwrap();
        assert_eq!(entry.display_name, "bob");

        assert!(serde_json::from_str::<UserDirectoryEntry>(r#"{"id": "u3", "name": " "}"#).is_err());
    }

    #[tokio::test]
    async fn test_json_file_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonFileUserSource::new(dir.path().join("nope.json"))
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Directory(_)));
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let directory = UserDirectory::empty();
        assert_eq!(directory.display_name(Some("abc")).await, "abc");
    }
}
