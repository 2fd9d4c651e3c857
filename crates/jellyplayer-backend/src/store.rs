//! Durable key-value storage for session attributes.
//!
//! The store keeps every value as a string, the way the persisted schema is
//! shared with the web UI, and marshals booleans at its boundary so callers
//! never compare strings. Absent keys read back as typed defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use jellyplayer_bridge::session::{SessionKey, SessionRecord};
use tokio::{
    fs::{OpenOptions, create_dir_all, read_to_string, rename},
    io::AsyncWriteExt,
    sync::Mutex,
};

/// Errors raised while reading or writing the backing file.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access session store: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse session store: {0}")]
    Deserialize(#[from] toml::de::Error),
    #[error("failed to serialize session store: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A value accepted by [`Store::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Bool(bool),
    Text(String),
}

impl StoreValue {
    fn into_stored(self) -> String {
        match self {
            StoreValue::Bool(true) => "true".to_string(),
            StoreValue::Bool(false) => "false".to_string(),
            StoreValue::Text(text) => text,
        }
    }
}

impl From<bool> for StoreValue {
    fn from(value: bool) -> Self {
        StoreValue::Bool(value)
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        StoreValue::Text(value.to_string())
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        StoreValue::Text(value)
    }
}

/// Parses a stored flag. Older installs wrote `True`/`False`.
fn parse_flag(key: &str, raw: &str) -> bool {
    match raw {
        "true" | "True" => true,
        "false" | "False" | "" => false,
        other => {
            log::warn!("Stored flag {key} has unexpected value {other:?}, reading it as false");
            false
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    values: BTreeMap<String, String>,
    /// Set when the in-memory values are ahead of the backing file.
    dirty: bool,
}

/// Session attribute store, optionally backed by a TOML file.
///
/// All access goes through one async mutex, so writes from concurrent tasks
/// never interleave and a `clear` is observed by every later read.
#[derive(Debug)]
pub struct Store {
    path: Option<PathBuf>,
    entries: Mutex<Entries>,
}

impl Store {
    /// Creates a store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Opens the store backed by `path`, reading existing values if the file
    /// exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = if path.exists() {
            let contents = read_to_string(&path).await?;
            toml::from_str::<BTreeMap<String, String>>(&contents)?
        } else {
            BTreeMap::new()
        };
        log::info!("Opened session store at {path:?} with {} key(s)", values.len());

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(Entries {
                values,
                dirty: false,
            }),
        })
    }

    /// Returns the raw stored string for `key`.
    pub async fn get(&self, key: impl AsRef<str>) -> Option<String> {
        self.entries.lock().await.values.get(key.as_ref()).cloned()
    }

    /// Reads `key` as a flag; absent keys are `false`.
    pub async fn get_bool(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        match self.get(key).await {
            Some(raw) => parse_flag(key, &raw),
            None => false,
        }
    }

    /// Reads `key` as a string; absent keys are `None`.
    pub async fn get_string(&self, key: impl AsRef<str>) -> Option<String> {
        self.get(key).await
    }

    /// Stores `value` under `key` and writes the store through to disk.
    ///
    /// On a write failure the value stays visible in memory and the next
    /// [`Store::flush`] retries the write.
    pub async fn set(
        &self,
        key: impl AsRef<str>,
        value: impl Into<StoreValue>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries
            .values
            .insert(key.as_ref().to_string(), value.into().into_stored());
        entries.dirty = true;
        self.persist(&mut entries).await
    }

    /// Erases every key.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.values.clear();
        entries.dirty = true;
        log::info!("Cleared session store");
        self.persist(&mut entries).await
    }

    /// Writes pending changes, if any, to the backing file.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.dirty {
            self.persist(&mut entries).await?;
        }
        Ok(())
    }

    /// Reads every session attribute in one consistent snapshot.
    pub async fn session_record(&self) -> SessionRecord {
        let entries = self.entries.lock().await;
        let text = |key: SessionKey| entries.values.get(key.as_str()).cloned();
        let flag = |key: SessionKey| {
            entries
                .values
                .get(key.as_str())
                .is_some_and(|raw| parse_flag(key.as_str(), raw))
        };

        SessionRecord {
            server_url: text(SessionKey::Server),
            server_reachable: flag(SessionKey::ServerReachable),
            user_name: text(SessionKey::UserName),
            user_secret: text(SessionKey::UserSecret),
            open_home_enabled: flag(SessionKey::OpenHomeEnabled),
        }
    }

    async fn persist(&self, entries: &mut Entries) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            write_atomically(path, &toml::to_string_pretty(&entries.values)?).await?;
        }
        entries.dirty = false;
        Ok(())
    }
}

/// Replaces `path` with `contents` via a sibling temporary file, so a crash
/// mid-write leaves either the old or the new store behind.
async fn write_atomically(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }

    let temporary_path = path.with_extension("toml.tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temporary_path)
        .await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    rename(&temporary_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_flags_and_strings() {
        let store = Store::in_memory();
        store.set("flag", true).await.unwrap();
        store.set("other", false).await.unwrap();
        store.set("name", "alice").await.unwrap();
        store.set("empty", "").await.unwrap();

        assert!(store.get_bool("flag").await);
        assert!(!store.get_bool("other").await);
        assert_eq!(store.get_string("name").await.as_deref(), Some("alice"));
        assert_eq!(store.get_string("empty").await.as_deref(), Some(""));
        assert_eq!(store.get("flag").await.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn absent_keys_are_typed_defaults() {
        let store = Store::in_memory();
        assert!(!store.get_bool("serverReachable").await);
        assert_eq!(store.get_string("server").await, None);
        assert_eq!(store.session_record().await, SessionRecord::default());
    }

    #[tokio::test]
    async fn reads_legacy_capitalized_flags() {
        let store = Store::in_memory();
        store.set(SessionKey::ServerReachable, "True").await.unwrap();
        store.set(SessionKey::OpenHomeEnabled, "False").await.unwrap();
        store.set("garbage", "maybe").await.unwrap();

        let record = store.session_record().await;
        assert!(record.server_reachable);
        assert!(!record.open_home_enabled);
        assert!(!store.get_bool("garbage").await);
    }

    #[tokio::test]
    async fn clear_erases_everything() {
        let store = Store::in_memory();
        for key in SessionKey::ALL {
            store.set(key, "x").await.unwrap();
        }
        store.clear().await.unwrap();
        for key in SessionKey::ALL {
            assert_eq!(store.get(key).await, None);
        }
    }

    #[tokio::test]
    async fn values_survive_reopening() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("nested").join("session.toml");

        {
            let store = Store::open(&path).await.unwrap();
            store.set(SessionKey::Server, "http://media.local:8096").await.unwrap();
            store.set(SessionKey::ServerReachable, true).await.unwrap();
            store.set(SessionKey::UserName, "").await.unwrap();
        }

        let store = Store::open(&path).await.unwrap();
        let record = store.session_record().await;
        assert_eq!(record.server_url.as_deref(), Some("http://media.local:8096"));
        assert!(record.server_reachable);
        assert_eq!(record.user_name.as_deref(), Some(""));
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[tokio::test]
    async fn clear_is_persisted() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("session.toml");

        let store = Store::open(&path).await.unwrap();
        store.set(SessionKey::Server, "http://media.local").await.unwrap();
        store.clear().await.unwrap();
        store.flush().await.unwrap();

        let reopened = Store::open(&path).await.unwrap();
        assert_eq!(reopened.get(SessionKey::Server).await, None);
    }
}
