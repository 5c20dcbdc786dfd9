//! Flat key-value text storage used by [`FlatStoreEngine`](crate::FlatStoreEngine).
//!
//! The engine only needs four primitives, modelled on browser local storage:
//! get, set and remove a text value by key, and list the keys. Two
//! implementations are provided:
//!
//! - [`MemoryStorage`] keeps values in a shared in-process map
//! - [`FileStorage`] keeps one file per key inside a directory

use std::{collections::HashMap, fmt::Debug, io::ErrorKind, path::{Path, PathBuf}, sync::Arc};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use tokio::fs;
use tracing::trace;
use uuid::Uuid;

use docengine_core::error::EngineResult;


/// A flat store of text values addressed by string keys.
#[async_trait]
pub trait KeyValueStorage: Send + Sync + Debug {
    /// Returns the value stored under `key`, or `None` if the key is absent.
    async fn get_item(&self, key: &str) -> EngineResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: String) -> EngineResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> EngineResult<()>;

    /// Lists every key currently stored.
    async fn keys(&self) -> EngineResult<Vec<String>>;
}


/// Shared in-process key-value storage.
///
/// Clones share the same underlying map, so a second engine built over a clone
/// sees everything the first one wrote.
#[derive(Default, Clone, Debug)]
pub struct MemoryStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> EngineResult<()> {
        self.items
            .write()
            .await
            .insert(key.to_string(), value);

        Ok(())
    }

    async fn remove_item(&self, key: &str) -> EngineResult<()> {
        self.items.write().await.remove(key);

        Ok(())
    }

    async fn keys(&self) -> EngineResult<Vec<String>> {
        Ok(
            self.items
                .read()
                .await
                .keys()
                .cloned()
                .collect()
        )
    }
}


/// Directory-backed key-value storage.
///
/// Each key is stored in its own `<encoded key>.json` file. Keys are
/// percent-encoded so that any string is a valid file name. Writes go to a
/// temporary file first and are renamed into place.
#[derive(Clone, Debug)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    const EXTENSION: &'static str = ".json";
    const TEMPORARY_EXTENSION: &'static str = ".tmp";

    /// Opens storage rooted at `directory`, creating the directory if needed.
    pub async fn open(directory: impl Into<PathBuf>) -> EngineResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        trace!(directory = ?directory, "opened file storage");

        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{}{}", encode_key(key), Self::EXTENSION))
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> EngineResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn set_item(&self, key: &str, value: String) -> EngineResult<()> {
        let path = self.path_for(key);
        // One temporary file per write, so concurrent writers never rename each other's file.
        let temporary = self.directory.join(format!(
            "{}.{}{}",
            encode_key(key),
            Uuid::new_v4().simple(),
            Self::TEMPORARY_EXTENSION
        ));

        let written = match fs::write(&temporary, value).await {
            Ok(()) => fs::rename(&temporary, &path).await,
            Err(error) => Err(error),
        };

        if let Err(error) = written {
            let _ = fs::remove_file(&temporary).await;
            return Err(error.into());
        }
        trace!(key, path = ?path, "wrote storage item");

        Ok(())
    }

    async fn remove_item(&self, key: &str) -> EngineResult<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn keys(&self) -> EngineResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.directory).await?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();

            if let Some(key) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(Self::EXTENSION))
                .and_then(decode_key)
            {
                keys.push(key);
            }
        }

        Ok(keys)
    }
}

/// Percent-encodes every byte outside `[A-Za-z0-9_-]`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());

    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }

    encoded
}

fn decode_key(encoded: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut rest = encoded.as_bytes();

    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'%' {
            let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(byte);
            rest = tail;
        }
    }

    String::from_utf8(bytes).ok()
}
