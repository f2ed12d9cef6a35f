//! Key-value stores backing [`crate::PersistentMemoize`].

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A mapping from 64 bit content hashes to serialized values.
///
/// Inserting a key that is already present must be a silent no-op: two
/// resampling tasks may race to fill the same entry.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: u64) -> Result<Option<String>>;
    fn insert_if_absent(&self, key: u64, value: String) -> Result<()>;
}

/// A store that lives as long as the process.
#[derive(Default, Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<u64, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("Poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: u64) -> Result<Option<String>> {
        Ok(self.entries.lock().expect("Poisoned lock").get(&key).cloned())
    }

    fn insert_if_absent(&self, key: u64, value: String) -> Result<()> {
        self.entries
            .lock()
            .expect("Poisoned lock")
            .entry(key)
            .or_insert(value);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Record {
    key: u64,
    value: String,
}

struct FileState {
    entries: HashMap<u64, String>,
    writer: BufWriter<File>,
}

/// A durable store kept as an append-only JSON-lines file.
///
/// The file is read into memory when the store is opened. New entries are
/// appended and flushed one at a time, so a crash loses at most the entry
/// being written.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileStore {
    /// Open the store at `path`, creating the file and its parent directory
    /// if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path.as_ref()).map_err(Error::store)
    }

    fn open_inner(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create store directory: {:?}", dir))?;
        }

        let mut entries = HashMap::new();
        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("Failed to open store file: {:?}", path))?;
            for (lineno, line) in BufReader::new(file).lines().enumerate() {
                let line = line.with_context(|| format!("Failed to read {:?}", path))?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: Record = serde_json::from_str(&line)
                    .with_context(|| format!("Corrupt record at {:?}:{}", path, lineno + 1))?;
                entries.entry(record.key).or_insert(record.value);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open store file for writing: {:?}", path))?;

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState {
                entries,
                writer: BufWriter::new(file),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("Poisoned lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: u64) -> Result<Option<String>> {
        let state = self.state.lock().expect("Poisoned lock");
        Ok(state.entries.get(&key).cloned())
    }

    fn insert_if_absent(&self, key: u64, value: String) -> Result<()> {
        let mut state = self.state.lock().expect("Poisoned lock");
        if state.entries.contains_key(&key) {
            return Ok(());
        }
        let line = serde_json::to_string(&Record {
            key,
            value: value.clone(),
        })?;
        writeln!(state.writer, "{line}")
            .and_then(|_| state.writer.flush())
            .with_context(|| format!("Failed to append to store file: {:?}", self.path))
            .map_err(Error::store)?;
        state.entries.insert(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn memory_insert_is_idempotent() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.get(1)?, None);
        store.insert_if_absent(1, "a".into())?;
        store.insert_if_absent(1, "b".into())?;
        assert_eq!(store.get(1)?, Some("a".to_string()));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn file_store_survives_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("cache.jsonl");

        let store = FileStore::open(&path)?;
        assert!(store.is_empty());
        store.insert_if_absent(7, r#""seven""#.into())?;
        store.insert_if_absent(7, r#""other""#.into())?;
        store.insert_if_absent(u64::MAX, "[1,2]".into())?;
        drop(store);

        let contents = std::fs::read_to_string(&path)?;
        assert_eq!(contents.lines().count(), 2);

        let store = FileStore::open(&path)?;
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(7)?, Some(r#""seven""#.to_string()));
        assert_eq!(store.get(u64::MAX)?, Some("[1,2]".to_string()));
        assert_eq!(store.path(), path.as_path());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cache.jsonl");
        std::fs::write(&path, "not json\n")?;
        assert!(matches!(FileStore::open(&path), Err(Error::Store(_))));
        Ok(())
    }
}
