//! Durable set of call ids that already produced a ticket.
use crate::error::StoreError;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug)]
pub struct ProcessedCalls {
    path: PathBuf,
    ids: HashSet<String>,
}

impl ProcessedCalls {
    /// Missing file yields an empty set; unreadable or malformed content is
    /// an error so a bad file never silently resets deduplication.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let ids = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => HashSet::new(),
            Ok(content) => {
                let ids: Vec<String> =
                    serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                        path: path.display().to_string(),
                        source,
                    })?;
                ids.into_iter().collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), count = ids.len(), "loaded processed calls");
        Ok(Self { path, ids })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Adds `id` and rewrites the whole set. The id stays in memory even when
    /// the write fails. Returns whether the id was new.
    pub fn insert(&mut self, id: String) -> Result<bool, StoreError> {
        let added = self.ids.insert(id);
        if added {
            self.persist()?;
        }
        Ok(added)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let mut ids: Vec<&String> = self.ids.iter().collect();
        ids.sort();
        let content = serde_json::to_string_pretty(&ids).map_err(|source| StoreError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })?;
        write_atomic(&self.path, content.as_bytes())?;
        debug!(path = %self.path.display(), count = ids.len(), "persisted processed calls");
        Ok(())
    }
}

/// Writes to a sibling temporary file and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}
