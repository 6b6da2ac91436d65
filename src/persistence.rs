//! Persistence gateway: JSON documents in, JSON documents out
//!
//! All config, music data and loop data files go through a `DocumentStore`.
//! Failures are classified into `StoreError` kinds and logged with a short
//! human explanation; none of them panic.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::error::StoreError;

/// A structured document as stored on disk
pub type Document = Value;

/// Read/write access to named JSON documents
pub trait DocumentStore: Send + Sync {
    /// Read and parse the document at `path`.
    /// `tolerate_missing` only silences the not-found log line; the caller
    /// still receives `StoreError::NotFound`.
    fn read(&self, path: &Path, tolerate_missing: bool) -> Result<Document, StoreError>;

    /// Fully replace the document at `path`
    fn write(&self, path: &Path, document: &Document) -> Result<(), StoreError>;
}

/// Filesystem-backed store. Writes go to a sibling temp file which is then
/// renamed over the destination, so readers never see a partial document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFileStore;

impl JsonFileStore {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentStore for JsonFileStore {
    fn read(&self, path: &Path, tolerate_missing: bool) -> Result<Document, StoreError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            let quiet = tolerate_missing && e.kind() == io::ErrorKind::NotFound;
            if !quiet {
                log_io_error(path, &e);
            }
            StoreError::from_io(path, e)
        })?;

        serde_json::from_str(&contents).map_err(|source| {
            error!(path = %path.display(), error = %source, "Failed to parse JSON document");
            StoreError::Malformed {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    fn write(&self, path: &Path, document: &Document) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(document).map_err(|source| {
            StoreError::Serialize {
                path: path.to_path_buf(),
                source,
            }
        })?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    log_io_error(parent, &e);
                    StoreError::from_io(parent, e)
                })?;
            }
        }

        let tmp = temp_path(path);
        fs::write(&tmp, contents).map_err(|e| {
            log_io_error(&tmp, &e);
            StoreError::from_io(&tmp, e)
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            log_io_error(path, &e);
            let _ = fs::remove_file(&tmp);
            StoreError::from_io(path, e)
        })?;

        debug!(path = %path.display(), "Wrote document");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Human explanation for common I/O failures
pub fn explain(error: &io::Error) -> Option<&'static str> {
    match error.kind() {
        io::ErrorKind::NotFound => Some(
            "File or directory was not found. Verify the path exists and create it if not.",
        ),
        io::ErrorKind::PermissionDenied => Some(
            "Did not have permission. Verify that the file/folder is not read-only or located somewhere that requires admin privileges.",
        ),
        io::ErrorKind::AlreadyExists => {
            Some("The file already exists and the operation was not set to overwrite.")
        }
        io::ErrorKind::IsADirectory => Some("Expected a file but was given a directory."),
        io::ErrorKind::NotADirectory => Some("Expected a directory but was given a file path."),
        _ => None,
    }
}

/// Log an I/O failure, with the explanation when one is known
pub fn log_io_error(path: &Path, error: &io::Error) {
    match explain(error) {
        Some(explanation) => {
            error!(path = %path.display(), error = %error, explanation, "I/O failure")
        }
        None => error!(path = %path.display(), error = %error, "I/O failure"),
    }
}

/// Read `path` and deserialize it into `T`.
/// A document that parses as JSON but not as `T` is reported as malformed.
pub fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &Path,
    tolerate_missing: bool,
) -> Result<T, StoreError> {
    let document = store.read(path, tolerate_missing)?;
    serde_json::from_value(document).map_err(|source| {
        error!(path = %path.display(), error = %source, "Document does not match expected shape");
        StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Serialize `value` into a document destined for `path`
pub fn to_document<T: Serialize>(path: &Path, value: &T) -> Result<Document, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize and write `value` immediately (bypasses the save queue)
pub fn save<T: Serialize>(store: &dyn DocumentStore, path: &Path, value: &T) -> Result<(), StoreError> {
    let document = to_document(path, value)?;
    store.write(path, &document)
}

#[cfg(test)]
pub mod testing {
    //! In-memory store for deterministic tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    pub struct MemoryStore {
        docs: Mutex<HashMap<PathBuf, Document>>,
        writes: Mutex<HashMap<PathBuf, u32>>,
        failures_left: AtomicU32,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, path: impl Into<PathBuf>, document: Document) {
            self.docs.lock().unwrap().insert(path.into(), document);
        }

        pub fn get(&self, path: impl AsRef<Path>) -> Option<Document> {
            self.docs.lock().unwrap().get(path.as_ref()).cloned()
        }

        pub fn write_count(&self, path: impl AsRef<Path>) -> u32 {
            self.writes.lock().unwrap().get(path.as_ref()).copied().unwrap_or(0)
        }

        pub fn total_writes(&self) -> u32 {
            self.writes.lock().unwrap().values().sum()
        }

        /// Make the next `count` writes fail with an I/O error
        pub fn fail_next_writes(&self, count: u32) {
            self.failures_left.store(count, Ordering::SeqCst);
        }
    }

    impl DocumentStore for MemoryStore {
        fn read(&self, path: &Path, _tolerate_missing: bool) -> Result<Document, StoreError> {
            self.get(path).ok_or_else(|| StoreError::NotFound {
                path: path.to_path_buf(),
            })
        }

        fn write(&self, path: &Path, document: &Document) -> Result<(), StoreError> {
            *self.writes.lock().unwrap().entry(path.to_path_buf()).or_insert(0) += 1;

            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: io::Error::other("injected failure"),
                });
            }

            self.insert(path, document.clone());
            Ok(())
        }
    }
}
