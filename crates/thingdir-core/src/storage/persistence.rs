//! Directory file persistence
//!
//! Handles loading and saving the document collection to a single JSON file
//! of the form `{"<id>": {...}, ...}`.
//! Uses atomic writes (write to temp file, then rename) to prevent corruption.
//!
//! Storage location: `~/.local/share/thingdir/directory.json` (configurable via `Config`)

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};
use crate::document::Collection;

/// Content written to a freshly created store file
const EMPTY_STORE: &[u8] = b"{}";

/// Persistence layer for the directory collection
///
/// Provides file creation with owner-only permissions and atomic saves.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Create a new persistence handler for the given store file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the store file exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the store folder and an empty store file if they are missing
    ///
    /// Only the immediate folder is created. Its parent must already exist.
    pub fn prepare(&self) -> StorageResult<()> {
        if let Some(folder) = self.path.parent() {
            if !folder.as_os_str().is_empty() && !folder.exists() {
                debug!("Creating store folder {:?}", folder);
                fs::create_dir(folder).map_err(|source| StorageError::CreateDirectory {
                    path: folder.to_path_buf(),
                    source,
                })?;
            }
        }

        if !self.path.exists() {
            debug!("Creating empty store file {:?}", self.path);
            let mut file = create_private(&self.path)
                .map_err(|e| StorageError::from_io(e, self.path.clone()))?;
            file.write_all(EMPTY_STORE)
                .map_err(|e| StorageError::from_io(e, self.path.clone()))?;
        }

        Ok(())
    }

    /// Load the collection from disk
    ///
    /// Every top-level value must be a JSON object.
    pub fn load(&self) -> StorageResult<Collection> {
        let bytes = fs::read(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                StorageError::from_io(e, self.path.clone())
            }
            _ => StorageError::ReadError {
                path: self.path.clone(),
                source: e,
            },
        })?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            warn!("Store file {:?} is empty, starting with no documents", self.path);
            return Ok(Collection::new());
        }

        let docs: Collection =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidFormat {
                path: self.path.clone(),
                details: e.to_string(),
            })?;

        if let Some((id, _)) = docs.iter().find(|(_, doc)| !doc.is_object()) {
            return Err(StorageError::InvalidFormat {
                path: self.path.clone(),
                details: format!("document '{}' is not a JSON object", id),
            });
        }

        Ok(docs)
    }

    /// Save the collection to disk using an atomic write
    pub fn save(&self, docs: &Collection) -> StorageResult<()> {
        let bytes = serde_json::to_vec(docs).map_err(|source| StorageError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        atomic_write(&self.path, &bytes)
    }
}

/// Open a file for writing that only the owning user can access
fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    let temp_path = path.with_extension("tmp");

    let mut file =
        create_private(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    // Sync to disk before rename
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
