//! Directory document store
//!
//! The `DirStore` keeps every document in memory and owns the backing file.
//!
//! ## Consistency
//!
//! All state sits behind one mutex that is held for the whole operation,
//! query evaluation included, so every operation is linearizable.
//!
//! ## Durability
//!
//! Mutations only mark the store dirty. The file is rewritten on `close`,
//! on an explicit `flush`, or by the server's periodic flush. A crash
//! loses whatever was not flushed.
//!
//! ## Usage
//!
//! ```ignore
//! let store = DirStore::new("/var/lib/thingdir/directory.json");
//! store.open()?;
//!
//! store.replace("thing1", doc)?;
//! let sensors = store.query(r#"$[?(@.type=="sensor")]"#, 0, 0)?;
//!
//! store.close()?;
//! ```

use std::path::Path;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::document::{self, Collection, Document};
use crate::error::{DirError, DirResult};
use crate::protocol::PageLimits;
use crate::query::{PathQueryEngine, QueryEngine};
use crate::storage::{JsonFilePersistence, StorageError};

/// Thread-safe document store backed by a JSON file
pub struct DirStore {
    persistence: JsonFilePersistence,
    engine: Box<dyn QueryEngine>,
    limits: PageLimits,
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    docs: Collection,
    dirty: bool,
    open: bool,
}

impl DirStore {
    /// Create a closed store for the given file
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            persistence: JsonFilePersistence::new(path.as_ref()),
            engine: Box::new(PathQueryEngine),
            limits: PageLimits::default(),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Use a different query engine
    pub fn with_engine(mut self, engine: impl QueryEngine + 'static) -> Self {
        self.engine = Box::new(engine);
        self
    }

    /// Use different page size limits
    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn path(&self) -> &Path {
        self.persistence.path()
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    // ==================== Lifecycle ====================

    /// Load the store from disk
    ///
    /// Creates the store folder and an empty store file if missing. The
    /// folder's parent must exist.
    pub fn open(&self) -> DirResult<()> {
        let mut state = self.state.lock();
        if state.open {
            return Err(StorageError::AlreadyOpen {
                path: self.path().to_path_buf(),
            }
            .into());
        }

        if !self.persistence.exists() {
            info!("Creating new directory file {:?}", self.path());
        }
        self.persistence.prepare()?;
        let docs = self.persistence.load()?;
        info!("Opened directory {:?} with {} documents", self.path(), docs.len());

        *state = StoreState {
            docs,
            dirty: false,
            open: true,
        };
        Ok(())
    }

    /// Write pending changes and release the in-memory documents
    ///
    /// The store ends up closed even if the write fails. Closing a closed
    /// store does nothing.
    pub fn close(&self) -> DirResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Ok(());
        }

        let result = if state.dirty {
            self.persistence.save(&state.docs)
        } else {
            Ok(())
        };
        let count = state.docs.len();
        *state = StoreState::default();

        match result {
            Ok(()) => {
                info!("Closed directory {:?} ({} documents)", self.path(), count);
                Ok(())
            }
            Err(e) => {
                warn!("Closing directory {:?} lost unsaved changes: {}", self.path(), e);
                Err(e.into())
            }
        }
    }

    /// Write pending changes, keeping the store open
    pub fn flush(&self) -> DirResult<()> {
        self.with_state(|state| {
            if state.dirty {
                self.persistence.save(&state.docs)?;
                state.dirty = false;
                debug!("Flushed {} documents to {:?}", state.docs.len(), self.path());
            }
            Ok(())
        })
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of stored documents (0 when closed)
    pub fn len(&self) -> usize {
        self.state.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ==================== Document Operations ====================

    /// Add a new document; fails if the ID is taken
    pub fn create(&self, id: &str, doc: Document) -> DirResult<()> {
        document::validate_id(id)?;
        self.with_state(|state| {
            if state.docs.contains_key(id) {
                return Err(DirError::AlreadyExists(id.to_string()));
            }
            state.docs.insert(id.to_string(), Value::Object(doc));
            state.dirty = true;
            debug!("Created document {}", id);
            Ok(())
        })
    }

    /// Get a copy of a document
    pub fn read(&self, id: &str) -> DirResult<Document> {
        document::validate_id(id)?;
        self.with_state(|state| {
            state
                .docs
                .get(id)
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| DirError::NotFound(id.to_string()))
        })
    }

    /// Store a document, replacing any existing one
    pub fn replace(&self, id: &str, doc: Document) -> DirResult<()> {
        document::validate_id(id)?;
        self.with_state(|state| {
            state.docs.insert(id.to_string(), Value::Object(doc));
            state.dirty = true;
            debug!("Replaced document {}", id);
            Ok(())
        })
    }

    /// Replace an existing document; fails if it doesn't exist
    pub fn update(&self, id: &str, doc: Document) -> DirResult<()> {
        document::validate_id(id)?;
        self.with_state(|state| {
            let existing = state
                .docs
                .get_mut(id)
                .ok_or_else(|| DirError::NotFound(id.to_string()))?;
            *existing = Value::Object(doc);
            state.dirty = true;
            debug!("Updated document {}", id);
            Ok(())
        })
    }

    /// Merge fields into an existing document
    ///
    /// See [`document::merge_patch`] for the merge rules.
    pub fn patch(&self, id: &str, partial: &Document) -> DirResult<()> {
        document::validate_id(id)?;
        if partial.is_empty() {
            return Err(DirError::BadRequest("patch must contain at least one field".into()));
        }
        self.with_state(|state| {
            let target = state
                .docs
                .get_mut(id)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| DirError::NotFound(id.to_string()))?;
            document::merge_patch(target, partial);
            state.dirty = true;
            debug!("Patched document {} ({} fields)", id, partial.len());
            Ok(())
        })
    }

    /// Remove a document; removing a missing document succeeds
    pub fn delete(&self, id: &str) -> DirResult<()> {
        document::validate_id(id)?;
        self.with_state(|state| {
            if state.docs.remove(id).is_some() {
                state.dirty = true;
                debug!("Deleted document {}", id);
            }
            Ok(())
        })
    }

    // ==================== Listing & Queries ====================

    /// A page of documents in ID order
    ///
    /// A `limit` of 0 uses the default page size.
    pub fn list(&self, offset: usize, limit: usize) -> DirResult<Vec<Document>> {
        self.list_where(offset, limit, |_| true)
    }

    /// Like [`list`](Self::list), skipping documents `admit` rejects
    ///
    /// Rejected documents don't count towards the offset or the limit.
    pub fn list_where<F>(&self, offset: usize, limit: usize, admit: F) -> DirResult<Vec<Document>>
    where
        F: Fn(&str) -> bool,
    {
        let limit = self.limits.clamp(limit);
        self.with_state(|state| {
            Ok(state
                .docs
                .iter()
                .filter(|(id, _)| admit(id))
                .skip(offset)
                .take(limit)
                .filter_map(|(_, doc)| doc.as_object().cloned())
                .collect())
        })
    }

    /// A page of the values matching a filter expression
    ///
    /// Fails with `QuerySyntax` if the expression doesn't parse.
    pub fn query(&self, expr: &str, offset: usize, limit: usize) -> DirResult<Vec<Value>> {
        self.query_where(expr, offset, limit, |_| true)
    }

    /// Like [`query`](Self::query), skipping matches in documents `admit` rejects
    pub fn query_where<F>(
        &self,
        expr: &str,
        offset: usize,
        limit: usize,
        admit: F,
    ) -> DirResult<Vec<Value>>
    where
        F: Fn(&str) -> bool,
    {
        let limit = self.limits.clamp(limit);
        self.with_state(|state| {
            let matches = self.engine.select(expr, &state.docs)?;
            debug!("Query {:?} matched {} values", expr, matches.len());
            Ok(matches
                .into_iter()
                .filter(|m| admit(m.id))
                .skip(offset)
                .take(limit)
                .map(|m| m.value.clone())
                .collect())
        })
    }

    /// Run `f` on the open store's state under the lock
    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> DirResult<T>) -> DirResult<T> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(StorageError::NotOpen {
                path: self.path().to_path_buf(),
            }
            .into());
        }
        f(&mut state)
    }
}

impl std::fmt::Debug for DirStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirStore")
            .field("path", &self.path())
            .field("limits", &self.limits)
            .field("open", &self.is_open())
            .finish()
    }
}
