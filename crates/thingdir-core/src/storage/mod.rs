//! Storage layer
//!
//! Handles persistence of the directory to a single JSON file.
//!
//! The whole collection is loaded into memory when the store opens and
//! written back when it closes (or is flushed). Nothing is written per
//! mutation.

pub mod error;
pub mod persistence;

pub use error::{StorageError, StorageResult};
pub use persistence::JsonFilePersistence;
