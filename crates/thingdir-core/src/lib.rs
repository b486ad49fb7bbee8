//! thingdir Core Library
//!
//! This crate provides the core of thingdir, a directory service for Thing
//! Descriptions and other JSON documents.
//!
//! # Architecture
//!
//! - **Store**: every document lives in memory behind one lock and is
//!   written to a single JSON file on close or flush
//! - **Queries**: JSONPath filter expressions evaluated over the whole directory
//! - **Server**: HTTP API with pluggable authentication and authorization
//! - **Client**: typed async counterpart of the HTTP API
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(DirStore::new(&config.store_path));
//! let mut server = DirServer::new(config, store, authenticator, authorizer);
//! let addr = server.start().await?;
//!
//! let mut client = DirClient::new(&format!("http://{}", addr))?;
//! client.connect().await?;
//! client.update("thing1", &doc).await?;
//! let sensors = client.query(r#"$[?(@.type=="sensor")]"#, 0, 0).await?;
//! ```
//!
//! # Modules
//!
//! - `store`: The document store (main entry point)
//! - `document`: Document type and merge-patch rules
//! - `query`: Filter-path parser and evaluator
//! - `storage`: JSON file persistence
//! - `protocol`: Routes, paging and error bodies shared by server and client
//! - `auth`: Authentication and authorization hooks
//! - `server`: HTTP server
//! - `client`: HTTP client
//! - `discovery`: Service discovery hook
//! - `config`: Service configuration

pub mod auth;
pub mod client;
pub mod config;
pub mod discovery;
pub mod document;
pub mod error;
pub mod protocol;
pub mod query;
pub mod server;
pub mod storage;
pub mod store;

pub use auth::{
    Action, AllowAll, Authenticator, Authorizer, Credentials, DenyAll, Identity,
    PasswordAuthenticator, Role, RoleAuthorizer,
};
pub use client::{ClientError, DirClient};
pub use config::Config;
pub use discovery::{DiscoveryPublisher, LogPublisher, ServiceAdvert};
pub use document::Document;
pub use error::{DirError, DirResult};
pub use protocol::{ErrorKind, PageLimits};
pub use query::{PathQuery, PathQueryEngine, QueryEngine, QueryError};
pub use server::{DirServer, ServerError};
pub use storage::{JsonFilePersistence, StorageError};
pub use store::DirStore;
