//! # dendro Core
//!
//! Versioned node-tree storage engine for dendro.
//!
//! Every resource is a hierarchical document (an XML or JSON node tree)
//! with an immutable history of revisions, each addressable by revision
//! number or by wall-clock timestamp. Revisions share unchanged pages
//! through copy-on-write, every node can carry a structural hash usable
//! as a tamper check and ETag-style change token, and transactions give
//! one writer and any number of readers snapshot-isolated views of the
//! same resource.
//!
//! This crate provides:
//! - Node model and structural hash engine
//! - Copy-on-write page store with per-revision page tables
//! - Append-only revision index with timestamp resolution
//! - Single-writer / multi-reader transactions with cursors
//! - Resource and database catalog management
//!
//! ## Example
//!
//! ```rust
//! use dendro_core::{Database, DocumentKind, NodePayload, ResourceConfig, RevisionSelector};
//!
//! let db = Database::open_in_memory();
//! db.create_resource("books", ResourceConfig::new(DocumentKind::Xml)).unwrap();
//!
//! let books = db.open_resource("books").unwrap();
//! let mut wtx = books.begin_write().unwrap();
//! wtx.insert_first_child(NodePayload::Element {
//!     name: "book".to_string(),
//!     attributes: vec![],
//! }).unwrap();
//! let revision = wtx.commit().unwrap();
//!
//! let rtx = books.begin_read(RevisionSelector::Number(revision)).unwrap();
//! assert_eq!(rtx.revision(), revision);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod database;
pub mod dir;
pub mod error;
pub mod hash;
pub mod node;
pub mod page;
pub mod resource;
pub mod revision;
pub mod transaction;
pub mod types;

pub use config::{DatabaseConfig, ResourceConfig};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use hash::{HashEngine, HashStrategy, NodeHash, HASH_SIZE};
pub use node::{DocumentKind, Node, NodePayload};
pub use resource::Resource;
pub use revision::RevisionEntry;
pub use transaction::{
    ReadTransaction, RevisionSelector, TransactionState, WriteTransaction,
};
pub use types::{NodeId, PageNumber, RevisionNumber, SnapshotId, TransactionId};
