//! cowdb - An embedded document store core in Rust
//!
//! This crate provides the storage core of an embedded document database: a
//! paged file, a copy-on-write B-tree over it, and a transaction manager that
//! lets one writer and any number of readers work at the same time without
//! readers ever taking a lock on tree pages.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Handles disk I/O and page lifecycle
//!   - `PageIo`: Positional byte I/O with file and in-memory backends
//!   - `DiskManager`: Reads and writes whole pages
//!   - `PageManager`: Allocates write-once pages, tracks free and retired pages
//!   - `RootTable`: Double-buffered commit record in page 0
//!
//! - **Page Cache** (`buffer`): Immutable page images with LRU-K eviction
//!
//! - **Codec** (`codec`): Tagged binary encoding of node pages and document values
//!
//! - **Index** (`index`): Copy-on-write B-tree with range iteration and a verifier
//!
//! - **Transactions** (`txn`): Single-writer gate, snapshot pins and commit
//!
//! # Example
//!
//! ```rust,no_run
//! use cowdb::{Config, Database, Value};
//!
//! let db = Database::open("docs.db", Config::default()).unwrap();
//!
//! let mut txn = db.begin_write().unwrap();
//! txn.insert("user:1", &Value::document([("name", "ada")])).unwrap();
//! let version = txn.commit().unwrap();
//!
//! let mut reader = db.begin_read();
//! assert_eq!(reader.version(), version);
//! let doc = reader.get("user:1").unwrap().unwrap();
//! assert_eq!(doc.get("name"), Some(&Value::from("ada")));
//! ```

pub mod buffer;
pub mod codec;
pub mod common;
pub mod database;
pub mod index;
pub mod storage;
pub mod txn;

// Re-export commonly used types at the crate root
pub use codec::Value;
pub use common::{Config, DbError, PageId, Result, RootPointer, TxnId, Version, WritePolicy};
pub use database::{Database, DatabaseStats};
pub use index::TreeStats;
pub use txn::{ReadTransaction, TxnState, WriteTransaction};
