//! Persistence layout (sea-orm entities) and the narrow `RowStore` /
//! `KVCache` / `BlobSink` collaborator interfaces the core depends on.

pub mod blob;
pub mod db;
pub mod entities;
pub mod kv;
pub mod row;
pub mod row_store;

pub use blob::{BlobMetadata, BlobSink, FileBlobSink};
pub use kv::{InMemoryKVCache, KVCache, Lock};
pub use row::{Filter, FilterClause, FilterOp, OrderBy, Row, StoreError};
pub use row_store::{InMemoryRowStore, RowStore};
