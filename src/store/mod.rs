//! Document store abstraction.
//!
//! The engine talks to persistence through [`DocumentStore`]: per-document
//! reads, optimistic read-modify-write transactions, atomic multi-document
//! batches, and equality-filtered queries. Two implementations exist —
//! [`memory::MemoryStore`] for tests and local development, and
//! [`postgres::PgStore`] for production.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Collection names used by the engine.
pub mod collections {
    pub const WARDS: &str = "wards";
    pub const CUSTOMERS: &str = "customers";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const RESPONSES: &str = "responses";
    pub const AUDIT: &str = "audit";
}

/// Bounded retry budget for optimistic transactions. Contention is scoped to
/// a single notification or ward, so conflicts drain quickly; exhausting the
/// budget surfaces [`Error::TransientStore`].
pub const MAX_TXN_ATTEMPTS: usize = 32;

/// Identity of a document: collection + id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    pub collection: &'static str,
    pub id: String,
}

impl DocKey {
    pub fn new(collection: &'static str, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document with its optimistic-concurrency token.
#[derive(Debug, Clone)]
pub struct Document {
    pub key: DocKey,
    /// Bumped by the store on every committed write.
    pub version: u64,
    pub data: JsonValue,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Serialize an entity into document data.
pub fn encode<T: Serialize>(value: &T) -> Result<JsonValue> {
    serde_json::to_value(value).map_err(|e| Error::Store(format!("document encode: {e}")))
}

/// A single write in a transaction or batch.
#[derive(Debug, Clone)]
pub enum DocWrite {
    /// Upsert. Version-checked against the transaction's read snapshot when
    /// the key was read; a key read as absent must still be absent at commit.
    Put { key: DocKey, data: JsonValue },
    /// Insert that fails the whole unit if the document already exists.
    Create { key: DocKey, data: JsonValue },
    /// Delete. Version-checked like `Put` when the key was read.
    Delete { key: DocKey },
}

impl DocWrite {
    pub fn put<T: Serialize>(key: DocKey, value: &T) -> Result<Self> {
        Ok(DocWrite::Put {
            key,
            data: encode(value)?,
        })
    }

    pub fn create<T: Serialize>(key: DocKey, value: &T) -> Result<Self> {
        Ok(DocWrite::Create {
            key,
            data: encode(value)?,
        })
    }

    pub fn delete(key: DocKey) -> Self {
        DocWrite::Delete { key }
    }

    pub fn key(&self) -> &DocKey {
        match self {
            DocWrite::Put { key, .. } | DocWrite::Create { key, .. } | DocWrite::Delete { key } => {
                key
            }
        }
    }
}

/// Read snapshot handed to a transaction's mutate closure.
pub struct TxnView {
    docs: HashMap<DocKey, Document>,
}

impl TxnView {
    pub fn new(docs: HashMap<DocKey, Document>) -> Self {
        Self { docs }
    }

    pub fn get(&self, key: &DocKey) -> Option<&Document> {
        self.docs.get(key)
    }

    /// Decode the document at `key`, or `None` if it was read as absent.
    pub fn decode<T: DeserializeOwned>(&self, key: &DocKey) -> Result<Option<T>> {
        match self.docs.get(key) {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }
}

/// Mutation step of an optimistic transaction. Called once per attempt with a
/// fresh snapshot; must be side-effect free apart from its captures. Returning
/// an error aborts the transaction without writing.
pub type MutateFn<'a> = &'a (dyn Fn(&TxnView) -> Result<Vec<DocWrite>> + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Equality-filtered query over one collection.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: &'static str,
    pub filters: Vec<(String, JsonValue)>,
    pub order_by: Option<(String, Order)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: &'static str) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.filters.push((field.into(), value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Transactional document store.
///
/// Guarantees: single-document linearizability; `transact` provides
/// serializable read-modify-write over its read set (conflicts retried up to
/// [`MAX_TXN_ATTEMPTS`], then [`Error::TransientStore`]); `batch_write`
/// applies all writes or none. No consistency is promised across documents
/// outside those two units.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &DocKey) -> Result<Option<Document>>;

    /// Read `keys`, run `mutate` on the snapshot, commit its writes
    /// atomically. Writes to keys in the read set are version-checked;
    /// a concurrent change triggers an internal retry with a fresh snapshot.
    async fn transact(&self, keys: &[DocKey], mutate: MutateFn<'_>) -> Result<()>;

    /// Atomic all-or-nothing batch without a prior read snapshot.
    async fn batch_write(&self, writes: Vec<DocWrite>) -> Result<()>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>>;
}
