//! Remote document store interface.
//!
//! The remote side is an opaque authoritative store of JSON documents in
//! named collections. The sync layer only needs the small surface modeled
//! by [`DocumentStore`]; query planning and persistence guarantees are the
//! store's problem.

mod http;
mod memory;
pub mod timestamp;

pub use http::HttpStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

/// Errors from the remote store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
  #[error("remote transport error: {0}")]
  Transport(String),
  #[error("remote returned status {code}: {message}")]
  Status { code: u16, message: String },
  #[error("failed to decode remote response: {0}")]
  Decode(String),
  #[error("remote store is offline")]
  Offline,
}

impl RemoteError {
  /// True for failures worth replaying later (network down, throttling,
  /// server errors) as opposed to rejections that will never succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      RemoteError::Transport(_) | RemoteError::Offline => true,
      RemoteError::Status { code, .. } => *code == 429 || *code >= 500,
      RemoteError::Decode(_) => false,
    }
  }
}

/// Read a decimal out of a JSON scalar. Amounts travel as strings (the
/// lossless decimal form) but tolerate plain numbers from older clients.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
  match value {
    Value::String(s) => s.parse().ok(),
    Value::Number(n) => n.as_f64().and_then(Decimal::from_f64_retain),
    _ => None,
  }
}

/// A document as stored remotely: server-assigned id plus JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
  pub id: String,
  pub data: Value,
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Asc,
  Desc,
}

/// Comparison operator in a query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
  Eq,
  Gte,
  Lte,
}

/// A single field filter.
#[derive(Debug, Clone)]
pub struct Filter {
  pub field: String,
  pub op: FilterOp,
  pub value: Value,
}

/// A query against one collection, always scoped to an owner.
#[derive(Debug, Clone)]
pub struct QuerySpec {
  pub owner_id: String,
  pub filters: Vec<Filter>,
  pub order_by: Option<(String, Direction)>,
  pub limit: Option<u32>,
}

impl QuerySpec {
  pub fn for_owner(owner_id: &str) -> Self {
    Self {
      owner_id: owner_id.to_string(),
      filters: Vec::new(),
      order_by: None,
      limit: None,
    }
  }

  pub fn filter(mut self, field: &str, op: FilterOp, value: Value) -> Self {
    self.filters.push(Filter {
      field: field.to_string(),
      op,
      value,
    });
    self
  }

  pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
    self.order_by = Some((field.to_string(), direction));
    self
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// The operations the sync layer needs from the remote store.
///
/// All calls are async and fallible; the sync layer decides what failures
/// mean (optimistic retention, outbox replay, or surfacing to the caller).
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
  /// Create a document; the store assigns and returns its id.
  async fn create_document(&self, collection: &str, data: &Value) -> Result<String, RemoteError>;

  /// Fetch one document, or None when absent.
  async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>, RemoteError>;

  /// Run a filtered, ordered, limited query.
  async fn query_documents(
    &self,
    collection: &str,
    query: &QuerySpec,
  ) -> Result<Vec<Document>, RemoteError>;

  /// Merge `data` into an existing document (absent fields are kept).
  /// Creates the document when it does not exist yet.
  async fn update_document(&self, collection: &str, id: &str, data: &Value)
    -> Result<(), RemoteError>;

  /// Delete a document; deleting an absent document is not an error.
  async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

  /// Server-side atomic increment of a numeric field. This is the store's
  /// native primitive, not a read-modify-write, so concurrent remote
  /// writers cannot lose updates.
  async fn atomic_increment(
    &self,
    collection: &str,
    id: &str,
    field: &str,
    delta: Decimal,
  ) -> Result<(), RemoteError>;
}
