//! In-process document store.
//!
//! Backs hermetic tests and cache-only demo sessions. Supports flipping an
//! offline switch to exercise the optimistic/outbox paths without a
//! network.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use super::{decimal_from_value, Direction, Document, DocumentStore, FilterOp, QuerySpec, RemoteError};

#[derive(Default)]
struct Inner {
  collections: HashMap<String, Vec<Document>>,
  next_id: u64,
}

/// In-memory [`DocumentStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
  offline: AtomicBool,
  create_calls: AtomicUsize,
  delete_calls: AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Simulate losing or regaining connectivity. While offline every call
  /// fails with [`RemoteError::Offline`].
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, AtomicOrdering::SeqCst);
  }

  /// Number of create calls attempted, including while offline.
  pub fn create_calls(&self) -> usize {
    self.create_calls.load(AtomicOrdering::SeqCst)
  }

  /// Number of delete calls attempted, including while offline.
  pub fn delete_calls(&self) -> usize {
    self.delete_calls.load(AtomicOrdering::SeqCst)
  }

  /// Direct snapshot of a collection, for assertions.
  pub fn documents(&self, collection: &str) -> Vec<Document> {
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    inner.collections.get(collection).cloned().unwrap_or_default()
  }

  /// Seed a document with a known id, bypassing the store's id assignment.
  pub fn seed_document(&self, collection: &str, id: &str, data: Value) {
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    inner
      .collections
      .entry(collection.to_string())
      .or_default()
      .push(Document {
        id: id.to_string(),
        data,
      });
  }

  fn check_online(&self) -> Result<(), RemoteError> {
    if self.offline.load(AtomicOrdering::SeqCst) {
      Err(RemoteError::Offline)
    } else {
      Ok(())
    }
  }
}

/// Order two JSON scalars; mixed or non-scalar shapes compare equal.
fn cmp_values(a: &Value, b: &Value) -> Ordering {
  match (a, b) {
    (Value::String(a), Value::String(b)) => a.cmp(b),
    (Value::Number(a), Value::Number(b)) => a
      .as_f64()
      .partial_cmp(&b.as_f64())
      .unwrap_or(Ordering::Equal),
    _ => Ordering::Equal,
  }
}

fn matches_filter(doc: &Document, field: &str, op: FilterOp, value: &Value) -> bool {
  let Some(actual) = doc.data.get(field) else {
    return false;
  };
  match op {
    FilterOp::Eq => actual == value,
    FilterOp::Gte => cmp_values(actual, value) != Ordering::Less,
    FilterOp::Lte => cmp_values(actual, value) != Ordering::Greater,
  }
}

#[async_trait]
impl DocumentStore for MemoryStore {
  async fn create_document(&self, collection: &str, data: &Value) -> Result<String, RemoteError> {
    self.create_calls.fetch_add(1, AtomicOrdering::SeqCst);
    self.check_online()?;

    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    inner.next_id += 1;
    let id = format!("r{}", inner.next_id);
    inner
      .collections
      .entry(collection.to_string())
      .or_default()
      .push(Document {
        id: id.clone(),
        data: data.clone(),
      });
    Ok(id)
  }

  async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>, RemoteError> {
    self.check_online()?;
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    Ok(
      inner
        .collections
        .get(collection)
        .and_then(|docs| docs.iter().find(|doc| doc.id == id))
        .cloned(),
    )
  }

  async fn query_documents(
    &self,
    collection: &str,
    query: &QuerySpec,
  ) -> Result<Vec<Document>, RemoteError> {
    self.check_online()?;
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

    let mut docs: Vec<Document> = inner
      .collections
      .get(collection)
      .map(|docs| {
        docs
          .iter()
          .filter(|doc| doc.data.get("owner_id") == Some(&Value::String(query.owner_id.clone())))
          .filter(|doc| {
            query
              .filters
              .iter()
              .all(|f| matches_filter(doc, &f.field, f.op, &f.value))
          })
          .cloned()
          .collect()
      })
      .unwrap_or_default();

    if let Some((field, direction)) = &query.order_by {
      docs.sort_by(|a, b| {
        let ord = cmp_values(
          a.data.get(field).unwrap_or(&Value::Null),
          b.data.get(field).unwrap_or(&Value::Null),
        );
        match direction {
          Direction::Asc => ord,
          Direction::Desc => ord.reverse(),
        }
      });
    }

    if let Some(limit) = query.limit {
      docs.truncate(limit as usize);
    }

    Ok(docs)
  }

  async fn update_document(
    &self,
    collection: &str,
    id: &str,
    data: &Value,
  ) -> Result<(), RemoteError> {
    self.check_online()?;
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    let docs = inner.collections.entry(collection.to_string()).or_default();

    if let Some(doc) = docs.iter_mut().find(|doc| doc.id == id) {
      // Merge semantics: patch fields win, absent fields survive.
      if let (Value::Object(target), Value::Object(patch)) = (&mut doc.data, data) {
        for (k, v) in patch {
          target.insert(k.clone(), v.clone());
        }
      } else {
        doc.data = data.clone();
      }
    } else {
      docs.push(Document {
        id: id.to_string(),
        data: data.clone(),
      });
    }
    Ok(())
  }

  async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
    self.delete_calls.fetch_add(1, AtomicOrdering::SeqCst);
    self.check_online()?;
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(docs) = inner.collections.get_mut(collection) {
      docs.retain(|doc| doc.id != id);
    }
    Ok(())
  }

  async fn atomic_increment(
    &self,
    collection: &str,
    id: &str,
    field: &str,
    delta: Decimal,
  ) -> Result<(), RemoteError> {
    self.check_online()?;
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    let doc = inner
      .collections
      .get_mut(collection)
      .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
      .ok_or(RemoteError::Status {
        code: 404,
        message: format!("no document {}/{}", collection, id),
      })?;

    let current = doc
      .data
      .get(field)
      .and_then(decimal_from_value)
      .unwrap_or(Decimal::ZERO);
    doc.data[field] = Value::String((current + delta).to_string());
    Ok(())
  }
}
