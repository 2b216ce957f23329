//! HTTP-backed document store client.
//!
//! Speaks a small REST dialect: `POST /v1/{collection}` to create,
//! `GET`/`PATCH`/`DELETE /v1/{collection}/{id}` for single documents,
//! `GET /v1/{collection}?{query}` for queries and
//! `POST /v1/{collection}/{id}/increment` for the server-side atomic
//! increment.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::{Direction, Document, DocumentStore, FilterOp, QuerySpec, RemoteError};

/// Remote client over HTTP.
#[derive(Clone)]
pub struct HttpStore {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

#[derive(Deserialize)]
struct CreateResponse {
  id: String,
}

#[derive(Deserialize)]
struct DocumentResponse {
  id: String,
  data: Value,
}

#[derive(Deserialize)]
struct QueryResponse {
  documents: Vec<DocumentResponse>,
}

impl HttpStore {
  pub fn new(base_url: &str, token: Option<String>) -> Result<Self, RemoteError> {
    let base = Url::parse(base_url)
      .map_err(|e| RemoteError::Transport(format!("invalid base url {}: {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| RemoteError::Transport(format!("failed to build http client: {}", e)))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = self.base.clone();
    {
      let mut parts = url
        .path_segments_mut()
        .map_err(|_| RemoteError::Transport("base url cannot have segments".into()))?;
      parts.pop_if_empty();
      parts.push("v1");
      for segment in segments {
        parts.push(segment);
      }
    }
    Ok(url)
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    let mut req = self.client.request(method, url);
    if let Some(token) = &self.token {
      req = req.bearer_auth(token);
    }
    req
  }

  async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
    let resp = req
      .send()
      .await
      .map_err(|e| RemoteError::Transport(e.to_string()))?;

    let status = resp.status();
    if status.is_success() {
      return Ok(resp);
    }

    let message = resp.text().await.unwrap_or_default();
    Err(RemoteError::Status {
      code: status.as_u16(),
      message,
    })
  }
}

fn encode_query(query: &QuerySpec) -> Vec<(String, String)> {
  let mut params = vec![("owner".to_string(), query.owner_id.clone())];

  for filter in &query.filters {
    let op = match filter.op {
      FilterOp::Eq => "eq",
      FilterOp::Gte => "gte",
      FilterOp::Lte => "lte",
    };
    // Filter values travel as `field:op:json` triples.
    params.push((
      "where".to_string(),
      format!("{}:{}:{}", filter.field, op, filter.value),
    ));
  }

  if let Some((field, direction)) = &query.order_by {
    params.push(("order_by".to_string(), field.clone()));
    let dir = match direction {
      Direction::Asc => "asc",
      Direction::Desc => "desc",
    };
    params.push(("dir".to_string(), dir.to_string()));
  }

  if let Some(limit) = query.limit {
    params.push(("limit".to_string(), limit.to_string()));
  }

  params
}

#[async_trait]
impl DocumentStore for HttpStore {
  async fn create_document(&self, collection: &str, data: &Value) -> Result<String, RemoteError> {
    let url = self.endpoint(&[collection])?;
    let resp = self
      .send(self.request(reqwest::Method::POST, url).json(data))
      .await?;

    let created: CreateResponse = resp
      .json()
      .await
      .map_err(|e| RemoteError::Decode(e.to_string()))?;
    Ok(created.id)
  }

  async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>, RemoteError> {
    let url = self.endpoint(&[collection, id])?;
    let resp = match self.send(self.request(reqwest::Method::GET, url)).await {
      Ok(resp) => resp,
      Err(RemoteError::Status { code: 404, .. }) => return Ok(None),
      Err(e) => return Err(e),
    };

    let doc: DocumentResponse = resp
      .json()
      .await
      .map_err(|e| RemoteError::Decode(e.to_string()))?;
    Ok(Some(Document {
      id: doc.id,
      data: doc.data,
    }))
  }

  async fn query_documents(
    &self,
    collection: &str,
    query: &QuerySpec,
  ) -> Result<Vec<Document>, RemoteError> {
    let url = self.endpoint(&[collection])?;
    let resp = self
      .send(
        self
          .request(reqwest::Method::GET, url)
          .query(&encode_query(query)),
      )
      .await?;

    let result: QueryResponse = resp
      .json()
      .await
      .map_err(|e| RemoteError::Decode(e.to_string()))?;

    Ok(
      result
        .documents
        .into_iter()
        .map(|doc| Document {
          id: doc.id,
          data: doc.data,
        })
        .collect(),
    )
  }

  async fn update_document(
    &self,
    collection: &str,
    id: &str,
    data: &Value,
  ) -> Result<(), RemoteError> {
    let url = self.endpoint(&[collection, id])?;
    self
      .send(self.request(reqwest::Method::PATCH, url).json(data))
      .await?;
    Ok(())
  }

  async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
    let url = self.endpoint(&[collection, id])?;
    match self.send(self.request(reqwest::Method::DELETE, url)).await {
      // Deleting something already gone is a success for our purposes.
      Ok(_) | Err(RemoteError::Status { code: 404, .. }) => Ok(()),
      Err(e) => Err(e),
    }
  }

  async fn atomic_increment(
    &self,
    collection: &str,
    id: &str,
    field: &str,
    delta: Decimal,
  ) -> Result<(), RemoteError> {
    let url = self.endpoint(&[collection, id, "increment"])?;
    let body = json!({ "field": field, "delta": delta });
    self
      .send(self.request(reqwest::Method::POST, url).json(&body))
      .await?;
    Ok(())
  }
}
