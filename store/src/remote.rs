//! Remote sync API: the request/response contract and its HTTP client.
//!
//! The coordinator and outbox talk to the remote through the [`RemoteApi`]
//! trait; production uses [`HttpRemote`], tests substitute an in-memory
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use satchel_engine::Record;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One page of remote changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePage {
    /// Records changed since the requested watermark
    pub items: Vec<Record>,
    /// Whether the server holds further pages
    pub has_more: bool,
}

/// Per-item acknowledgment for a batch upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAck {
    /// Record ids the server accepted
    pub accepted: Vec<String>,
    /// Items the server refused, with reasons
    #[serde(default)]
    pub rejected: Vec<RejectedItem>,
}

/// A refused batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedItem {
    pub id: String,
    pub reason: String,
}

/// The remote source of truth, per collection.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// `GET /{collection}/changes?since=<unixMillis>&limit=<n>`
    async fn changes(&self, collection: &str, since: u64, limit: usize) -> Result<ChangePage>;

    /// `POST /{collection}/batch`
    async fn push_batch(&self, collection: &str, records: &[Record]) -> Result<BatchAck>;

    /// `DELETE /{collection}/{id}`; 2xx or 404 both count as done.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// `HEAD /health`; any failure reads as "down".
    async fn health(&self) -> bool;
}

/// HTTP implementation of the remote contract.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    /// Build a client for the given base URL.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn changes(&self, collection: &str, since: u64, limit: usize) -> Result<ChangePage> {
        let url = format!("{}/{}/changes", self.base_url, collection);
        let page = self
            .client
            .get(&url)
            .query(&[("since", since.to_string()), ("limit", limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json::<ChangePage>()
            .await?;

        Ok(page)
    }

    async fn push_batch(&self, collection: &str, records: &[Record]) -> Result<BatchAck> {
        let url = format!("{}/{}/batch", self.base_url, collection);
        let ack = self
            .client
            .post(&url)
            .json(records)
            .send()
            .await?
            .error_for_status()?
            .json::<BatchAck>()
            .await?;

        Ok(ack)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = format!("{}/{}/{}", self.base_url, collection, id);
        let response = self.client.delete(&url).send().await?;

        // 404 means the remote never saw the record; the deletion is done
        // either way.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status()?;

        Ok(())
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.head(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
