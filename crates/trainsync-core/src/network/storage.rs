//! Bucket listing over HTTP.
//!
//! The listing endpoint returns a JSON array of
//! `{ filename, url, lastModified }` for a prefix (`styles/` or `actors/`).
//! Upload and download are handled elsewhere; only the listing is consumed.

use crate::config::NetworkConfig;
use crate::models::EntityKind;
use crate::network::client::{build_http_client, ensure_success};
use crate::network::retry::{with_retry, RetryPolicy};
use crate::network::traits::{StorageLister, StorageObject};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// [`StorageLister`] backed by a JSON listing endpoint.
pub struct HttpStorageLister {
    client: Client,
    list_url: String,
    retry: RetryPolicy,
}

impl HttpStorageLister {
    pub fn new(list_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(NetworkConfig::REQUEST_TIMEOUT)?,
            list_url: list_url.into(),
            retry: RetryPolicy::default(),
        })
    }

    fn prefix(kind: EntityKind) -> String {
        format!("{}/", kind.dir_name())
    }
}

#[async_trait]
impl StorageLister for HttpStorageLister {
    async fn list(&self, kind: EntityKind) -> Result<Vec<StorageObject>> {
        let prefix = Self::prefix(kind);
        let client = &self.client;
        let list_url = self.list_url.as_str();
        let prefix_ref = prefix.as_str();
        let objects: Vec<StorageObject> = with_retry(&self.retry, "Storage listing", move || async move {
            let response = client
                .get(list_url)
                .query(&[("prefix", prefix_ref)])
                .send()
                .await?;
            let response = ensure_success(response, "Storage listing").await?;
            Ok(response.json().await?)
        })
        .await?;

        debug!("Listed {} objects under {}", objects.len(), prefix);
        Ok(objects)
    }
}
