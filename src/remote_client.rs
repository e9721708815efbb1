//! Client side of the server API.
//!
//! [`HttpRemoteStore`] implements [`RemoteStore`] against a running
//! `baobab serve`, so the sync agent can push records over HTTP exactly as it
//! would into a directly opened remote database. [`HttpConnectivity`] probes
//! `GET /health` to decide whether a sync is worth attempting.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::debug;

use baobab_core::models::Ebook;
use baobab_core::store::{RemoteStore, StoreError, StoreResult};
use baobab_core::sync::Connectivity;

use crate::server::ErrorBody;

/// [`RemoteStore`] backed by the server's JSON API.
#[derive(Clone)]
pub struct HttpRemoteStore {
    base: Url,
    client: Client,
}

impl HttpRemoteStore {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:7340`.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid remote URL: {}", base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Remote URL cannot carry a path: {}", base_url);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, segments: &[&str]) -> StoreResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport(format!("bad base URL: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Every remote record, most recent upload first.
    pub async fn list(&self) -> StoreResult<Vec<Ebook>> {
        let url = self.endpoint(&["api", "pdf", "list"])?;
        let response = self.client.get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        response.json().await.map_err(transport)
    }

    /// Connectivity probe sharing this client's base URL and timeout.
    pub fn connectivity(&self) -> HttpConnectivity {
        HttpConnectivity {
            store: self.clone(),
        }
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

/// Maps a non-success response to a store error, preferring the server's
/// own message.
async fn failure(response: Response) -> StoreError {
    let status = response.status();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error.message,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    if status == StatusCode::NOT_FOUND {
        StoreError::NotFound(message)
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upsert(&self, ebook: &Ebook) -> StoreResult<Ebook> {
        let url = self.endpoint(&["api", "ebooks", "sync"])?;
        let response = self
            .client
            .post(url)
            .json(ebook)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        response.json().await.map_err(transport)
    }

    async fn get_by_external_id(&self, id: &str) -> StoreResult<Option<Ebook>> {
        let url = self.endpoint(&["api", "ebooks", id])?;
        let response = self.client.get(url).send().await.map_err(transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response.json().await.map(Some).map_err(transport),
            _ => Err(failure(response).await),
        }
    }
}

/// Online when the server answers `GET /health` with a success status.
pub struct HttpConnectivity {
    store: HttpRemoteStore,
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn is_online(&self) -> bool {
        let url = match self.store.endpoint(&["health"]) {
            Ok(url) => url,
            Err(_) => return false,
        };
        match self.store.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "remote unreachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_segments() {
        let store = HttpRemoteStore::new("http://127.0.0.1:7340/", Duration::from_secs(1)).unwrap();
        let url = store.endpoint(&["api", "ebooks", "a b"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:7340/api/ebooks/a%20b");

        let nested = HttpRemoteStore::new("http://host/baobab", Duration::from_secs(1)).unwrap();
        let url = nested.endpoint(&["health"]).unwrap();
        assert_eq!(url.as_str(), "http://host/baobab/health");
    }

    #[test]
    fn test_rejects_unusable_url() {
        assert!(HttpRemoteStore::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpRemoteStore::new("mailto:me@example.com", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_offline_and_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let store = HttpRemoteStore::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(!store.connectivity().is_online().await);
        let err = store.upsert(&Ebook::new("a.pdf")).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }
}
