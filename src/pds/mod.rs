/// HTTP clients for subscriber PDS hosts and the optional tap service
use std::sync::Arc;

use serde::Deserialize;

use crate::{
    error::{LensError, LensResult},
    identity::IdentityResolver,
    lexicon::AtUri,
};

/// A single record returned by com.atproto.repo.getRecord
#[derive(Debug, Clone, Deserialize)]
pub struct FetchedRecord {
    pub uri: String,
    pub cid: Option<String>,
    pub value: serde_json::Value,
}

/// One page of com.atproto.repo.listRecords output
#[derive(Debug, Clone, Deserialize)]
pub struct ListRecordsPage {
    pub records: Vec<ListedRecord>,
    pub cursor: Option<String>,
}

/// A record entry inside a listRecords page
#[derive(Debug, Clone, Deserialize)]
pub struct ListedRecord {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
}

/// XRPC client for reading records out of subscribers' PDS repos.
///
/// Endpoints are resolved per-DID through the identity resolver, so
/// records are always fetched from their author's own host.
pub struct PdsClient {
    resolver: Arc<IdentityResolver>,
    http_client: reqwest::Client,
}

impl PdsClient {
    pub fn new(resolver: Arc<IdentityResolver>) -> LensResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("aurora-lens/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| LensError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            resolver,
            http_client,
        })
    }

    /// Find the PDS endpoint for a DID, erroring when resolution comes up
    /// empty. Fetch jobs retry on this, which covers PLC lag for fresh DIDs.
    async fn pds_endpoint_for(&self, did: &str) -> LensResult<String> {
        let resolved = self
            .resolver
            .resolve(did)
            .await?
            .ok_or_else(|| LensError::DidResolution(format!("Cannot resolve {}", did)))?;

        resolved
            .pds_endpoint
            .ok_or_else(|| LensError::DidResolution(format!("No PDS endpoint for {}", did)))
    }

    /// Fetch one record from its author's PDS.
    ///
    /// Absence is `Ok(None)`, not an error. Real PDSes report a missing
    /// record as 400 RecordNotFound rather than 404, so both statuses
    /// read as absence here.
    pub async fn get_record(&self, uri: &AtUri) -> LensResult<Option<FetchedRecord>> {
        let endpoint = self.pds_endpoint_for(&uri.did).await?;
        let url = format!(
            "{}/xrpc/com.atproto.repo.getRecord",
            endpoint.trim_end_matches('/')
        );

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("repo", uri.did.as_str()),
                ("collection", uri.collection.as_str()),
                ("rkey", uri.rkey.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            return Ok(None);
        }

        let record = response.error_for_status()?.json().await?;
        Ok(Some(record))
    }

    /// List one page of a collection from a repo. Pass the returned cursor
    /// back in to walk the full collection.
    pub async fn list_records(
        &self,
        did: &str,
        collection: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> LensResult<ListRecordsPage> {
        let endpoint = self.pds_endpoint_for(did).await?;
        let url = format!(
            "{}/xrpc/com.atproto.repo.listRecords",
            endpoint.trim_end_matches('/')
        );

        let limit = limit.to_string();
        let mut params = vec![
            ("repo", did),
            ("collection", collection),
            ("limit", limit.as_str()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }

        let page = self
            .http_client
            .get(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(page)
    }
}

/// Client for an upstream filtered-firehose ("tap") service.
///
/// When configured, the tap is told which repos we track and relays only
/// their events, so the ingest stream shrinks to match the tracked set.
/// Without one the full firehose is consumed and filtering happens at
/// index time instead.
#[derive(Clone)]
pub struct TapClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl TapClient {
    pub fn new(base_url: &str) -> LensResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("aurora-lens/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| LensError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Register a repo with the tap so its events start flowing
    pub async fn add_repo(&self, did: &str) -> LensResult<()> {
        self.post_repo("add", did).await
    }

    /// Drop a repo from the tap
    pub async fn remove_repo(&self, did: &str) -> LensResult<()> {
        self.post_repo("remove", did).await
    }

    async fn post_repo(&self, action: &str, did: &str) -> LensResult<()> {
        let url = format!("{}/repos/{}", self.base_url, action);

        self.http_client
            .post(&url)
            .json(&serde_json::json!({ "did": did }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_records_page_parses() {
        let body = r#"{
            "records": [
                {
                    "uri": "at://did:plc:alice/app.bsky.feed.post/3kabc",
                    "cid": "bafyreibabc",
                    "value": {"$type": "app.bsky.feed.post", "text": "hi", "createdAt": "2024-01-01T00:00:00Z"}
                }
            ],
            "cursor": "3kabc"
        }"#;

        let page: ListRecordsPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.cursor.as_deref(), Some("3kabc"));
        assert_eq!(
            page.records[0].uri,
            "at://did:plc:alice/app.bsky.feed.post/3kabc"
        );
        assert_eq!(page.records[0].value["text"], "hi");
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let page: ListRecordsPage = serde_json::from_str(r#"{"records": []}"#).unwrap();
        assert!(page.records.is_empty());
        assert!(page.cursor.is_none());
    }

    #[test]
    fn test_fetched_record_cid_is_optional() {
        let with_cid: FetchedRecord = serde_json::from_str(
            r#"{"uri": "at://did:plc:a/app.bsky.feed.post/1", "cid": "bafyx", "value": {}}"#,
        )
        .unwrap();
        assert_eq!(with_cid.cid.as_deref(), Some("bafyx"));

        let without: FetchedRecord = serde_json::from_str(
            r#"{"uri": "at://did:plc:a/app.bsky.feed.post/1", "value": {}}"#,
        )
        .unwrap();
        assert!(without.cid.is_none());
    }

    #[test]
    fn test_tap_client_trims_trailing_slash() {
        let tap = TapClient::new("http://localhost:2480/").unwrap();
        assert_eq!(tap.base_url, "http://localhost:2480");
    }
}
