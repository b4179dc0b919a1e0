/// Identity Resolver - Orchestrates DID document resolution with caching
use crate::{
    error::{LensError, LensResult},
    identity::{DidCache, DidDocument, ResolvedDid},
};

/// Main identity resolver - combines the cache with document fetching
#[derive(Clone)]
pub struct IdentityResolver {
    cache: DidCache,
    http_client: reqwest::Client,
    plc_url: String,
}

impl IdentityResolver {
    /// Create a new identity resolver
    pub fn new(cache: DidCache, plc_url: String) -> LensResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("aurora-lens/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| LensError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            cache,
            http_client,
            plc_url,
        })
    }

    /// Resolve a DID to its handle, PDS endpoint, and signing key.
    ///
    /// Resolution order:
    /// 1. Check the document cache (fast path, no network)
    /// 2. Fetch from the PLC directory or did:web host
    /// 3. Cache the fetched document and handle mapping
    ///
    /// Resolution failures surface as `None`, never as an error: callers
    /// index with whatever identity data they have. Only database errors
    /// propagate.
    pub async fn resolve(&self, did: &str) -> LensResult<Option<ResolvedDid>> {
        // Check cache first
        if let Some(cached) = self.cache.get_did_doc(did).await? {
            match serde_json::from_str::<DidDocument>(&cached.doc) {
                Ok(doc) => return Ok(Some(self.resolved_from_doc(did, &doc))),
                Err(e) => {
                    // Corrupt cache entry: drop it and fall through to a fetch
                    tracing::warn!("Discarding unparseable cached DID document for {}: {}", did, e);
                    self.cache.delete_did_doc(did).await?;
                }
            }
        }

        // Cache miss - fetch from source
        let doc = match self.fetch_did_document(did).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("DID resolution failed for {}: {}", did, e);
                return Ok(None);
            }
        };

        let doc_json = serde_json::to_string(&doc)
            .map_err(|e| LensError::Internal(format!("Failed to serialize DID document: {}", e)))?;
        self.cache.cache_did_doc(did, &doc_json).await?;

        let resolved = self.resolved_from_doc(did, &doc);
        if let Some(handle) = &resolved.handle {
            self.cache.cache_handle(did, handle).await?;
        }

        Ok(Some(resolved))
    }

    fn resolved_from_doc(&self, did: &str, doc: &DidDocument) -> ResolvedDid {
        ResolvedDid {
            did: did.to_string(),
            handle: doc.handle(),
            pds_endpoint: doc.pds_endpoint(),
            signing_key: doc.signing_key(),
        }
    }

    /// Get the cached handle for a DID without touching the network
    pub async fn cached_handle(&self, did: &str) -> LensResult<Option<String>> {
        Ok(self.cache.get_handle(did).await?.map(|c| c.handle))
    }

    /// Fetch DID document from source
    async fn fetch_did_document(&self, did: &str) -> LensResult<DidDocument> {
        if did.starts_with("did:plc:") {
            self.fetch_plc_document(did).await
        } else if did.starts_with("did:web:") {
            self.fetch_web_document(did).await
        } else {
            Err(LensError::DidResolution(format!(
                "Unsupported DID method: {}",
                did
            )))
        }
    }

    /// Fetch DID document from the PLC directory
    async fn fetch_plc_document(&self, did: &str) -> LensResult<DidDocument> {
        let url = format!("{}/{}", self.plc_url.trim_end_matches('/'), did);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| LensError::DidResolution(format!("Failed to fetch PLC document: {}", e)))?;

        if !response.status().is_success() {
            return Err(LensError::DidResolution(format!(
                "PLC directory returned error: {}",
                response.status()
            )));
        }

        let doc: DidDocument = response
            .json()
            .await
            .map_err(|e| LensError::DidResolution(format!("Invalid PLC document: {}", e)))?;

        Ok(doc)
    }

    /// Fetch DID document from a did:web host
    async fn fetch_web_document(&self, did: &str) -> LensResult<DidDocument> {
        let url = build_web_url(did)?;

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            LensError::DidResolution(format!("Failed to fetch did:web document: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(LensError::DidResolution(format!(
                "did:web server returned error: {}",
                response.status()
            )));
        }

        let doc: DidDocument = response
            .json()
            .await
            .map_err(|e| LensError::DidResolution(format!("Invalid did:web document: {}", e)))?;

        Ok(doc)
    }

    /// Invalidate everything cached for a DID (force re-resolution)
    pub async fn invalidate(&self, did: &str) -> LensResult<()> {
        self.cache.invalidate(did).await
    }

    /// Clean up expired cache entries
    pub async fn cleanup_cache(&self) -> LensResult<()> {
        self.cache.cleanup_expired().await
    }
}

/// Build the document URL for a did:web DID.
///
/// did:web:example.com -> https://example.com/.well-known/did.json
/// did:web:example.com:user:alice -> https://example.com/user/alice/did.json
fn build_web_url(did: &str) -> LensResult<String> {
    let did_suffix = did
        .strip_prefix("did:web:")
        .ok_or_else(|| LensError::DidResolution("Invalid did:web format".to_string()))?;

    let parts: Vec<&str> = did_suffix.split(':').collect();
    let domain = parts
        .first()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| LensError::DidResolution("Missing domain in did:web".to_string()))?;

    if parts.len() == 1 {
        Ok(format!("https://{}/.well-known/did.json", domain))
    } else {
        let path = parts[1..].join("/");
        Ok(format!("https://{}/{}/did.json", domain, path))
    }
}
