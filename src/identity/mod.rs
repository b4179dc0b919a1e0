/// Identity Resolution System
///
/// Resolves DIDs to their documents (PLC directory or did:web) and keeps
/// a TTL-bounded cache of documents and DID -> handle mappings so repeated
/// lookups stay off the network.

pub mod cache;
pub mod resolver;

pub use cache::DidCache;
pub use resolver::IdentityResolver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cached DID document entry
#[derive(Debug, Clone)]
pub struct CachedDidDoc {
    pub doc: String, // JSON-encoded DID document
    pub updated_at: DateTime<Utc>,
}

/// Cached DID -> handle mapping entry
#[derive(Debug, Clone)]
pub struct CachedHandle {
    pub handle: String,
    pub updated_at: DateTime<Utc>,
}

/// What a successful DID resolution yields. Any field the document
/// does not carry is simply absent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDid {
    pub did: String,
    pub handle: Option<String>,
    pub pds_endpoint: Option<String>,
    pub signing_key: Option<String>,
}

/// A DID document as served by the PLC directory or a did:web host.
/// Only the fields we consume are modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "alsoKnownAs", default)]
    pub also_known_as: Vec<String>,
    #[serde(rename = "verificationMethod", default)]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub service: Vec<DidService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    #[serde(rename = "publicKeyMultibase", default)]
    pub public_key_multibase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidService {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: serde_json::Value,
}

impl DidDocument {
    /// The declared handle, taken from the first `at://` alias.
    pub fn handle(&self) -> Option<String> {
        self.also_known_as
            .iter()
            .find_map(|aka| aka.strip_prefix("at://"))
            .map(|h| h.to_string())
    }

    /// The PDS endpoint from the `#atproto_pds` service entry.
    pub fn pds_endpoint(&self) -> Option<String> {
        self.service
            .iter()
            .find(|s| s.id.ends_with("#atproto_pds") || s.service_type == "AtprotoPersonalDataServer")
            .and_then(|s| s.service_endpoint.as_str())
            .map(|e| e.to_string())
    }

    /// The atproto signing key from the `#atproto` verification method.
    pub fn signing_key(&self) -> Option<String> {
        self.verification_method
            .iter()
            .find(|m| m.id.ends_with("#atproto"))
            .and_then(|m| m.public_key_multibase.clone())
    }
}
