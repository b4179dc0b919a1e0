/// Lexicon shapes for the closed set of indexed collections
///
/// The indexer supports a fixed set of record types; dispatch is a match on
/// `Collection`, not a registry. Unknown NSIDs are skipped upstream.
use crate::error::{LensError, LensResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The collections this AppView indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Profile,
    Post,
    Follow,
    Like,
    Repost,
    Generator,
    Subscription,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Profile,
        Collection::Post,
        Collection::Follow,
        Collection::Like,
        Collection::Repost,
        Collection::Generator,
        Collection::Subscription,
    ];

    pub fn from_nsid(nsid: &str) -> Option<Self> {
        match nsid {
            "app.bsky.actor.profile" => Some(Collection::Profile),
            "app.bsky.feed.post" => Some(Collection::Post),
            "app.bsky.graph.follow" => Some(Collection::Follow),
            "app.bsky.feed.like" => Some(Collection::Like),
            "app.bsky.feed.repost" => Some(Collection::Repost),
            "app.bsky.feed.generator" => Some(Collection::Generator),
            "social.aurora.lens.subscription" => Some(Collection::Subscription),
            _ => None,
        }
    }

    pub fn nsid(&self) -> &'static str {
        match self {
            Collection::Profile => "app.bsky.actor.profile",
            Collection::Post => "app.bsky.feed.post",
            Collection::Follow => "app.bsky.graph.follow",
            Collection::Like => "app.bsky.feed.like",
            Collection::Repost => "app.bsky.feed.repost",
            Collection::Generator => "app.bsky.feed.generator",
            Collection::Subscription => "social.aurora.lens.subscription",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nsid())
    }
}

/// A parsed at:// URI (at://did/collection/rkey)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn new(did: &str, collection: &str, rkey: &str) -> Self {
        Self {
            did: did.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        }
    }

    pub fn parse(uri: &str) -> LensResult<Self> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| LensError::Validation(format!("Not an at:// URI: {}", uri)))?;

        let mut parts = rest.splitn(3, '/');
        let did = parts.next().unwrap_or_default();
        let collection = parts.next().unwrap_or_default();
        let rkey = parts.next().unwrap_or_default();

        if did.is_empty() || collection.is_empty() || rkey.is_empty() {
            return Err(LensError::Validation(format!("Malformed at:// URI: {}", uri)));
        }

        Ok(Self::new(did, collection, rkey))
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

/// Build an at:// URI without going through the struct
pub fn make_uri(did: &str, collection: &str, rkey: &str) -> String {
    format!("at://{}/{}/{}", did, collection, rkey)
}

/// A strong reference to another record (uri + cid)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecordRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplyRef {
    pub root: RecordRef,
    pub parent: RecordRef,
}

/// Blob reference; tolerates both the $link form and the legacy cid form
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlobRef {
    #[serde(rename = "ref", default)]
    pub link: Option<CidLink>,
    #[serde(default)]
    pub cid: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

impl BlobRef {
    pub fn cid_string(&self) -> Option<String> {
        if let Some(link) = &self.link {
            return Some(link.link.clone());
        }
        self.cid.clone()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileRecord {
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<BlobRef>,
    #[serde(default)]
    pub banner: Option<BlobRef>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostRecord {
    pub text: String,
    #[serde(default)]
    pub langs: Option<Vec<String>>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FollowRecord {
    pub subject: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LikeRecord {
    pub subject: RecordRef,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepostRecord {
    pub subject: RecordRef,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneratorRecord {
    pub did: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionRecord {
    #[serde(rename = "inviteCode", default)]
    pub invite_code: Option<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

/// A commit payload parsed against its collection's shape
#[derive(Debug, Clone)]
pub enum RecordPayload {
    Profile(ProfileRecord),
    Post(PostRecord),
    Follow(FollowRecord),
    Like(LikeRecord),
    Repost(RepostRecord),
    Generator(GeneratorRecord),
    Subscription(SubscriptionRecord),
}

fn parse_as<T: DeserializeOwned>(collection: Collection, raw: &Value) -> LensResult<T> {
    serde_json::from_value(raw.clone())
        .map_err(|e| LensError::Validation(format!("Invalid {} record: {}", collection.nsid(), e)))
}

impl RecordPayload {
    /// Parse a raw commit payload. Failure here is permanent: the event is
    /// skipped, never retried.
    pub fn parse(collection: Collection, raw: &Value) -> LensResult<Self> {
        let payload = match collection {
            Collection::Profile => RecordPayload::Profile(parse_as(collection, raw)?),
            Collection::Post => RecordPayload::Post(parse_as(collection, raw)?),
            Collection::Follow => {
                let record: FollowRecord = parse_as(collection, raw)?;
                if !record.subject.starts_with("did:") {
                    return Err(LensError::Validation(format!(
                        "Follow subject is not a DID: {}",
                        record.subject
                    )));
                }
                RecordPayload::Follow(record)
            }
            Collection::Like => {
                let record: LikeRecord = parse_as(collection, raw)?;
                validate_subject_uri(&record.subject)?;
                RecordPayload::Like(record)
            }
            Collection::Repost => {
                let record: RepostRecord = parse_as(collection, raw)?;
                validate_subject_uri(&record.subject)?;
                RecordPayload::Repost(record)
            }
            Collection::Generator => RecordPayload::Generator(parse_as(collection, raw)?),
            Collection::Subscription => RecordPayload::Subscription(parse_as(collection, raw)?),
        };

        Ok(payload)
    }
}

fn validate_subject_uri(subject: &RecordRef) -> LensResult<()> {
    if !subject.uri.starts_with("at://") {
        return Err(LensError::Validation(format!(
            "Subject is not an at:// URI: {}",
            subject.uri
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_nsid_roundtrip() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_nsid(collection.nsid()), Some(collection));
        }
        assert_eq!(Collection::from_nsid("app.bsky.graph.block"), None);
    }

    #[test]
    fn test_at_uri_parse() {
        let uri = AtUri::parse("at://did:plc:abc123/app.bsky.feed.post/3k2a").unwrap();
        assert_eq!(uri.did, "did:plc:abc123");
        assert_eq!(uri.collection, "app.bsky.feed.post");
        assert_eq!(uri.rkey, "3k2a");
        assert_eq!(uri.to_string(), "at://did:plc:abc123/app.bsky.feed.post/3k2a");
    }

    #[test]
    fn test_at_uri_rejects_garbage() {
        assert!(AtUri::parse("https://example.com/x").is_err());
        assert!(AtUri::parse("at://did:plc:abc123/app.bsky.feed.post").is_err());
        assert!(AtUri::parse("at://did:plc:abc123//rkey").is_err());
    }

    #[test]
    fn test_parse_post() {
        let raw = json!({
            "$type": "app.bsky.feed.post",
            "text": "hello",
            "langs": ["en"],
            "createdAt": "2024-03-01T12:00:00.000Z"
        });
        let payload = RecordPayload::parse(Collection::Post, &raw).unwrap();
        match payload {
            RecordPayload::Post(post) => {
                assert_eq!(post.text, "hello");
                assert!(post.reply.is_none());
            }
            other => panic!("wrong payload: {:?}", other),
        }
    }

    #[test]
    fn test_parse_reply_post() {
        let raw = json!({
            "text": "replying",
            "createdAt": "2024-03-01T12:00:00.000Z",
            "reply": {
                "root": {"uri": "at://did:plc:a/app.bsky.feed.post/1", "cid": "bafyroot"},
                "parent": {"uri": "at://did:plc:b/app.bsky.feed.post/2", "cid": "bafyparent"}
            }
        });
        let payload = RecordPayload::parse(Collection::Post, &raw).unwrap();
        match payload {
            RecordPayload::Post(post) => {
                let reply = post.reply.unwrap();
                assert_eq!(reply.parent.uri, "at://did:plc:b/app.bsky.feed.post/2");
            }
            other => panic!("wrong payload: {:?}", other),
        }
    }

    #[test]
    fn test_post_missing_text_is_validation_error() {
        let raw = json!({"createdAt": "2024-03-01T12:00:00.000Z"});
        let err = RecordPayload::parse(Collection::Post, &raw).unwrap_err();
        assert!(matches!(err, LensError::Validation(_)));
    }

    #[test]
    fn test_follow_subject_must_be_did() {
        let raw = json!({"subject": "alice.example.com", "createdAt": "2024-03-01T12:00:00.000Z"});
        let err = RecordPayload::parse(Collection::Follow, &raw).unwrap_err();
        assert!(matches!(err, LensError::Validation(_)));
    }

    #[test]
    fn test_like_subject_must_be_at_uri() {
        let raw = json!({
            "subject": {"uri": "https://bsky.app/post/1", "cid": "bafy"},
            "createdAt": "2024-03-01T12:00:00.000Z"
        });
        let err = RecordPayload::parse(Collection::Like, &raw).unwrap_err();
        assert!(matches!(err, LensError::Validation(_)));
    }

    #[test]
    fn test_blob_ref_both_forms() {
        let modern: BlobRef = serde_json::from_value(json!({
            "$type": "blob",
            "ref": {"$link": "bafkavatar"},
            "mimeType": "image/jpeg",
            "size": 1000
        }))
        .unwrap();
        assert_eq!(modern.cid_string().unwrap(), "bafkavatar");

        let legacy: BlobRef = serde_json::from_value(json!({"cid": "bafklegacy"})).unwrap();
        assert_eq!(legacy.cid_string().unwrap(), "bafklegacy");
    }

    #[test]
    fn test_subscription_record_minimal() {
        let payload = RecordPayload::parse(Collection::Subscription, &json!({})).unwrap();
        assert!(matches!(payload, RecordPayload::Subscription(_)));
    }
}
