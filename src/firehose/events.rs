/// Event type definitions for the Jetstream firehose
use serde::{Deserialize, Serialize};

/// Envelope for every Jetstream frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JetstreamEvent {
    pub did: String,
    pub time_us: i64,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountData>,
}

/// Frame kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Commit,
    Identity,
    Account,
}

/// Commit payload - one record mutation in one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub operation: CommitOperation,
    pub collection: String,
    pub rkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Operation action type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommitOperation {
    Create,
    Update,
    Delete,
}

/// Identity payload - handle changes and tombstones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityData {
    pub did: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// Account payload - activation and moderation status changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountData {
    pub did: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// Account status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Takendown,
    Suspended,
    Deleted,
    Deactivated,
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Commit => "commit",
            EventKind::Identity => "identity",
            EventKind::Account => "account",
        }
    }
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Takendown => "takendown",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Deleted => "deleted",
            AccountStatus::Deactivated => "deactivated",
            AccountStatus::Unknown => "unknown",
        }
    }
}

impl JetstreamEvent {
    /// Build a synthetic create-commit event. Backfill and deep-fetch jobs
    /// use this to route records they pulled from a PDS through the same
    /// indexing path as live traffic.
    pub fn synthetic_create(
        did: &str,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
        cid: Option<String>,
        time_us: i64,
    ) -> Self {
        Self {
            did: did.to_string(),
            time_us,
            kind: EventKind::Commit,
            commit: Some(CommitData {
                rev: None,
                operation: CommitOperation::Create,
                collection: collection.to_string(),
                rkey: rkey.to_string(),
                record: Some(record),
                cid,
            }),
            identity: None,
            account: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commit_create() {
        let frame = json!({
            "did": "did:plc:abc",
            "time_us": 1725911162329308i64,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2b",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "3l3qo2vuowo2b",
                "record": {"text": "hi", "createdAt": "2024-09-09T19:46:02.102Z"},
                "cid": "bafyreidc6sydkkbchcyg62v77wbhzvb2mvytlmsychqgwf2xdjyticmjyu"
            }
        });

        let event: JetstreamEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(event.kind, EventKind::Commit);
        let commit = event.commit.unwrap();
        assert_eq!(commit.operation, CommitOperation::Create);
        assert_eq!(commit.collection, "app.bsky.feed.post");
        assert!(commit.record.is_some());
    }

    #[test]
    fn test_parse_commit_delete_has_no_record() {
        let frame = json!({
            "did": "did:plc:abc",
            "time_us": 1725911162329309i64,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2c",
                "operation": "delete",
                "collection": "app.bsky.feed.like",
                "rkey": "3l3qo2vuowo2b"
            }
        });

        let event: JetstreamEvent = serde_json::from_value(frame).unwrap();
        let commit = event.commit.unwrap();
        assert_eq!(commit.operation, CommitOperation::Delete);
        assert!(commit.record.is_none());
        assert!(commit.cid.is_none());
    }

    #[test]
    fn test_parse_identity_event() {
        let frame = json!({
            "did": "did:plc:abc",
            "time_us": 1725516665234703i64,
            "kind": "identity",
            "identity": {
                "did": "did:plc:abc",
                "handle": "alice.example.com",
                "seq": 1409752997i64,
                "time": "2024-09-05T06:11:04.870Z"
            }
        });

        let event: JetstreamEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(event.kind, EventKind::Identity);
        assert_eq!(event.identity.unwrap().handle.unwrap(), "alice.example.com");
    }

    #[test]
    fn test_parse_account_event_unknown_status() {
        let frame = json!({
            "did": "did:plc:abc",
            "time_us": 1725516665333808i64,
            "kind": "account",
            "account": {
                "active": false,
                "did": "did:plc:abc",
                "seq": 1409753013i64,
                "status": "desynchronized",
                "time": "2024-09-05T06:11:04.870Z"
            }
        });

        let event: JetstreamEvent = serde_json::from_value(frame).unwrap();
        let account = event.account.unwrap();
        assert!(!account.active);
        assert_eq!(account.status, Some(AccountStatus::Unknown));
    }

    #[test]
    fn test_synthetic_create_roundtrip() {
        let event = JetstreamEvent::synthetic_create(
            "did:plc:abc",
            "app.bsky.feed.post",
            "3k2a",
            json!({"text": "hi", "createdAt": "2024-03-01T00:00:00Z"}),
            Some("bafyx".to_string()),
            42,
        );
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: JetstreamEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.commit.unwrap().rkey, "3k2a");
    }
}
