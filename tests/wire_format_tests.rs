/// Wire format tests
///
/// Verifies the JSON shapes Aurora Lens exchanges with the outside world:
/// Jetstream firehose frames on the way in, PDS listRecords pages during
/// backfill, and the internal job payload contract. The structs here are
/// deliberately independent re-declarations of the wire format, so a field
/// rename in the service would show up as a failure against these fixtures.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ========== Jetstream frames ==========

#[derive(Debug, Deserialize)]
struct JetstreamFrame {
    did: String,
    time_us: i64,
    kind: String,
    commit: Option<CommitFrame>,
    identity: Option<IdentityFrame>,
    account: Option<AccountFrame>,
}

#[derive(Debug, Deserialize)]
struct CommitFrame {
    operation: String,
    collection: String,
    rkey: String,
    record: Option<Value>,
    cid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityFrame {
    did: String,
    handle: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountFrame {
    did: String,
    active: bool,
    status: Option<String>,
}

/// A commit frame captured from a public Jetstream instance
const COMMIT_FIXTURE: &str = r#"{
    "did": "did:plc:eygmaihciaxprqvxpfvl6flk",
    "time_us": 1725911162329308,
    "kind": "commit",
    "commit": {
        "rev": "3l3qo2vutsw2b",
        "operation": "create",
        "collection": "app.bsky.feed.like",
        "rkey": "3l3qo2vuowo2b",
        "record": {
            "$type": "app.bsky.feed.like",
            "createdAt": "2024-09-09T19:46:02.102Z",
            "subject": {
                "cid": "bafyreidc6sydkkbchcyg62v77wbhzvb2mvytlmsychqgwf2xdjyticmjyu",
                "uri": "at://did:plc:wa7b35aakoll7hugkrjtf3xf/app.bsky.feed.post/3l3pte3p2e325"
            }
        },
        "cid": "bafyreidwaivazkwu67xztlmuobx35hs2lnfh3kolmgfmucldvhd3sgzcqi"
    }
}"#;

const IDENTITY_FIXTURE: &str = r#"{
    "did": "did:plc:ufbl4k27gp6kzas5glhz7fim",
    "time_us": 1725516665234703,
    "kind": "identity",
    "identity": {
        "did": "did:plc:ufbl4k27gp6kzas5glhz7fim",
        "handle": "yohenrique.bsky.social",
        "seq": 1409752997,
        "time": "2024-09-05T06:11:04.870Z"
    }
}"#;

const ACCOUNT_FIXTURE: &str = r#"{
    "did": "did:plc:ufbl4k27gp6kzas5glhz7fim",
    "time_us": 1725516665333808,
    "kind": "account",
    "account": {
        "active": false,
        "did": "did:plc:ufbl4k27gp6kzas5glhz7fim",
        "seq": 1409753013,
        "status": "deactivated",
        "time": "2024-09-05T06:11:04.870Z"
    }
}"#;

#[test]
fn test_commit_frame_parses() {
    let frame: JetstreamFrame = serde_json::from_str(COMMIT_FIXTURE).unwrap();

    assert_eq!(frame.did, "did:plc:eygmaihciaxprqvxpfvl6flk");
    assert_eq!(frame.time_us, 1725911162329308);
    assert_eq!(frame.kind, "commit");

    let commit = frame.commit.unwrap();
    assert_eq!(commit.operation, "create");
    assert_eq!(commit.collection, "app.bsky.feed.like");
    assert_eq!(commit.rkey, "3l3qo2vuowo2b");
    assert!(commit.cid.is_some());

    let record = commit.record.unwrap();
    assert_eq!(record["$type"], "app.bsky.feed.like");
    assert_eq!(
        record["subject"]["uri"],
        "at://did:plc:wa7b35aakoll7hugkrjtf3xf/app.bsky.feed.post/3l3pte3p2e325"
    );
}

#[test]
fn test_identity_frame_parses() {
    let frame: JetstreamFrame = serde_json::from_str(IDENTITY_FIXTURE).unwrap();

    assert_eq!(frame.kind, "identity");
    assert!(frame.commit.is_none());
    let identity = frame.identity.unwrap();
    assert_eq!(identity.did, "did:plc:ufbl4k27gp6kzas5glhz7fim");
    assert_eq!(identity.handle.as_deref(), Some("yohenrique.bsky.social"));
}

#[test]
fn test_account_frame_parses() {
    let frame: JetstreamFrame = serde_json::from_str(ACCOUNT_FIXTURE).unwrap();

    assert_eq!(frame.kind, "account");
    let account = frame.account.unwrap();
    assert!(!account.active);
    assert_eq!(account.status.as_deref(), Some("deactivated"));
    assert_eq!(account.did, frame.did);
}

#[test]
fn test_delete_commit_has_no_record_or_cid() {
    let fixture = json!({
        "did": "did:plc:abc",
        "time_us": 1725911162329309i64,
        "kind": "commit",
        "commit": {
            "rev": "3l3qo2vutsw2c",
            "operation": "delete",
            "collection": "app.bsky.graph.follow",
            "rkey": "3l3qo2vuowo2b"
        }
    });

    let frame: JetstreamFrame = serde_json::from_value(fixture).unwrap();
    let commit = frame.commit.unwrap();
    assert_eq!(commit.operation, "delete");
    assert!(commit.record.is_none());
    assert!(commit.cid.is_none());
}

// ========== PDS listRecords pages ==========

#[derive(Debug, Deserialize)]
struct ListRecordsPage {
    records: Vec<ListedRecord>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedRecord {
    uri: String,
    cid: String,
    value: Value,
}

#[test]
fn test_list_records_page_parses() {
    let fixture = r#"{
        "records": [
            {
                "uri": "at://did:plc:abc/app.bsky.feed.post/3kfirst",
                "cid": "bafyreifirst",
                "value": {
                    "$type": "app.bsky.feed.post",
                    "text": "first!",
                    "createdAt": "2024-01-15T09:00:00.000Z"
                }
            },
            {
                "uri": "at://did:plc:abc/app.bsky.feed.post/3ksecond",
                "cid": "bafyreisecond",
                "value": {
                    "$type": "app.bsky.feed.post",
                    "text": "second",
                    "createdAt": "2024-01-15T10:00:00.000Z",
                    "reply": {
                        "root": {"uri": "at://did:plc:abc/app.bsky.feed.post/3kfirst", "cid": "bafyreifirst"},
                        "parent": {"uri": "at://did:plc:abc/app.bsky.feed.post/3kfirst", "cid": "bafyreifirst"}
                    }
                }
            }
        ],
        "cursor": "3ksecond"
    }"#;

    let page: ListRecordsPage = serde_json::from_str(fixture).unwrap();
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.cursor.as_deref(), Some("3ksecond"));
    assert_eq!(page.records[0].cid, "bafyreifirst");
    assert_eq!(
        page.records[1].value["reply"]["parent"]["uri"],
        "at://did:plc:abc/app.bsky.feed.post/3kfirst"
    );
}

#[test]
fn test_final_list_records_page_omits_cursor() {
    let page: ListRecordsPage = serde_json::from_str(r#"{"records": []}"#).unwrap();
    assert!(page.records.is_empty());
    assert!(page.cursor.is_none());
}

// ========== Job payload contract ==========
//
// Payloads cross the job table as JSON text. Schedulers write these shapes
// and handlers read them back; both sides must agree field for field.

#[derive(Debug, Serialize, Deserialize)]
struct FetchRecordPayload {
    uri: String,
    depth: u32,
    live: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResolveDidPayload {
    did: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AggregatePostPayload {
    uri: String,
    #[serde(rename = "type")]
    stat: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TapPayload {
    did: String,
    action: String,
}

#[test]
fn test_fetch_record_payload_round_trips() {
    let payload = FetchRecordPayload {
        uri: "at://did:plc:abc/app.bsky.feed.post/3k".to_string(),
        depth: 2,
        live: true,
    };

    let encoded = serde_json::to_value(&payload).unwrap();
    assert_eq!(
        encoded,
        json!({"uri": "at://did:plc:abc/app.bsky.feed.post/3k", "depth": 2, "live": true})
    );

    let decoded: FetchRecordPayload = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded.depth, 2);
    assert!(decoded.live);
}

#[test]
fn test_aggregate_payload_uses_type_key() {
    let payload = AggregatePostPayload {
        uri: "at://did:plc:abc/app.bsky.feed.post/3k".to_string(),
        stat: "likes".to_string(),
    };

    let encoded = serde_json::to_value(&payload).unwrap();
    // The wire key is "type", not "stat"
    assert_eq!(encoded["type"], "likes");
    assert!(encoded.get("stat").is_none());
}

#[test]
fn test_simple_payloads_parse() {
    let resolve: ResolveDidPayload =
        serde_json::from_value(json!({"did": "did:plc:abc"})).unwrap();
    assert_eq!(resolve.did, "did:plc:abc");

    let tap: TapPayload =
        serde_json::from_value(json!({"did": "did:plc:abc", "action": "add"})).unwrap();
    assert_eq!(tap.action, "add");
}
