/// Admission policies - decide per collection whether a record is worth a row
///
/// Policies are pure predicates over the payload and the in-memory tracked
/// set; they run before any write and rejections cost nothing durable.
use crate::lexicon::{
    AtUri, FollowRecord, LikeRecord, PostRecord, RecordPayload, RecordRef, RepostRecord,
};
use crate::tracked::TrackedActorStore;

/// Dispatch to the per-collection policy
pub fn should_index(payload: &RecordPayload, author_did: &str, tracked: &TrackedActorStore) -> bool {
    match payload {
        RecordPayload::Profile(_) => should_index_profile(author_did, tracked),
        RecordPayload::Post(record) => should_index_post(record, author_did, tracked),
        RecordPayload::Follow(record) => should_index_follow(record, author_did, tracked),
        RecordPayload::Like(record) => should_index_like(record, author_did, tracked),
        RecordPayload::Repost(record) => should_index_repost(record, author_did, tracked),
        RecordPayload::Generator(_) => should_index_generator(author_did, tracked),
        RecordPayload::Subscription(_) => true,
    }
}

/// Profiles: only for tracked owners
pub fn should_index_profile(author_did: &str, tracked: &TrackedActorStore) -> bool {
    tracked.is_tracked_actor(author_did)
}

/// Posts: tracked author, or a reply landing in a tracked author's thread.
/// Keeping outside replies lets thread reconstruction show the whole
/// conversation around tracked actors.
pub fn should_index_post(record: &PostRecord, author_did: &str, tracked: &TrackedActorStore) -> bool {
    if tracked.is_tracked_actor(author_did) {
        return true;
    }

    reply_participants(record)
        .map(|dids| tracked.has_tracked_actor(&dids.iter().map(|d| d.as_str()).collect::<Vec<_>>()))
        .unwrap_or(false)
}

/// Follows: either endpoint tracked
pub fn should_index_follow(
    record: &FollowRecord,
    author_did: &str,
    tracked: &TrackedActorStore,
) -> bool {
    tracked.has_tracked_actor(&[author_did, record.subject.as_str()])
}

/// Likes: liker or liked-post author tracked
pub fn should_index_like(record: &LikeRecord, author_did: &str, tracked: &TrackedActorStore) -> bool {
    participant_match(&record.subject, author_did, tracked)
}

/// Reposts: reposter or reposted-post author tracked
pub fn should_index_repost(
    record: &RepostRecord,
    author_did: &str,
    tracked: &TrackedActorStore,
) -> bool {
    participant_match(&record.subject, author_did, tracked)
}

/// Generators: only for tracked creators
pub fn should_index_generator(author_did: &str, tracked: &TrackedActorStore) -> bool {
    tracked.is_tracked_actor(author_did)
}

fn participant_match(subject: &RecordRef, author_did: &str, tracked: &TrackedActorStore) -> bool {
    if tracked.is_tracked_actor(author_did) {
        return true;
    }
    subject_author(subject)
        .map(|did| tracked.is_tracked_actor(&did))
        .unwrap_or(false)
}

/// The DIDs on the other side of a reply, when the refs parse
fn reply_participants(record: &PostRecord) -> Option<Vec<String>> {
    let reply = record.reply.as_ref()?;
    let mut dids = Vec::with_capacity(2);
    for target in [&reply.parent, &reply.root] {
        if let Ok(uri) = AtUri::parse(&target.uri) {
            if !dids.contains(&uri.did) {
                dids.push(uri.did);
            }
        }
    }
    if dids.is_empty() {
        None
    } else {
        Some(dids)
    }
}

fn subject_author(subject: &RecordRef) -> Option<String> {
    AtUri::parse(&subject.uri).ok().map(|uri| uri.did)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::store::subscription;
    use crate::tracked::TrackedActorStore;

    async fn tracked_with(dids: &[&str]) -> TrackedActorStore {
        let pool = test_pool().await;
        for did in dids {
            subscription::upsert(&pool, did, None, None).await.unwrap();
        }
        let tracked = TrackedActorStore::new(pool);
        tracked.rebuild().await.unwrap();
        tracked
    }

    fn post(reply_parent: Option<&str>) -> PostRecord {
        let raw = match reply_parent {
            Some(parent) => serde_json::json!({
                "text": "hi",
                "createdAt": "2024-03-01T00:00:00Z",
                "reply": {
                    "root": {"uri": parent, "cid": "bafyroot"},
                    "parent": {"uri": parent, "cid": "bafyparent"}
                }
            }),
            None => serde_json::json!({"text": "hi", "createdAt": "2024-03-01T00:00:00Z"}),
        };
        serde_json::from_value(raw).unwrap()
    }

    #[tokio::test]
    async fn test_post_by_tracked_author_is_admitted() {
        let tracked = tracked_with(&["did:plc:alice"]).await;
        assert!(should_index_post(&post(None), "did:plc:alice", &tracked));
        assert!(!should_index_post(&post(None), "did:plc:nobody", &tracked));
    }

    #[tokio::test]
    async fn test_outside_reply_into_tracked_thread_is_admitted() {
        let tracked = tracked_with(&["did:plc:alice"]).await;
        let reply = post(Some("at://did:plc:alice/app.bsky.feed.post/1"));
        assert!(should_index_post(&reply, "did:plc:stranger", &tracked));

        let unrelated = post(Some("at://did:plc:other/app.bsky.feed.post/1"));
        assert!(!should_index_post(&unrelated, "did:plc:stranger", &tracked));
    }

    #[tokio::test]
    async fn test_follow_needs_one_tracked_endpoint() {
        let tracked = tracked_with(&["did:plc:alice"]).await;
        let onto_tracked = FollowRecord {
            subject: "did:plc:alice".to_string(),
            created_at: "2024-03-01T00:00:00Z".to_string(),
        };
        assert!(should_index_follow(&onto_tracked, "did:plc:stranger", &tracked));

        let bystanders = FollowRecord {
            subject: "did:plc:b".to_string(),
            created_at: "2024-03-01T00:00:00Z".to_string(),
        };
        assert!(!should_index_follow(&bystanders, "did:plc:a", &tracked));
    }

    #[tokio::test]
    async fn test_like_with_no_tracked_participant_is_rejected() {
        let tracked = tracked_with(&["did:plc:alice"]).await;
        let like = LikeRecord {
            subject: RecordRef {
                uri: "at://did:plc:other/app.bsky.feed.post/1".to_string(),
                cid: "bafy".to_string(),
            },
            created_at: "2024-03-01T00:00:00Z".to_string(),
        };
        assert!(!should_index_like(&like, "did:plc:stranger", &tracked));

        let on_tracked = LikeRecord {
            subject: RecordRef {
                uri: "at://did:plc:alice/app.bsky.feed.post/1".to_string(),
                cid: "bafy".to_string(),
            },
            created_at: "2024-03-01T00:00:00Z".to_string(),
        };
        assert!(should_index_like(&on_tracked, "did:plc:stranger", &tracked));
    }
}
