/// Jetstream firehose consumer
///
/// Maintains one websocket subscription to a Jetstream endpoint, filtered to
/// the collections the index understands. Every frame lands on the `index`
/// queue; the actual write happens in a worker. The consumer checkpoints the
/// stream position into `ingest_cursor` and resumes from it (minus a small
/// replay overlap) after a restart. Replays are absorbed by job dedup and
/// idempotent upserts.
pub mod events;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::error::LensResult;
use crate::firehose::events::JetstreamEvent;
use crate::lexicon::Collection;
use crate::metrics;

/// Reconnect backoff floor and ceiling
const RECONNECT_MIN_SECS: u64 = 1;
const RECONNECT_MAX_SECS: u64 = 60;

/// Load the persisted firehose position, if any
pub async fn load_cursor(pool: &SqlitePool) -> LensResult<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT time_us FROM ingest_cursor WHERE id = 0")
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(time_us,)| time_us))
}

/// Persist the firehose position
pub async fn save_cursor(pool: &SqlitePool, time_us: i64) -> LensResult<()> {
    sqlx::query(
        "INSERT INTO ingest_cursor (id, time_us, updated_at)
         VALUES (0, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET
            time_us = excluded.time_us,
            updated_at = excluded.updated_at",
    )
    .bind(time_us)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Build the subscribe URL with collection filters and an optional cursor
fn subscribe_url(jetstream_url: &str, cursor: Option<i64>) -> String {
    let mut url = format!("{}/subscribe", jetstream_url.trim_end_matches('/'));

    let mut sep = '?';
    for collection in Collection::ALL {
        url.push(sep);
        url.push_str("wantedCollections=");
        url.push_str(collection.nsid());
        sep = '&';
    }

    if let Some(cursor) = cursor {
        url.push(sep);
        url.push_str("cursor=");
        url.push_str(&cursor.to_string());
    }

    url
}

/// Consumes the Jetstream firehose and feeds frames into the index queue
pub struct FirehoseConsumer {
    context: Arc<AppContext>,
}

impl FirehoseConsumer {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Run forever: connect, stream, checkpoint, reconnect on failure with
    /// capped exponential backoff.
    pub async fn run(self) {
        let mut backoff = RECONNECT_MIN_SECS;

        loop {
            let cursor = match load_cursor(&self.context.db).await {
                Ok(Some(time_us)) => {
                    // Rewind slightly so events in flight around the last
                    // checkpoint are not lost
                    let window = self.context.config.ingest.replay_window_us as i64;
                    Some(time_us.saturating_sub(window))
                }
                Ok(None) => None,
                Err(e) => {
                    error!("Failed to load firehose cursor: {}", e);
                    None
                }
            };

            let url = subscribe_url(&self.context.config.ingest.jetstream_url, cursor);
            info!("Connecting to Jetstream: {}", url);

            match connect_async(&url).await {
                Ok((ws_stream, _)) => {
                    backoff = RECONNECT_MIN_SECS;
                    if let Err(e) = self.consume(ws_stream).await {
                        warn!("Firehose stream ended: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Failed to connect to Jetstream: {}", e);
                }
            }

            metrics::firehose_reconnect();
            debug!("Reconnecting in {}s", backoff);
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(RECONNECT_MAX_SECS);
        }
    }

    /// Drain one websocket connection until it closes or errors
    async fn consume(
        &self,
        mut ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> LensResult<()> {
        let save_every =
            Duration::from_secs(self.context.config.ingest.cursor_save_interval_secs.max(1));
        let mut save_tick = tokio::time::interval(save_every);
        let mut latest_seen: Option<i64> = None;

        loop {
            tokio::select! {
                msg = ws_stream.next() => {
                    let Some(msg) = msg else {
                        info!("Jetstream stream ended");
                        return Ok(());
                    };

                    match msg? {
                        Message::Text(text) => match serde_json::from_str::<JetstreamEvent>(&text) {
                            Ok(event) => {
                                latest_seen = Some(event.time_us);
                                self.handle_event(&event).await;
                            }
                            Err(e) => {
                                debug!("Skipping unparseable frame: {}", e);
                            }
                        },
                        Message::Ping(data) => {
                            ws_stream.send(Message::Pong(data)).await?;
                        }
                        Message::Close(_) => {
                            info!("Jetstream closed the connection");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                _ = save_tick.tick() => {
                    if let Some(time_us) = latest_seen {
                        if let Err(e) = save_cursor(&self.context.db, time_us).await {
                            warn!("Failed to save firehose cursor: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Hand one frame to the scheduler. Enqueue failures are logged, not
    /// fatal: dropping one event beats dropping the connection.
    async fn handle_event(&self, event: &JetstreamEvent) {
        metrics::event_ingested(event.kind.as_str());

        if let Err(e) = self.context.schedulers.index_event(event).await {
            warn!("Failed to enqueue firehose event from {}: {}", event.did, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[test]
    fn test_subscribe_url_lists_wanted_collections() {
        let url = subscribe_url("wss://jetstream.example", None);

        assert!(url.starts_with("wss://jetstream.example/subscribe?"));
        assert!(url.contains("wantedCollections=app.bsky.feed.post"));
        assert!(url.contains("wantedCollections=app.bsky.graph.follow"));
        assert!(url.contains("wantedCollections=social.aurora.lens.subscription"));
        assert!(!url.contains("cursor="));
    }

    #[test]
    fn test_subscribe_url_appends_cursor() {
        let url = subscribe_url("wss://jetstream.example/", Some(1725911162329308));

        assert!(url.ends_with("&cursor=1725911162329308"));
        // Trailing slash on the base does not double up
        assert!(url.contains("jetstream.example/subscribe?"));
    }

    #[tokio::test]
    async fn test_cursor_persists_and_overwrites() {
        let pool = test_pool().await;

        assert_eq!(load_cursor(&pool).await.unwrap(), None);

        save_cursor(&pool, 100).await.unwrap();
        assert_eq!(load_cursor(&pool).await.unwrap(), Some(100));

        save_cursor(&pool, 250).await.unwrap();
        assert_eq!(load_cursor(&pool).await.unwrap(), Some(250));

        // Still a single row
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingest_cursor")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
