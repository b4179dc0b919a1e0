/// Aurora Lens - Selective ATProto AppView indexer
///
/// Consumes the Jetstream firehose and indexes only the records belonging to
/// subscribed actors and the accounts they follow, keeping storage
/// proportional to the community actually being served.

mod config;
mod context;
mod db;
mod error;
mod firehose;
mod identity;
mod indexer;
mod jobs;
mod lexicon;
mod metrics;
mod pds;
mod queue;
mod server;
mod store;
mod subscriptions;
mod tracked;

use config::LensConfig;
use context::AppContext;
use error::LensResult;
use firehose::FirehoseConsumer;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> LensResult<()> {
    // Load configuration
    let config = LensConfig::from_env()?;
    config.validate()?;

    // Initialize logging. The config default already folds in RUST_LOG.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.logging.level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Print banner
    print_banner();

    // Open the database and bring the schema up to date
    let pool = db::create_pool(&config.storage.db_location, db::DatabaseOptions::default()).await?;
    db::run_migrations(&pool).await?;
    db::test_connection(&pool).await?;

    // Wire up shared services
    let ctx = AppContext::new(config, pool)?;

    // Warm the tracked set before any event is processed
    let tracked_count = ctx.tracked.rebuild().await?;
    info!("Tracked set warmed with {} actors", tracked_count);
    if ctx.tracked.is_empty() {
        info!("No subscribers yet; nothing will be indexed until one opts in");
    }

    // Start the firehose consumer
    let consumer = FirehoseConsumer::new(Arc::clone(&ctx));
    tokio::spawn(consumer.run());

    // Start the job workers and background loops
    let runner = Arc::new(jobs::JobRunner::new(Arc::clone(&ctx)));
    runner.start();

    // Serve the ops endpoints
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ___                                   __
   /   | __  ___________  _________ _   / /   ___  ____  _____
  / /| |/ / / / ___/ __ \/ ___/ __ `/  / /   / _ \/ __ \/ ___/
 / ___ / /_/ / /  / /_/ / /  / /_/ /  / /___/  __/ / / (__  )
/_/  |_\__,_/_/   \____/_/   \__,_/  /_____/\___/_/ /_/____/

        Selective ATProto AppView Indexer v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
