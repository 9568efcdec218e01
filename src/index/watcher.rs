//! Index watcher task
//!
//! Consumes ingestion events from the enrichment pipeline and rescans the
//! knowledge directory on an interval for files dropped in by hand. Runs for
//! the life of the process.

use super::{IngestEvent, SemanticIndex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub fn spawn_watcher(index: Arc<SemanticIndex>, mut events: mpsc::Receiver<IngestEvent>) -> JoinHandle<()> {
    let period = Duration::from_secs(index.config().rescan_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        info!(
            dir = %index.knowledge_dir().display(),
            every_secs = period.as_secs(),
            "Index watcher started"
        );

        loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        debug!(path = %event.path.display(), "Ingest event");
                        if let Err(e) = index.ingest_file(&event.path, event.article_id).await {
                            warn!(path = %event.path.display(), "Ingestion failed: {}", e);
                        }
                    }
                    None => {
                        info!("Ingest channel closed; continuing with directory rescans");
                        events_open = false;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = index.rescan().await {
                        warn!("Knowledge directory rescan failed: {}", e);
                    }
                }
            }
        }
    })
}
