use std::time::Duration;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, trace};

use crate::cache::{CacheKey, EntityCache};

/// Refetches the chat feed on a fixed interval while anyone is watching it.
pub struct LiveFeedPoller {
    task: JoinHandle<()>,
}

impl LiveFeedPoller {
    pub fn spawn(cache: EntityCache, interval: Duration) -> Self {
        Self {
            task: tokio::spawn(poll(cache, interval)),
        }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for LiveFeedPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll(cache: EntityCache, interval: Duration) {
    let key = CacheKey::ChatFeed;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if cache.subscribers(&key) == 0 {
            debug!("chat feed unwatched, polling paused");
            cache.wait_for_subscriber(&key).await;
            debug!("chat feed watched, polling resumed");
            ticker.reset_immediately();
        }

        ticker.tick().await;
        if cache.subscribers(&key) == 0 {
            continue;
        }
        if cache.is_fetching(&key) {
            trace!("previous poll still running, skipping");
            continue;
        }
        if let Err(err) = cache.refresh(key.clone()).await {
            debug!("poll failed: {err}");
        }
    }
}
