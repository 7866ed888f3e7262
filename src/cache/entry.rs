use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use tokio::{sync::watch, time::Instant};

use crate::RpcError;

use super::{CacheKey, CacheValue};

pub(crate) type Fetch = Shared<BoxFuture<'static, Result<CacheValue, RpcError>>>;

/// How a read's value relates to the remote state.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Within its staleness window, or just fetched.
    Fresh,
    /// Past its window; a refetch is on its way.
    Revalidating,
    /// The last refetch failed; this is the last good value.
    Outdated(RpcError),
}

/// What subscribers of a key observe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub value: Option<CacheValue>,
    pub fetching: bool,
    pub error: Option<RpcError>,
}

impl Snapshot {
    pub fn may_be_outdated(&self) -> bool {
        self.value.is_some() && self.error.is_some()
    }
}

/// A fetch that has been sent, tagged with the epoch it was started under.
#[derive(Clone)]
pub(crate) struct InFlight {
    pub(crate) epoch: u64,
    pub(crate) fetch: Fetch,
}

pub(crate) struct Entry {
    pub(crate) value: Option<CacheValue>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) invalidated: bool,
    /// Bumped by every invalidation; only fetches started under the current
    /// epoch land their value.
    pub(crate) epoch: u64,
    pub(crate) error: Option<RpcError>,
    pub(crate) in_flight: Option<InFlight>,
    /// Fetch that was running when the entry was invalidated. The next fetch
    /// is not sent until it settles.
    pub(crate) superseded: Option<InFlight>,
    pub(crate) watchers: watch::Sender<Snapshot>,
}

impl Entry {
    pub(crate) fn new() -> Self {
        Self {
            value: None,
            fetched_at: None,
            invalidated: false,
            epoch: 0,
            error: None,
            in_flight: None,
            superseded: None,
            watchers: watch::Sender::new(Snapshot::default()),
        }
    }

    /// `None` windows never expire.
    pub(crate) fn is_fresh(&self, window: Option<Duration>, now: Instant) -> bool {
        if self.invalidated || self.value.is_none() {
            return false;
        }
        let Some(fetched_at) = self.fetched_at else {
            return false;
        };
        match window {
            Some(window) => now.duration_since(fetched_at) < window,
            None => true,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.invalidated = true;
        self.epoch += 1;
        if let Some(in_flight) = self.in_flight.take() {
            self.superseded = Some(in_flight);
        }
        self.publish();
    }

    pub(crate) fn is_fetching(&self) -> bool {
        self.in_flight.is_some() || self.superseded.is_some()
    }

    /// Forgets everything learned under a previous identity. Watchers stay.
    pub(crate) fn reset(&mut self) {
        self.value = None;
        self.fetched_at = None;
        self.invalidated = false;
        self.epoch += 1;
        self.error = None;
        self.in_flight = None;
        self.superseded = None;
        self.publish();
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            value: self.value.clone(),
            fetching: self.is_fetching(),
            error: self.error.clone(),
        }
    }

    pub(crate) fn publish(&self) {
        self.watchers.send_replace(self.snapshot());
    }

    pub(crate) fn subscribers(&self) -> usize {
        self.watchers.receiver_count()
    }
}

/// A view's registration on one cache key. Dropping it unsubscribes.
pub struct Subscription {
    key: CacheKey,
    rx: watch::Receiver<Snapshot>,
}

impl Subscription {
    pub(crate) fn new(key: CacheKey, rx: watch::Receiver<Snapshot>) -> Self {
        Self { key, rx }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn current(&self) -> Snapshot {
        self.rx.borrow().clone()
    }

    /// Waits for the next change. `None` once the cache is gone.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
