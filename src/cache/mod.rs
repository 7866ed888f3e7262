use std::{collections::HashMap, sync::Arc, time::Duration};

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, trace, warn};

use crate::{
    chat,
    config::Windows,
    gateway::Gateway,
    model::{ChatMessage, DirectoryEntry, Identity, Profile, Role},
    session::Session,
    RpcError,
};

mod entry;

use entry::{Entry, Fetch, InFlight};
pub use entry::{Freshness, Snapshot, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    CallerProfile,
    UserProfile(Identity),
    MemberDirectory,
    ChatFeed,
    CallerRole,
    CallerAdmin,
    Verified(Identity),
}

impl CacheKey {
    fn window(&self, windows: &Windows) -> Option<Duration> {
        use CacheKey::*;
        match self {
            CallerProfile | UserProfile(_) => Some(windows.profile),
            MemberDirectory => Some(windows.directory),
            CallerRole | CallerAdmin => Some(windows.role),
            Verified(_) => Some(windows.verification),
            ChatFeed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Profile(Option<Profile>),
    Directory(Vec<DirectoryEntry>),
    Chat(Vec<ChatMessage>),
    Role(Role),
    Flag(bool),
}

macro_rules! cache_value_impl {
    ($variant:ident, $T:ty) => {
        impl From<$T> for CacheValue {
            fn from(value: $T) -> Self {
                CacheValue::$variant(value)
            }
        }

        impl TryFrom<CacheValue> for $T {
            type Error = RpcError;

            fn try_from(value: CacheValue) -> Result<Self, RpcError> {
                match value {
                    CacheValue::$variant(value) => Ok(value),
                    other => Err(RpcError::Malformed {
                        op: "cache",
                        reason: format!("expected {} but found {other:?}", stringify!($variant)),
                    }),
                }
            }
        }
    };
}

cache_value_impl!(Profile, Option<Profile>);
cache_value_impl!(Directory, Vec<DirectoryEntry>);
cache_value_impl!(Chat, Vec<ChatMessage>);
cache_value_impl!(Role, Role);
cache_value_impl!(Flag, bool);

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct Read<T> {
    pub value: T,
    pub freshness: Freshness,
}

impl<T> Read<T> {
    fn fresh(value: T) -> Self {
        Self { value, freshness: Freshness::Fresh }
    }

    pub fn may_be_outdated(&self) -> bool {
        matches!(self.freshness, Freshness::Outdated(_))
    }
}

struct CacheState {
    generation: u64,
    entries: HashMap<CacheKey, Entry>,
}

impl CacheState {
    fn entry(&mut self, key: &CacheKey) -> &mut Entry {
        self.entries.entry(key.clone()).or_insert_with(Entry::new)
    }

    /// Lines the cache up with the gateway's session generation. Returns
    /// false for gateways of a session that has already been replaced.
    fn sync(&mut self, generation: u64) -> bool {
        if generation < self.generation {
            return false;
        }
        if generation > self.generation {
            debug!(from = self.generation, to = generation, "new session, dropping cached entities");
            self.generation = generation;
            for entry in self.entries.values_mut() {
                entry.reset();
            }
        }
        true
    }
}

struct Inner {
    session: Arc<Session>,
    windows: Windows,
    state: Mutex<CacheState>,
    subscribed: Notify,
}

/// Time-bounded local copies of remote entities.
///
/// Reads of fresh entries are served locally. Entries past their window are
/// served immediately while a refetch runs; entries with no value, or
/// explicitly invalidated ones, wait for the refetch. At most one fetch per
/// key is outstanding: a fetch started after an invalidation is only sent
/// once the one it superseded has settled. Every fetch runs as its own task
/// so its result lands even if the reader that started it goes away.
#[derive(Clone)]
pub struct EntityCache {
    inner: Arc<Inner>,
}

impl EntityCache {
    pub fn new(session: Arc<Session>, windows: Windows) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                windows,
                state: Mutex::new(CacheState {
                    generation: 0,
                    entries: HashMap::new(),
                }),
                subscribed: Notify::new(),
            }),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub async fn get(&self, key: CacheKey) -> Result<Read<CacheValue>, RpcError> {
        let gateway = self.inner.session.gateway().await?;

        let (fetch, previous, invalidated) = {
            let mut state = self.inner.state.lock();
            if !state.sync(gateway.generation()) {
                return Err(RpcError::StaleSession);
            }
            let window = key.window(&self.inner.windows);
            let entry = state.entry(&key);
            if entry.is_fresh(window, Instant::now()) {
                if let Some(value) = entry.value.clone() {
                    trace!(?key, "hit");
                    return Ok(Read::fresh(value));
                }
            }
            let previous = entry.value.clone().map(|value| (value, entry.error.clone()));
            let invalidated = entry.invalidated;
            (self.start_fetch(&mut state, &key, &gateway), previous, invalidated)
        };

        match previous {
            None => fetch.await.map(Read::fresh),
            Some((value, error)) if !invalidated => Ok(Read {
                value,
                freshness: error.map_or(Freshness::Revalidating, Freshness::Outdated),
            }),
            Some((value, _)) => match fetch.await {
                Ok(fetched) => Ok(Read::fresh(fetched)),
                Err(RpcError::StaleSession) => Err(RpcError::StaleSession),
                Err(err) => Ok(Read { value, freshness: Freshness::Outdated(err) }),
            },
        }
    }

    /// Fetches regardless of freshness, joining a fetch already in flight.
    pub async fn refresh(&self, key: CacheKey) -> Result<CacheValue, RpcError> {
        let gateway = self.inner.session.gateway().await?;
        let fetch = {
            let mut state = self.inner.state.lock();
            if !state.sync(gateway.generation()) {
                return Err(RpcError::StaleSession);
            }
            self.start_fetch(&mut state, &key, &gateway)
        };
        fetch.await
    }

    fn start_fetch(&self, state: &mut CacheState, key: &CacheKey, gateway: &Arc<Gateway>) -> Fetch {
        let entry = state.entry(key);
        if let Some(in_flight) = &entry.in_flight {
            trace!(?key, "joining in-flight fetch");
            return in_flight.fetch.clone();
        }

        let epoch = entry.epoch;
        let superseded = entry.superseded.as_ref().map(|superseded| superseded.fetch.clone());
        let task = tokio::spawn({
            let cache = self.clone();
            let gateway = gateway.clone();
            let key = key.clone();
            async move {
                if let Some(superseded) = superseded {
                    trace!(?key, "waiting for superseded fetch");
                    let _ = superseded.await;
                }
                let result = fetch_value(&gateway, &key).await;
                cache.settle(&gateway, &key, epoch, &result);
                result
            }
        });
        let fetch = async move {
            task.await.unwrap_or_else(|_| Err(RpcError::StaleSession))
        }
        .boxed()
        .shared();

        debug!(?key, epoch, "fetch started");
        entry.in_flight = Some(InFlight { epoch, fetch: fetch.clone() });
        entry.publish();
        fetch
    }

    fn settle(&self, gateway: &Gateway, key: &CacheKey, epoch: u64, result: &Result<CacheValue, RpcError>) {
        let mut state = self.inner.state.lock();
        if gateway.is_closed() || gateway.generation() != state.generation {
            debug!(?key, "discarding result from a previous session");
            return;
        }
        let entry = state.entry(key);
        if entry.epoch != epoch {
            if entry.superseded.as_ref().is_some_and(|superseded| superseded.epoch == epoch) {
                entry.superseded = None;
            }
            trace!(?key, epoch, "result predates an invalidation, dropped");
            entry.publish();
            return;
        }

        entry.in_flight = None;
        match result {
            Ok(value) => {
                entry.value = Some(value.clone());
                entry.fetched_at = Some(Instant::now());
                entry.invalidated = false;
                entry.error = None;
                trace!(?key, epoch, "fetch landed");
            }
            Err(err) => {
                entry.error = Some(err.clone());
                warn!(?key, epoch, "fetch failed: {err}");
            }
        }
        entry.publish();
    }

    /// Marks entries stale without refetching them.
    pub fn invalidate(&self, keys: &[CacheKey]) {
        let mut state = self.inner.state.lock();
        for key in keys {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.invalidate();
            }
        }
        debug!(?keys, "invalidated");
    }

    /// Refetches, in the background, those keys that some view is watching.
    pub fn refresh_watched(&self, keys: &[CacheKey]) {
        for key in keys {
            if self.subscribers(key) == 0 {
                continue;
            }
            let cache = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                if let Err(err) = cache.refresh(key.clone()).await {
                    debug!(?key, "eager refresh failed: {err}");
                }
            });
        }
    }

    /// Drops every cached value, keeping subscriptions.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        for entry in state.entries.values_mut() {
            entry.reset();
        }
    }

    pub fn subscribe(&self, key: CacheKey) -> Subscription {
        let rx = self.inner.state.lock().entry(&key).watchers.subscribe();
        self.inner.subscribed.notify_one();
        Subscription::new(key, rx)
    }

    pub fn subscribers(&self, key: &CacheKey) -> usize {
        self.inner.state.lock().entries.get(key).map_or(0, Entry::subscribers)
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().entries.get(key).is_some_and(Entry::is_fetching)
    }

    pub fn snapshot(&self, key: &CacheKey) -> Snapshot {
        self.inner.state.lock().entries.get(key).map(Entry::snapshot).unwrap_or_default()
    }

    pub(crate) async fn wait_for_subscriber(&self, key: &CacheKey) {
        while self.subscribers(key) == 0 {
            self.inner.subscribed.notified().await;
        }
    }

    async fn get_as<T>(&self, key: CacheKey) -> Result<Read<T>, RpcError>
    where
        T: TryFrom<CacheValue, Error = RpcError>,
    {
        let Read { value, freshness } = self.get(key).await?;
        Ok(Read { value: T::try_from(value)?, freshness })
    }

    pub async fn caller_profile(&self) -> Result<Read<Option<Profile>>, RpcError> {
        self.get_as(CacheKey::CallerProfile).await
    }

    pub async fn user_profile(&self, user: &Identity) -> Result<Read<Option<Profile>>, RpcError> {
        self.get_as(CacheKey::UserProfile(user.clone())).await
    }

    pub async fn member_directory(&self) -> Result<Read<Vec<DirectoryEntry>>, RpcError> {
        self.get_as(CacheKey::MemberDirectory).await
    }

    /// Chat messages in display order.
    pub async fn chat_feed(&self) -> Result<Read<Vec<ChatMessage>>, RpcError> {
        self.get_as(CacheKey::ChatFeed).await
    }

    pub async fn caller_role(&self) -> Result<Read<Role>, RpcError> {
        self.get_as(CacheKey::CallerRole).await
    }

    pub async fn is_caller_admin(&self) -> Result<Read<bool>, RpcError> {
        self.get_as(CacheKey::CallerAdmin).await
    }

    pub async fn is_verified(&self, user: &Identity) -> Result<Read<bool>, RpcError> {
        self.get_as(CacheKey::Verified(user.clone())).await
    }
}

async fn fetch_value(gateway: &Gateway, key: &CacheKey) -> Result<CacheValue, RpcError> {
    use CacheKey::*;
    Ok(match key {
        CallerProfile => gateway.get_caller_user_profile().await?.into(),
        UserProfile(user) => gateway.get_user_profile(user.clone()).await?.into(),
        MemberDirectory => gateway.get_member_directory().await?.into(),
        ChatFeed => chat::ordered(gateway.get_chat_messages().await?).into(),
        CallerRole => gateway.get_caller_user_role().await?.into(),
        CallerAdmin => gateway.is_caller_admin().await?.into(),
        Verified(user) => gateway.is_user_verified(user.clone()).await?.into(),
    })
}
