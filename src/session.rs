use std::{
    sync::{atomic::{AtomicU64, Ordering}, Arc},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    auth::IdentityProvider,
    gateway::{Gateway, Transport},
    model::Identity,
    AppResult, RpcError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Resolving,
    Authenticated(Identity),
    Anonymous,
}

impl SessionStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, SessionStatus::Authenticated(_) | SessionStatus::Anonymous)
    }

    /// The caller's identity, only once resolution has finished.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionStatus::Authenticated(identity) => Some(identity),
            SessionStatus::Uninitialized | SessionStatus::Resolving | SessionStatus::Anonymous => None,
        }
    }
}

/// Identity lifecycle plus the gateway bound to the current resolution.
///
/// Gateways are built lazily, at most once per resolution. Leaving a resolved
/// state closes the current gateway and bumps the generation, which is how
/// the cache recognises replies that belong to a previous identity.
pub struct Session {
    provider: Arc<dyn IdentityProvider>,
    transport: Arc<dyn Transport>,
    call_timeout: Duration,
    status: watch::Sender<SessionStatus>,
    gateway: Mutex<Option<Arc<Gateway>>>,
    generation: AtomicU64,
}

impl Session {
    pub fn new(provider: Arc<dyn IdentityProvider>, transport: Arc<dyn Transport>, call_timeout: Duration) -> Self {
        Self {
            provider,
            transport,
            call_timeout,
            status: watch::Sender::new(SessionStatus::Uninitialized),
            gateway: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Resolves whatever identity the provider already holds.
    pub async fn init(&self) {
        self.transition(SessionStatus::Resolving);
        self.transition(self.resolved());
    }

    pub async fn login(&self) -> AppResult<()> {
        self.transition(SessionStatus::Resolving);
        let outcome = self.provider.begin_login().await;
        self.transition(self.resolved());
        outcome
    }

    pub async fn logout(&self) {
        self.provider.logout().await;
        self.transition(SessionStatus::Uninitialized);
    }

    pub fn dispose(&self) {
        self.transition(SessionStatus::Uninitialized);
    }

    fn resolved(&self) -> SessionStatus {
        match self.provider.identity() {
            Some(identity) => SessionStatus::Authenticated(identity),
            None => SessionStatus::Anonymous,
        }
    }

    fn transition(&self, next: SessionStatus) {
        let mut slot = self.gateway.lock();
        let previous = self.status.send_replace(next.clone());
        if previous.is_resolved() {
            if let Some(gateway) = slot.take() {
                gateway.close();
            }
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(generation, "gateway torn down");
        }
        info!(from = ?previous, to = ?next, "session transition");
    }

    /// Waits for the session to resolve, then hands out its gateway. Nothing
    /// is sent while the session is resolving.
    pub async fn gateway(&self) -> Result<Arc<Gateway>, RpcError> {
        let mut status = self.status.subscribe();
        loop {
            status
                .wait_for(SessionStatus::is_resolved)
                .await
                .map_err(|_| RpcError::StaleSession)?;

            let mut slot = self.gateway.lock();
            let caller = match &*self.status.borrow() {
                SessionStatus::Authenticated(identity) => Some(identity.clone()),
                SessionStatus::Anonymous => None,
                SessionStatus::Uninitialized | SessionStatus::Resolving => continue,
            };
            if let Some(gateway) = slot.as_ref() {
                return Ok(gateway.clone());
            }

            let gateway = Arc::new(Gateway::new(caller, self.transport.clone(), self.call_timeout, self.generation()));
            debug!(generation = gateway.generation(), caller = ?gateway.caller(), "gateway built");
            *slot = Some(gateway.clone());
            return Ok(gateway);
        }
    }
}
