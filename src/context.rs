use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::{
    auth::IdentityProvider,
    cache::EntityCache,
    chat::LiveFeedPoller,
    config::Config,
    gateway::Transport,
    model::{Identity, Visibility},
    mutate::MutationCoordinator,
    policy::{self, Capabilities, Viewer},
    session::{Session, SessionStatus},
    AppResult, RpcError,
};

/// Everything a view needs, with an explicit lifecycle.
pub struct AppContext {
    config: Config,
    session: Arc<Session>,
    cache: EntityCache,
    mutations: MutationCoordinator,
    poller: Mutex<Option<LiveFeedPoller>>,
}

impl AppContext {
    pub fn new(config: Config, provider: Arc<dyn IdentityProvider>, transport: Arc<dyn Transport>) -> Self {
        let session = Arc::new(Session::new(provider, transport, config.call_timeout));
        let cache = EntityCache::new(session.clone(), config.windows.clone());
        let mutations = MutationCoordinator::new(cache.clone());
        Self {
            config,
            session,
            cache,
            mutations,
            poller: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    /// Resolves the session and starts the chat poller. Must be called from
    /// within a tokio runtime.
    pub async fn init(&self) {
        self.session.init().await;
        let mut poller = self.poller.lock();
        if poller.is_none() {
            *poller = Some(LiveFeedPoller::spawn(self.cache.clone(), self.config.poll_interval));
        }
    }

    pub async fn login(&self) -> AppResult<()> {
        let outcome = self.session.login().await;
        self.cache.clear();
        outcome
    }

    pub async fn logout(&self) {
        self.session.logout().await;
        self.cache.clear();
        self.session.init().await;
        info!("signed out");
    }

    /// The provider's identity changed underneath us; start over.
    pub async fn on_identity_change(&self) {
        self.cache.clear();
        self.session.init().await;
    }

    pub fn dispose(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.stop();
        }
        self.session.dispose();
        self.cache.clear();
    }

    pub async fn viewer(&self) -> Result<Viewer, RpcError> {
        let identity = match self.session.status() {
            SessionStatus::Authenticated(identity) => identity,
            SessionStatus::Anonymous => return Ok(Viewer::anonymous()),
            SessionStatus::Uninitialized | SessionStatus::Resolving => {
                let gateway = self.session.gateway().await?;
                match gateway.caller() {
                    Some(identity) => identity.clone(),
                    None => return Ok(Viewer::anonymous()),
                }
            }
        };
        let role = self.cache.caller_role().await.map(|read| read.value)?;
        Ok(Viewer::new(identity, role))
    }

    pub async fn capabilities(&self, target: Option<(&Identity, Visibility)>) -> Result<Capabilities, RpcError> {
        let viewer = self.viewer().await?;
        Ok(policy::evaluate(&viewer, target))
    }
}
