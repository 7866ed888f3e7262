use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::{model::Identity, AppResult};

mod clients;
mod login;
mod lockin;

pub use clients::{ClientProvider, Clients};

/// The external identity provider, as consumed by the session.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Suspends until the login attempt has been resolved one way or the other.
    async fn begin_login(&self) -> AppResult<()>;

    fn identity(&self) -> Option<Identity>;

    async fn logout(&self);
}

/// Provider with a fixed identity. Logging in without one mints a fresh
/// `dev-` identity.
pub struct StaticProvider {
    current: Mutex<Option<Identity>>,
}

impl StaticProvider {
    pub fn new(current: Option<Identity>) -> Self {
        Self { current: Mutex::new(current) }
    }

    /// Swaps the identity behind the session's back, as an expiring
    /// credential would. Callers follow up with `AppContext::on_identity_change`.
    pub fn set_identity(&self, identity: Option<Identity>) {
        *self.current.lock() = identity;
    }
}

#[async_trait]
impl IdentityProvider for StaticProvider {
    async fn begin_login(&self) -> AppResult<()> {
        let mut current = self.current.lock();
        if current.is_none() {
            *current = Some(Identity::new(format!("dev-{}", Uuid::now_v7().simple())));
        }
        Ok(())
    }

    fn identity(&self) -> Option<Identity> {
        self.current.lock().clone()
    }

    async fn logout(&self) {
        self.current.lock().take();
    }
}

/// Authorization-code login with PKCE, redirecting to a loopback callback.
pub struct OAuthProvider {
    clients: Clients,
    provider: ClientProvider,
    callback_addr: SocketAddr,
    current: Mutex<Option<Identity>>,
}

impl OAuthProvider {
    pub fn new(clients: Clients, provider: ClientProvider, callback_port: u16) -> Self {
        Self {
            clients,
            provider,
            callback_addr: SocketAddr::from(([127, 0, 0, 1], callback_port)),
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuthProvider {
    async fn begin_login(&self) -> AppResult<()> {
        let client = self.clients.get_client(self.provider)?;
        let pending = login::authorize(&client);

        println!("sign in with {} at {}", self.provider, pending.authorize_url);
        let query = login::await_callback(self.callback_addr).await?;
        let identity = lockin::lockin(&client, self.provider, pending, query).await?;

        info!(%identity, "welcome");
        *self.current.lock() = Some(identity);
        Ok(())
    }

    fn identity(&self) -> Option<Identity> {
        self.current.lock().clone()
    }

    async fn logout(&self) {
        self.current.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_login_mints_an_identity_once() {
        let provider = StaticProvider::new(None);
        assert_eq!(provider.identity(), None);

        provider.begin_login().await.unwrap();
        let first = provider.identity().unwrap();
        assert!(first.as_str().starts_with("dev-"));

        provider.begin_login().await.unwrap();
        assert_eq!(provider.identity(), Some(first));

        provider.logout().await;
        assert_eq!(provider.identity(), None);
    }
}
