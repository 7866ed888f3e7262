use std::{net::SocketAddr, sync::Arc};

use axum::{debug_handler, extract::{Path, Query, State}, response::Html, routing::get, Router};
use oauth2::{url::Url, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, Scope};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{res, AppResult};

use super::clients::HappyClient;

#[derive(Debug, Deserialize)]
pub(crate) struct LockinQuery {
    pub(crate) state: Option<String>,
    pub(crate) code: Option<String>,
}

/// Secrets of one authorization attempt, held until the callback arrives.
pub(crate) struct PendingLogin {
    pub(crate) authorize_url: Url,
    pub(crate) csrf_state: CsrfToken,
    pub(crate) pkce_verifier: PkceCodeVerifier,
}

type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<LockinQuery>>>>;

pub(crate) fn authorize(client: &HappyClient) -> PendingLogin {
    let (pkce_code_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (authorize_url, csrf_state) = client.authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("openid".to_string()))
        .set_pkce_challenge(pkce_code_challenge)
        .url();

    PendingLogin {
        authorize_url,
        csrf_state,
        pkce_verifier,
    }
}

/// Serves the redirect target on `addr` until the provider calls back once.
pub(crate) async fn await_callback(addr: SocketAddr) -> AppResult<LockinQuery> {
    let (tx, rx) = oneshot::channel();
    let slot: CallbackSlot = Arc::new(Mutex::new(Some(tx)));

    let app = Router::new()
        .route("/lockin/{provider}", get(lockin_page))
        .with_state(slot);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    debug!(%addr, "waiting for login callback");

    let server = tokio::spawn(async move { axum::serve(listener, app).await });
    let query = rx.await.map_err(|_| "login callback server stopped");
    server.abort();

    Ok(query?)
}

#[debug_handler]
async fn lockin_page(
    Path(provider): Path<String>,
    State(slot): State<CallbackSlot>,
    Query(query): Query<LockinQuery>,
) -> Html<String> {
    if let Some(tx) = slot.lock().take() {
        let _ = tx.send(query);
    }
    res::signed_in(&provider)
}
