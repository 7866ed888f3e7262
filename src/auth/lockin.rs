use oauth2::{reqwest, AuthorizationCode, CsrfToken, TokenResponse};
use serde_json::Value;

use crate::{model::Identity, AppResult};

use super::{clients::{ClientProvider, HappyClient}, login::{LockinQuery, PendingLogin}};

/// Completes the code exchange and resolves the caller's identity.
pub(crate) async fn lockin(
    client: &HappyClient,
    provider: ClientProvider,
    pending: PendingLogin,
    LockinQuery { state, code }: LockinQuery,
) -> AppResult<Identity> {
    let state = CsrfToken::new(state.ok_or("OAuth: without state")?);
    let code = AuthorizationCode::new(code.ok_or("OAuth: without code")?);

    if state.secret().as_str() != pending.csrf_state.secret().as_str() {
        return Err("csrf tokens don't match".into());
    }

    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(pending.pkce_verifier)
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let body: Value = http_client.get(provider.userinfo_url())
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, "memberlink")
        .send()
        .await?
        .json()
        .await?;

    let user_id = match body.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(format!("expected id in {body}").into()),
    };

    Ok(Identity::new(format!("{}:{user_id}", provider.id())))
}
