use async_trait::async_trait;
use oauth2::reqwest;
use serde::Serialize;
use serde_json::Value;

use crate::{model::Identity, AppResult, RpcError};

use super::{Operation, Transport};

#[derive(Serialize)]
struct RpcRequest<'a> {
    caller: Option<&'a Identity>,
    call: &'a Operation,
}

/// JSON-over-HTTP transport: every operation is a POST to one endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> AppResult<Self> {
        let client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_owned(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, caller: Option<&Identity>, op: &Operation) -> Result<Value, RpcError> {
        let response = self.client.post(&self.endpoint)
            .json(&RpcRequest { caller, call: op })
            .send()
            .await
            .map_err(|err| RpcError::TransportUnreachable(err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RpcError::TransportUnreachable(err.to_string()))?;
        let body = decode_body(op, &bytes)?;

        if status.is_success() {
            return Ok(body.get("result").cloned().unwrap_or(Value::Null));
        }

        let reason = match body.get("reason").and_then(Value::as_str) {
            Some(reason) => reason.to_owned(),
            None => format!("{} rejected with {status}", op.name()),
        };
        Err(RpcError::RemoteRejected(reason))
    }
}

/// An empty body is a unit reply.
fn decode_body(op: &Operation, bytes: &[u8]) -> Result<Value, RpcError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|err| RpcError::Malformed { op: op.name(), reason: err.to_string() })
}
