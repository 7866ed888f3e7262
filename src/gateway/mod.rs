use std::{
    sync::{atomic::{AtomicBool, Ordering}, Arc},
    time::Duration,
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::{
    model::{ChatMessage, DirectoryEntry, Identity, MessageId, Profile, Role},
    RpcError,
};

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::MemoryStore;

/// One call of the remote store's RPC surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "camelCase")]
pub enum Operation {
    GetCallerUserProfile,
    SaveCallerUserProfile(Profile),
    GetUserProfile(Identity),
    GetMemberDirectory,
    GetChatMessages,
    CreateChatMessage(String),
    DeleteChatMessage(MessageId),
    GetCallerUserRole,
    AssignCallerUserRole(Identity, Role),
    IsCallerAdmin,
    IsUserVerified(Identity),
    ToggleVerifiedBadge(Identity),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        use Operation::*;
        match self {
            GetCallerUserProfile => "getCallerUserProfile",
            SaveCallerUserProfile(_) => "saveCallerUserProfile",
            GetUserProfile(_) => "getUserProfile",
            GetMemberDirectory => "getMemberDirectory",
            GetChatMessages => "getChatMessages",
            CreateChatMessage(_) => "createChatMessage",
            DeleteChatMessage(_) => "deleteChatMessage",
            GetCallerUserRole => "getCallerUserRole",
            AssignCallerUserRole(..) => "assignCallerUserRole",
            IsCallerAdmin => "isCallerAdmin",
            IsUserVerified(_) => "isUserVerified",
            ToggleVerifiedBadge(_) => "toggleVerifiedBadge",
        }
    }
}

/// Moves one operation to the remote store and back. No retries, no caching.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, caller: Option<&Identity>, op: &Operation) -> Result<Value, RpcError>;
}

/// Typed boundary around a transport, bound to one resolved identity.
///
/// A gateway is built by the session for each resolution and closed when the
/// identity changes. Once closed every call, including ones already in
/// flight, ends in [`RpcError::StaleSession`] so no late reply escapes.
pub struct Gateway {
    caller: Option<Identity>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    generation: u64,
    closed: AtomicBool,
}

impl Gateway {
    pub(crate) fn new(caller: Option<Identity>, transport: Arc<dyn Transport>, timeout: Duration, generation: u64) -> Self {
        Self {
            caller,
            transport,
            timeout,
            generation,
            closed: AtomicBool::new(false),
        }
    }

    pub fn caller(&self) -> Option<&Identity> {
        self.caller.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub async fn call(&self, op: Operation) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::StaleSession);
        }

        let request_id = Uuid::now_v7();
        let span = tracing::debug_span!("rpc", op = op.name(), %request_id, generation = self.generation);
        let reply = tokio::time::timeout(self.timeout, self.transport.call(self.caller.as_ref(), &op))
            .instrument(span)
            .await;

        if self.is_closed() {
            debug!(op = op.name(), %request_id, "reply arrived after teardown");
            return Err(RpcError::StaleSession);
        }

        let result = reply.unwrap_or_else(|_| Err(RpcError::TransportUnreachable(format!("no reply within {:?}", self.timeout))));
        match &result {
            Ok(_) => debug!(op = op.name(), %request_id, "ok"),
            Err(err) => warn!(op = op.name(), %request_id, "failed: {err}"),
        }
        result
    }

    async fn call_as<T: DeserializeOwned>(&self, op: Operation) -> Result<T, RpcError> {
        let name = op.name();
        let value = self.call(op).await?;
        serde_json::from_value(value).map_err(|err| RpcError::Malformed { op: name, reason: err.to_string() })
    }

    pub async fn get_caller_user_profile(&self) -> Result<Option<Profile>, RpcError> {
        self.call_as(Operation::GetCallerUserProfile).await
    }

    pub async fn save_caller_user_profile(&self, profile: Profile) -> Result<(), RpcError> {
        self.call_as(Operation::SaveCallerUserProfile(profile)).await
    }

    pub async fn get_user_profile(&self, user: Identity) -> Result<Option<Profile>, RpcError> {
        self.call_as(Operation::GetUserProfile(user)).await
    }

    pub async fn get_member_directory(&self) -> Result<Vec<DirectoryEntry>, RpcError> {
        self.call_as(Operation::GetMemberDirectory).await
    }

    pub async fn get_chat_messages(&self) -> Result<Vec<ChatMessage>, RpcError> {
        self.call_as(Operation::GetChatMessages).await
    }

    pub async fn create_chat_message(&self, content: String) -> Result<MessageId, RpcError> {
        self.call_as(Operation::CreateChatMessage(content)).await
    }

    pub async fn delete_chat_message(&self, id: MessageId) -> Result<(), RpcError> {
        self.call_as(Operation::DeleteChatMessage(id)).await
    }

    pub async fn get_caller_user_role(&self) -> Result<Role, RpcError> {
        self.call_as(Operation::GetCallerUserRole).await
    }

    pub async fn assign_caller_user_role(&self, user: Identity, role: Role) -> Result<(), RpcError> {
        self.call_as(Operation::AssignCallerUserRole(user, role)).await
    }

    pub async fn is_caller_admin(&self) -> Result<bool, RpcError> {
        self.call_as(Operation::IsCallerAdmin).await
    }

    pub async fn is_user_verified(&self, user: Identity) -> Result<bool, RpcError> {
        self.call_as(Operation::IsUserVerified(user)).await
    }

    pub async fn toggle_verified_badge(&self, user: Identity) -> Result<(), RpcError> {
        self.call_as(Operation::ToggleVerifiedBadge(user)).await
    }
}
