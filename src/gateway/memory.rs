use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    model::{ChatMessage, DirectoryEntry, Identity, MessageId, Profile, Role},
    RpcError,
};

use super::{Operation, Transport};

#[derive(Default)]
struct Store {
    profiles: BTreeMap<Identity, Profile>,
    roles: HashMap<Identity, Role>,
    verified: HashSet<Identity>,
    messages: Vec<ChatMessage>,
    next_id: u64,
    last_timestamp: i64,

    calls: HashMap<&'static str, usize>,
    outstanding: HashMap<&'static str, usize>,
    peak: HashMap<&'static str, usize>,
    latency: Duration,
    offline: bool,
}

/// In-process remote store. Enforces the same rules the real one does, and
/// counts every call it receives.
#[derive(Default)]
pub struct MemoryStore {
    store: Mutex<Store>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin(self, admin: Identity) -> Self {
        self.store.lock().roles.insert(admin, Role::Admin);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.store.lock().latency = latency;
    }

    pub fn set_offline(&self, offline: bool) {
        self.store.lock().offline = offline;
    }

    pub fn calls(&self, op: &str) -> usize {
        self.store.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Most calls of `op` that were ever being served at the same time.
    pub fn peak_outstanding(&self, op: &str) -> usize {
        self.store.lock().peak.get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.store.lock().calls.values().sum()
    }

    /// Seeds a message with an explicit remote timestamp.
    pub fn insert_message(&self, author: Identity, content: &str, timestamp: i64) -> MessageId {
        let mut store = self.store.lock();
        store.push_message(author, content.to_owned(), timestamp)
    }
}

#[async_trait]
impl Transport for MemoryStore {
    async fn call(&self, caller: Option<&Identity>, op: &Operation) -> Result<Value, RpcError> {
        let latency = {
            let mut store = self.store.lock();
            *store.calls.entry(op.name()).or_default() += 1;
            if store.offline {
                return Err(RpcError::TransportUnreachable("in-memory store is offline".to_owned()));
            }
            let outstanding = store.outstanding.entry(op.name()).or_default();
            *outstanding += 1;
            let outstanding = *outstanding;
            let peak = store.peak.entry(op.name()).or_default();
            *peak = (*peak).max(outstanding);
            store.latency
        };
        let serving = Serving { store: &self.store, op: op.name() };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        drop(serving);
        self.store.lock().apply(caller, op)
    }
}

/// Counts a call as outstanding until it is answered or abandoned.
struct Serving<'a> {
    store: &'a Mutex<Store>,
    op: &'static str,
}

impl Drop for Serving<'_> {
    fn drop(&mut self) {
        if let Some(outstanding) = self.store.lock().outstanding.get_mut(self.op) {
            *outstanding = outstanding.saturating_sub(1);
        }
    }
}

impl Store {
    fn role_of(&self, caller: Option<&Identity>) -> Role {
        match caller {
            Some(identity) => self.roles.get(identity).copied().unwrap_or(Role::User),
            None => Role::Guest,
        }
    }

    fn require_user<'a>(&self, caller: Option<&'a Identity>, action: &str) -> Result<&'a Identity, RpcError> {
        match caller {
            Some(identity) if self.role_of(caller) != Role::Guest => Ok(identity),
            _ => Err(RpcError::RemoteRejected(format!("Unauthorized: only users can {action}"))),
        }
    }

    fn require_admin(&self, caller: Option<&Identity>, action: &str) -> Result<(), RpcError> {
        match self.role_of(caller) {
            Role::Admin => Ok(()),
            Role::User | Role::Guest => Err(RpcError::RemoteRejected(format!("Unauthorized: only admins can {action}"))),
        }
    }

    fn push_message(&mut self, author: Identity, content: String, timestamp: i64) -> MessageId {
        self.next_id += 1;
        let id = MessageId(self.next_id);
        self.last_timestamp = self.last_timestamp.max(timestamp);
        self.messages.push(ChatMessage { id, author, content, timestamp });
        id
    }

    fn apply(&mut self, caller: Option<&Identity>, op: &Operation) -> Result<Value, RpcError> {
        use Operation::*;
        match op {
            GetCallerUserProfile => reply(caller.and_then(|identity| self.profiles.get(identity))),
            SaveCallerUserProfile(profile) => {
                let identity = self.require_user(caller, "save profiles")?;
                self.profiles.insert(identity.clone(), profile.clone());
                reply(())
            }
            GetUserProfile(identity) => reply(self.profiles.get(identity)),
            GetMemberDirectory => {
                self.require_user(caller, "view the member directory")?;
                let entries: Vec<DirectoryEntry> = self.profiles.iter()
                    .map(|(identity, profile)| DirectoryEntry {
                        identity: identity.clone(),
                        profile: profile.clone(),
                        verified: self.verified.contains(identity),
                    })
                    .collect();
                reply(entries)
            }
            GetChatMessages => reply(&self.messages),
            CreateChatMessage(content) => {
                let author = self.require_user(caller, "send messages")?.clone();
                let content = content.trim();
                if content.is_empty() {
                    return Err(RpcError::RemoteRejected("Message content cannot be empty".to_owned()));
                }
                let now = OffsetDateTime::now_utc().unix_timestamp_nanos() as i64;
                let timestamp = now.max(self.last_timestamp + 1);
                reply(self.push_message(author, content.to_owned(), timestamp))
            }
            DeleteChatMessage(id) => {
                self.require_admin(caller, "delete messages")?;
                let before = self.messages.len();
                self.messages.retain(|message| message.id != *id);
                if self.messages.len() == before {
                    return Err(RpcError::RemoteRejected(format!("Message {id} not found")));
                }
                reply(())
            }
            GetCallerUserRole => reply(self.role_of(caller)),
            AssignCallerUserRole(identity, role) => {
                self.require_admin(caller, "assign roles")?;
                self.roles.insert(identity.clone(), *role);
                reply(())
            }
            IsCallerAdmin => reply(self.role_of(caller) == Role::Admin),
            IsUserVerified(identity) => reply(self.verified.contains(identity)),
            ToggleVerifiedBadge(identity) => {
                self.require_admin(caller, "toggle verified badges")?;
                if !self.verified.remove(identity) {
                    self.verified.insert(identity.clone());
                }
                reply(())
            }
        }
    }
}

fn reply<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|err| RpcError::Malformed { op: "reply", reason: err.to_string() })
}
