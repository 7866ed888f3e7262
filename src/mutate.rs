use thiserror::Error;
use tracing::{info, warn};

use crate::{
    cache::{CacheKey, EntityCache},
    chat,
    model::{Identity, MessageId, Profile, Role},
    profiles::{ProfileDraft, ProfileErrors},
    RpcError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SaveProfile(Profile),
    CreateMessage(String),
    DeleteMessage(MessageId),
    AssignRole { user: Identity, role: Role },
    ToggleVerified(Identity),
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::SaveProfile(_) => "save profile",
            Mutation::CreateMessage(_) => "send message",
            Mutation::DeleteMessage(_) => "delete message",
            Mutation::AssignRole { .. } => "assign role",
            Mutation::ToggleVerified(_) => "toggle verified badge",
        }
    }

    /// Cache entries made stale by this mutation succeeding.
    pub fn invalidates(&self, caller: Option<&Identity>) -> Vec<CacheKey> {
        let mut keys = Vec::new();
        match self {
            Mutation::SaveProfile(_) => {
                keys.push(CacheKey::CallerProfile);
                keys.extend(caller.map(|caller| CacheKey::UserProfile(caller.clone())));
                keys.push(CacheKey::MemberDirectory);
            }
            Mutation::CreateMessage(_) | Mutation::DeleteMessage(_) => keys.push(CacheKey::ChatFeed),
            Mutation::AssignRole { user, .. } => {
                if caller == Some(user) {
                    keys.push(CacheKey::CallerRole);
                    keys.push(CacheKey::CallerAdmin);
                }
            }
            Mutation::ToggleVerified(user) => {
                keys.push(CacheKey::MemberDirectory);
                keys.push(CacheKey::Verified(user.clone()));
                keys.push(CacheKey::UserProfile(user.clone()));
                if caller == Some(user) {
                    keys.push(CacheKey::CallerProfile);
                }
            }
        }
        keys
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Done,
    MessageCreated(MessageId),
}

#[derive(Debug, Error)]
pub enum MutateError {
    #[error("{0}")]
    Invalid(#[from] ProfileErrors),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl MutateError {
    /// Human-readable notice for a failed action.
    pub fn notice(&self, action: &str) -> String {
        match self {
            MutateError::Invalid(errors) => format!("Could not {action}: {errors}"),
            MutateError::Rpc(RpcError::TransportUnreachable(_)) => {
                format!("Could not {action}: the server is unreachable, please try again")
            }
            MutateError::Rpc(RpcError::StaleSession) => {
                format!("Could not {action}: you were signed out, please try again")
            }
            MutateError::Rpc(err) => format!("Could not {action}: {err}"),
        }
    }
}

/// Executes writes, one gateway call each, and keeps the cache honest
/// afterwards. Capabilities are never checked here; the remote side rejects
/// what the caller may not do.
#[derive(Clone)]
pub struct MutationCoordinator {
    cache: EntityCache,
}

impl MutationCoordinator {
    pub fn new(cache: EntityCache) -> Self {
        Self { cache }
    }

    pub async fn mutate(&self, mutation: Mutation) -> Result<Applied, RpcError> {
        let gateway = self.cache.session().gateway().await?;
        let keys = mutation.invalidates(gateway.caller());

        let outcome = match &mutation {
            Mutation::SaveProfile(profile) => gateway.save_caller_user_profile(profile.clone()).await.map(|_| Applied::Done),
            Mutation::CreateMessage(content) => gateway.create_chat_message(content.clone()).await.map(Applied::MessageCreated),
            Mutation::DeleteMessage(id) => gateway.delete_chat_message(*id).await.map(|_| Applied::Done),
            Mutation::AssignRole { user, role } => gateway.assign_caller_user_role(user.clone(), *role).await.map(|_| Applied::Done),
            Mutation::ToggleVerified(user) => gateway.toggle_verified_badge(user.clone()).await.map(|_| Applied::Done),
        };

        match outcome {
            Ok(applied) => {
                self.cache.invalidate(&keys);
                self.cache.refresh_watched(&keys);
                info!(mutation = mutation.name(), ?applied, "mutation applied");
                Ok(applied)
            }
            Err(err) => {
                warn!(mutation = mutation.name(), "mutation failed: {err}");
                Err(err)
            }
        }
    }

    pub async fn save_profile(&self, draft: &ProfileDraft) -> Result<(), MutateError> {
        let profile = draft.validate()?;
        self.mutate(Mutation::SaveProfile(profile)).await?;
        Ok(())
    }

    /// `Ok(None)` when there was nothing to send.
    pub async fn send_message(&self, text: &str) -> Result<Option<MessageId>, MutateError> {
        let Some(content) = chat::compose(text) else {
            return Ok(None);
        };
        match self.mutate(Mutation::CreateMessage(content)).await? {
            Applied::MessageCreated(id) => Ok(Some(id)),
            Applied::Done => Ok(None),
        }
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<(), MutateError> {
        self.mutate(Mutation::DeleteMessage(id)).await?;
        Ok(())
    }

    pub async fn assign_role(&self, user: Identity, role: Role) -> Result<(), MutateError> {
        self.mutate(Mutation::AssignRole { user, role }).await?;
        Ok(())
    }

    pub async fn toggle_verified(&self, user: Identity) -> Result<(), MutateError> {
        self.mutate(Mutation::ToggleVerified(user)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ada() -> Identity {
        Identity::new("ada")
    }

    #[test]
    fn chat_mutations_invalidate_the_feed() {
        let create = Mutation::CreateMessage("hi".to_owned());
        let delete = Mutation::DeleteMessage(MessageId(7));
        assert_eq!(create.invalidates(Some(&ada())), vec![CacheKey::ChatFeed]);
        assert_eq!(delete.invalidates(None), vec![CacheKey::ChatFeed]);
    }

    #[test]
    fn toggling_invalidates_everything_showing_the_badge() {
        let toggle = Mutation::ToggleVerified(Identity::new("grace"));
        assert_eq!(
            toggle.invalidates(Some(&ada())),
            vec![
                CacheKey::MemberDirectory,
                CacheKey::Verified(Identity::new("grace")),
                CacheKey::UserProfile(Identity::new("grace")),
            ]
        );

        let own = Mutation::ToggleVerified(ada());
        assert!(own.invalidates(Some(&ada())).contains(&CacheKey::CallerProfile));
    }

    #[test]
    fn role_changes_only_touch_the_callers_role_when_it_is_the_target() {
        let other = Mutation::AssignRole { user: Identity::new("grace"), role: Role::Admin };
        assert_eq!(other.invalidates(Some(&ada())), Vec::new());

        let own = Mutation::AssignRole { user: ada(), role: Role::User };
        assert_eq!(own.invalidates(Some(&ada())), vec![CacheKey::CallerRole, CacheKey::CallerAdmin]);
    }

    #[test]
    fn saving_invalidates_own_profile_and_directory() {
        let save = Mutation::SaveProfile(Profile {
            display_name: "Ada".to_owned(),
            bio: String::new(),
            social_links: Vec::new(),
            visibility: Default::default(),
            business: Default::default(),
        });
        assert_eq!(
            save.invalidates(Some(&ada())),
            vec![CacheKey::CallerProfile, CacheKey::UserProfile(ada()), CacheKey::MemberDirectory]
        );
    }

    #[test]
    fn notices_are_readable() {
        let err = MutateError::from(RpcError::RemoteRejected("Unauthorized: only admins can delete messages".to_owned()));
        assert_eq!(err.notice("delete message"), "Could not delete message: Unauthorized: only admins can delete messages");

        let err = MutateError::from(RpcError::TransportUnreachable("timed out".to_owned()));
        assert!(err.notice("send message").contains("unreachable"));
    }
}
