use crate::{
    cache::EntityCache,
    model::{ChatMessage, Identity},
};

mod poller;

pub use poller::LiveFeedPoller;

pub const ANONYMOUS_AUTHOR: &str = "Anonymous User";

/// Display order: ascending remote timestamp, ties broken by id.
pub fn ordered(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages.sort_by_key(|message| (message.timestamp, message.id));
    messages
}

/// Trimmed message content, or `None` when there is nothing to send.
pub fn compose(text: &str) -> Option<String> {
    let content = text.trim();
    (!content.is_empty()).then(|| content.to_owned())
}

/// Author name as shown next to a message.
pub async fn author_display_name(cache: &EntityCache, author: &Identity) -> String {
    match cache.user_profile(author).await {
        Ok(read) => read.value.map(|profile| profile.display_name),
        Err(_) => None,
    }
    .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_owned())
}
