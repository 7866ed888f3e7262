use std::{sync::Arc, time::Duration};

use memberlink::{
    auth::StaticProvider,
    cache::{CacheKey, CacheValue, Freshness, Subscription},
    chat,
    config::Config,
    gateway::MemoryStore,
    members::{self, DirectoryFilter},
    model::{BusinessInfo, DirectoryEntry, Identity, Profile, Visibility},
    mutate::{MutateError, Mutation},
    policy::Viewer,
    profiles::ProfileDraft,
    session::SessionStatus,
    AppContext, RpcError,
};
use pretty_assertions::assert_eq;
use tokio::time::sleep;

fn app(store: &Arc<MemoryStore>, identity: Option<&str>) -> (Arc<StaticProvider>, AppContext) {
    let provider = Arc::new(StaticProvider::new(identity.map(Identity::new)));
    let context = AppContext::new(Config::default(), provider.clone(), store.clone());
    (provider, context)
}

async fn signed_in(store: &Arc<MemoryStore>, identity: &str) -> AppContext {
    let (_, context) = app(store, Some(identity));
    context.init().await;
    context
}

/// Waits for the next settled directory snapshot that holds a value.
async fn next_directory(directory: &mut Subscription) -> Vec<DirectoryEntry> {
    loop {
        let snapshot = directory.changed().await.unwrap();
        if let Some(CacheValue::Directory(entries)) = snapshot.value {
            if !snapshot.fetching {
                return entries;
            }
        }
    }
}

fn draft(display_name: &str) -> ProfileDraft {
    ProfileDraft {
        display_name: display_name.to_owned(),
        bio: "Here for the engines".to_owned(),
        social_links: vec!["https://example.com/me".to_owned()],
        ..ProfileDraft::default()
    }
}

#[tokio::test]
async fn saved_profile_reads_back() {
    let store = Arc::new(MemoryStore::new());
    let context = signed_in(&store, "ada").await;

    assert_eq!(context.cache().caller_profile().await.unwrap().value, None);

    let draft = ProfileDraft {
        business: BusinessInfo {
            business_name: "Engines Ltd".to_owned(),
            slogan: "Difference made".to_owned(),
            ..BusinessInfo::default()
        },
        ..draft("Ada")
    };
    context.mutations().save_profile(&draft).await.unwrap();

    let read = context.cache().caller_profile().await.unwrap();
    assert_eq!(read.freshness, Freshness::Fresh);
    assert_eq!(read.value, Some(draft.validate().unwrap()));
    assert_eq!(store.calls("getCallerUserProfile"), 2);
}

#[tokio::test]
async fn invalid_draft_never_reaches_the_store() {
    let store = Arc::new(MemoryStore::new());
    let context = signed_in(&store, "ada").await;

    let err = context.mutations().save_profile(&draft("a")).await.unwrap_err();
    assert!(matches!(err, MutateError::Invalid(_)), "{err:?}");
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test]
async fn private_business_fields_stay_with_owner_and_admins() {
    let store = Arc::new(MemoryStore::new().with_admin(Identity::new("root")));

    let ada = signed_in(&store, "ada").await;
    let profile = Profile {
        display_name: "Ada".to_owned(),
        bio: String::new(),
        social_links: Vec::new(),
        visibility: Visibility::Private,
        business: BusinessInfo {
            business_name: "Engines Ltd".to_owned(),
            ..BusinessInfo::default()
        },
    };
    ada.mutations().mutate(Mutation::SaveProfile(profile)).await.unwrap();

    let filter = DirectoryFilter::default();
    for (identity, sees_business) in [("bob", false), ("ada", true), ("root", true)] {
        let context = signed_in(&store, identity).await;
        let viewer = context.viewer().await.unwrap();
        let directory = context.cache().member_directory().await.unwrap().value;
        let rendered = members::render_directory(&directory, &filter, &viewer);

        assert_eq!(rendered.len(), 1);
        assert_eq!(!rendered[0].profile.business.is_empty(), sees_business, "{identity}");
        assert_eq!(
            context.capabilities(Some((&rendered[0].identity, Visibility::Private))).await.unwrap().can_view_business_fields,
            sees_business,
        );
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_reads_share_one_fetch() {
    let store = Arc::new(MemoryStore::new());
    store.set_latency(Duration::from_secs(1));
    let context = signed_in(&store, "ada").await;

    let (first, second) = tokio::join!(context.cache().member_directory(), context.cache().member_directory());
    assert_eq!(first.unwrap().value, Vec::new());
    assert_eq!(second.unwrap().value, Vec::new());
    assert_eq!(store.calls("getMemberDirectory"), 1);
}

#[tokio::test]
async fn toggled_badge_shows_in_directory() {
    let store = Arc::new(MemoryStore::new().with_admin(Identity::new("root")));
    let carol = signed_in(&store, "carol").await;
    carol.mutations().save_profile(&draft("Carol")).await.unwrap();

    let root = signed_in(&store, "root").await;
    let directory = root.cache().member_directory().await.unwrap().value;
    assert!(!directory[0].verified);

    root.mutations().toggle_verified(Identity::new("carol")).await.unwrap();

    let read = root.cache().member_directory().await.unwrap();
    assert_eq!(read.freshness, Freshness::Fresh);
    assert!(read.value[0].verified);
    assert_eq!(store.calls("getMemberDirectory"), 2);
    assert!(root.cache().is_verified(&Identity::new("carol")).await.unwrap().value);
}

#[tokio::test]
async fn chat_renders_in_timestamp_order() {
    let store = Arc::new(MemoryStore::new());
    let author = Identity::new("ada");
    let late = store.insert_message(author.clone(), "late", 300);
    let early = store.insert_message(author.clone(), "early", 100);
    let tie_first = store.insert_message(author.clone(), "tie", 200);
    let tie_second = store.insert_message(author, "tie again", 200);

    let (_, context) = app(&store, None);
    context.init().await;

    let ids: Vec<_> = context.cache().chat_feed().await.unwrap().value.iter().map(|message| message.id).collect();
    assert_eq!(ids, vec![early, tie_first, tie_second, late]);
}

#[tokio::test]
async fn sent_message_appears_in_feed() {
    let store = Arc::new(MemoryStore::new());
    let context = signed_in(&store, "ada").await;
    context.mutations().save_profile(&draft("Ada")).await.unwrap();

    assert!(context.cache().chat_feed().await.unwrap().value.is_empty());
    let id = context.mutations().send_message("  hello there ").await.unwrap().unwrap();

    let feed = context.cache().chat_feed().await.unwrap().value;
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].id, id);
    assert_eq!(feed[0].content, "hello there");
    assert_eq!(chat::author_display_name(context.cache(), &feed[0].author).await, "Ada");
}

#[tokio::test]
async fn blank_message_is_not_sent() {
    let store = Arc::new(MemoryStore::new());
    let context = signed_in(&store, "ada").await;

    assert_eq!(context.mutations().send_message(" \n ").await.unwrap(), None);
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test]
async fn unknown_authors_are_anonymous() {
    let store = Arc::new(MemoryStore::new());
    let (_, context) = app(&store, None);
    context.init().await;

    assert_eq!(chat::author_display_name(context.cache(), &Identity::new("ghost")).await, chat::ANONYMOUS_AUTHOR);
}

#[tokio::test]
async fn non_admin_delete_is_rejected_remotely() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_message(Identity::new("ada"), "keep me", 1);
    let context = signed_in(&store, "bob").await;

    assert!(!context.capabilities(None).await.unwrap().can_delete_any_message);
    assert!(!context.capabilities(None).await.unwrap().can_toggle_verified);

    let err = context.mutations().delete_message(id).await.unwrap_err();
    assert!(
        matches!(&err, MutateError::Rpc(RpcError::RemoteRejected(reason)) if reason == "Unauthorized: only admins can delete messages"),
        "{err:?}"
    );
    assert_eq!(store.calls("deleteChatMessage"), 1);
    assert_eq!(context.cache().chat_feed().await.unwrap().value.len(), 1);
}

#[tokio::test]
async fn failed_mutation_explains_itself() {
    let store = Arc::new(MemoryStore::new());
    let (_, context) = app(&store, None);
    context.init().await;

    let err = context.mutations().send_message("hi").await.unwrap_err();
    assert_eq!(err.notice("send message"), "Could not send message: Unauthorized: only users can send messages");
}

#[tokio::test(start_paused = true)]
async fn aged_entries_are_served_while_revalidating() {
    let store = Arc::new(MemoryStore::new());
    let context = signed_in(&store, "ada").await;
    let cache = context.cache();

    let read = cache.is_caller_admin().await.unwrap();
    assert_eq!((read.value, read.freshness), (false, Freshness::Fresh));

    sleep(Duration::from_secs(61)).await;
    store.set_offline(true);

    let read = cache.is_caller_admin().await.unwrap();
    assert_eq!((read.value, read.freshness), (false, Freshness::Revalidating));

    sleep(Duration::from_millis(10)).await;
    assert!(cache.snapshot(&CacheKey::CallerAdmin).may_be_outdated());

    let read = cache.is_caller_admin().await.unwrap();
    assert!(read.may_be_outdated());
    assert!(!read.value);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(store.calls("isCallerAdmin"), 3);
    assert!(!cache.is_fetching(&CacheKey::CallerAdmin));
}

#[tokio::test]
async fn first_fetch_failure_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);
    let context = signed_in(&store, "ada").await;

    let err = context.cache().member_directory().await.unwrap_err();
    assert!(err.is_transport(), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn reads_wait_for_the_session() {
    let store = Arc::new(MemoryStore::new());
    let (_, context) = app(&store, Some("ada"));

    let pending = tokio::spawn({
        let cache = context.cache().clone();
        async move { cache.chat_feed().await }
    });
    sleep(Duration::from_secs(5)).await;
    assert!(!pending.is_finished());
    assert_eq!(store.total_calls(), 0);

    context.init().await;
    assert!(pending.await.unwrap().is_ok());
    assert_eq!(store.calls("getChatMessages"), 1);
}

#[tokio::test(start_paused = true)]
async fn identity_change_discards_in_flight_results() {
    let store = Arc::new(MemoryStore::new());
    let ada = signed_in(&store, "ada").await;
    ada.mutations().save_profile(&draft("Ada")).await.unwrap();

    store.set_latency(Duration::from_secs(2));
    let (provider, context) = app(&store, Some("ada"));
    context.init().await;

    let pending = tokio::spawn({
        let cache = context.cache().clone();
        async move { cache.caller_profile().await }
    });
    sleep(Duration::from_secs(1)).await;

    provider.set_identity(Some(Identity::new("bob")));
    context.on_identity_change().await;

    assert_eq!(pending.await.unwrap(), Err(RpcError::StaleSession));
    assert_eq!(context.cache().snapshot(&CacheKey::CallerProfile).value, None);

    assert_eq!(context.cache().caller_profile().await.unwrap().value, None);
    assert_eq!(context.session().status(), SessionStatus::Authenticated(Identity::new("bob")));
}

#[tokio::test]
async fn logout_returns_to_anonymous() {
    let store = Arc::new(MemoryStore::new());
    let context = signed_in(&store, "ada").await;
    context.cache().caller_role().await.unwrap();

    context.logout().await;
    assert_eq!(context.session().status(), SessionStatus::Anonymous);
    assert_eq!(context.viewer().await.unwrap(), Viewer::anonymous());
    assert_eq!(context.cache().snapshot(&CacheKey::CallerRole).value, None);
}

#[tokio::test(start_paused = true)]
async fn poller_runs_only_while_the_feed_is_watched() {
    let store = Arc::new(MemoryStore::new());
    let (_, context) = app(&store, None);
    context.init().await;

    sleep(Duration::from_secs(10)).await;
    assert_eq!(store.calls("getChatMessages"), 0);

    let feed = context.cache().subscribe(CacheKey::ChatFeed);
    sleep(Duration::from_secs(7)).await;
    assert_eq!(store.calls("getChatMessages"), 3);

    drop(feed);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(store.calls("getChatMessages"), 3);

    context.dispose();
}

#[tokio::test(start_paused = true)]
async fn slow_polls_are_not_stacked() {
    let store = Arc::new(MemoryStore::new());
    store.set_latency(Duration::from_secs(5));
    let (_, context) = app(&store, None);
    context.init().await;

    let mut feed = context.cache().subscribe(CacheKey::ChatFeed);
    sleep(Duration::from_secs(7)).await;
    assert_eq!(store.calls("getChatMessages"), 2);

    let snapshot = feed.changed().await.unwrap();
    assert!(snapshot.value.is_some() || snapshot.fetching);

    context.dispose();
}

#[tokio::test]
async fn manual_refresh_joins_in_flight_poll() {
    let store = Arc::new(MemoryStore::new());
    let (_, context) = app(&store, None);
    context.init().await;

    let (first, second) = tokio::join!(
        context.cache().refresh(CacheKey::ChatFeed),
        context.cache().refresh(CacheKey::ChatFeed),
    );
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(store.calls("getChatMessages"), 1);
}

#[tokio::test(start_paused = true)]
async fn watched_keys_refresh_after_a_mutation() {
    let store = Arc::new(MemoryStore::new().with_admin(Identity::new("root")));
    let carol = signed_in(&store, "carol").await;
    carol.mutations().save_profile(&draft("Carol")).await.unwrap();

    let root = signed_in(&store, "root").await;
    let mut directory = root.cache().subscribe(CacheKey::MemberDirectory);
    assert!(!root.cache().member_directory().await.unwrap().value[0].verified);

    root.mutations().toggle_verified(Identity::new("carol")).await.unwrap();

    let entries = loop {
        let entries = next_directory(&mut directory).await;
        if entries[0].verified {
            break entries;
        }
    };
    assert_eq!(entries[0].identity, Identity::new("carol"));
    assert_eq!(store.calls("getMemberDirectory"), 2);
}

#[tokio::test(start_paused = true)]
async fn unwatched_keys_stay_lazy_after_a_mutation() {
    let store = Arc::new(MemoryStore::new().with_admin(Identity::new("root")));
    let carol = signed_in(&store, "carol").await;
    carol.mutations().save_profile(&draft("Carol")).await.unwrap();

    let root = signed_in(&store, "root").await;
    root.cache().member_directory().await.unwrap();
    root.mutations().toggle_verified(Identity::new("carol")).await.unwrap();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.calls("getMemberDirectory"), 1);

    assert!(root.cache().member_directory().await.unwrap().value[0].verified);
    assert_eq!(store.calls("getMemberDirectory"), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidation_waits_for_the_running_fetch() {
    let store = Arc::new(MemoryStore::new().with_admin(Identity::new("root")));
    let carol = signed_in(&store, "carol").await;
    carol.mutations().save_profile(&draft("Carol")).await.unwrap();

    let root = signed_in(&store, "root").await;
    let mut directory = root.cache().subscribe(CacheKey::MemberDirectory);
    store.set_latency(Duration::from_secs(1));

    let toggle = tokio::spawn({
        let mutations = root.mutations().clone();
        async move { mutations.toggle_verified(Identity::new("carol")).await }
    });
    sleep(Duration::from_millis(500)).await;
    let refresh = tokio::spawn({
        let cache = root.cache().clone();
        async move { cache.refresh(CacheKey::MemberDirectory).await }
    });

    sleep(Duration::from_millis(600)).await;
    toggle.await.unwrap().unwrap();
    assert_eq!(store.calls("getMemberDirectory"), 1);

    assert!(matches!(refresh.await.unwrap(), Ok(CacheValue::Directory(_))));

    let entries = next_directory(&mut directory).await;
    assert!(entries[0].verified);
    assert_eq!(store.calls("getMemberDirectory"), 2);
    assert_eq!(store.peak_outstanding("getMemberDirectory"), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_keeps_the_poll_phase() {
    let store = Arc::new(MemoryStore::new());
    let (_, context) = app(&store, None);
    context.init().await;

    let _feed = context.cache().subscribe(CacheKey::ChatFeed);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(store.calls("getChatMessages"), 1);

    context.cache().refresh(CacheKey::ChatFeed).await.unwrap();
    assert_eq!(store.calls("getChatMessages"), 2);

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(store.calls("getChatMessages"), 3);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(store.calls("getChatMessages"), 4);

    context.dispose();
}
