use std::{collections::HashSet, str::FromStr, sync::Arc};

use memberlink::{
    auth::{Clients, IdentityProvider, OAuthProvider, StaticProvider},
    cache::{CacheKey, CacheValue},
    chat,
    config::Config,
    gateway::HttpTransport,
    model::{ChatMessage, MessageId},
    AppContext, AppResult,
};
use tracing::{info, warn};

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memberlink=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> AppResult<()> {
    init_logging();

    let config = Config::from_env()?;
    let endpoint = config.endpoint.clone().ok_or("MEMBERLINK_ENDPOINT is not set")?;
    let transport = Arc::new(HttpTransport::new(&endpoint)?);

    let provider: Arc<dyn IdentityProvider> = match &config.client_secret_path {
        Some(path) => {
            let json = serde_json::Value::from_str(&std::fs::read_to_string(path)?)?;
            let clients = Clients::from_json(json, config.callback_port)?;
            Arc::new(OAuthProvider::new(clients, config.oauth_provider, config.callback_port))
        }
        None => Arc::new(StaticProvider::new(None)),
    };

    let context = AppContext::new(config, provider, transport);
    context.init().await;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--login" => context.login().await?,
            "--say" => {
                let text = args.next().ok_or("--say needs the message text")?;
                match context.mutations().send_message(&text).await {
                    Ok(Some(id)) => info!(%id, "sent"),
                    Ok(None) => warn!("nothing to send"),
                    Err(err) => eprintln!("{}", err.notice("send message")),
                }
            }
            other => return Err(format!("unknown argument {other}").into()),
        }
    }

    tail(&context).await;
    context.dispose();
    Ok(())
}

/// Prints the chat feed as it changes until interrupted.
async fn tail(context: &AppContext) {
    let mut feed = context.cache().subscribe(CacheKey::ChatFeed);
    let mut seen = HashSet::new();

    if let Ok(read) = context.cache().chat_feed().await {
        print_new(context, &read.value, &mut seen).await;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snapshot = feed.changed() => {
                let Some(snapshot) = snapshot else { break };
                if let Some(CacheValue::Chat(messages)) = &snapshot.value {
                    print_new(context, messages, &mut seen).await;
                }
                if snapshot.may_be_outdated() {
                    eprintln!("(chat may be outdated)");
                }
            }
        }
    }
}

async fn print_new(context: &AppContext, messages: &[ChatMessage], seen: &mut HashSet<MessageId>) {
    for message in messages {
        if !seen.insert(message.id) {
            continue;
        }
        let author = chat::author_display_name(context.cache(), &message.author).await;
        let at = message
            .created_at()
            .map(|at| format!("{:02}:{:02}", at.hour(), at.minute()))
            .unwrap_or_else(|| "--:--".to_owned());
        println!("[{at}] {author}: {}", message.content);
    }
}
