//! arcbot - QQ chat bot backed by an OpenAI-compatible model

mod bot;
mod config;
mod napcat;
mod router;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arc_ai::providers::{OpenAICompatProvider, ProviderConfig};
use arc_chat::{
    ChatConfig, ChatId, Conversation, Dispatcher, HistoryStore, JsonHistoryStore,
    MemoryHistoryStore, PromptSource, SystemPrompt,
};
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use crate::bot::Bot;
use crate::config::Config;
use crate::router::Router;

/// arcbot - QQ chat bot
#[derive(Parser, Debug)]
#[command(name = "arcbot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: $ARCBOT_CONFIG or config/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Write the example config file and exit
    #[arg(long)]
    init_config: bool,

    /// Send a single message to the model and print the reply segments
    #[arg(short = 'c', long)]
    command: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = Config::config_path(args.config.as_deref());

    // Initialize config and exit
    if args.init_config {
        match Config::init(&config_path) {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = Config::load(&config_path)?;
    init_tracing(args.verbose || config.debug);

    let token = config.api_token().with_context(|| {
        format!(
            "No API token: set ai.token in {} or {}",
            config_path.display(),
            config::TOKEN_ENV
        )
    })?;
    let provider = OpenAICompatProvider::new(ProviderConfig {
        api_url: config.ai.api_url.clone(),
        api_key: token,
        model: config.ai.model.clone(),
        idle_timeout: config.request_timeout(),
    })?;

    let system_prompt = SystemPrompt::new(PromptSource::File(config.system_prompt_file.clone()))
        .with_notebook(config.notebook_path());
    let chat_config = ChatConfig {
        max_context_tokens: config.ai.max_context_tokens,
    };

    // Non-interactive mode
    if let Some(text) = args.command {
        let store: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
        let conversation =
            Conversation::new(Arc::new(provider), store, system_prompt, chat_config);
        let mut reply = conversation.converse(ChatId::private("local"), text);
        while let Some(segment) = reply.next().await {
            println!("{}", segment);
        }
        return Ok(());
    }

    tracing::info!(
        model = %config.ai.model,
        ws_url = %config.qqbot.ws_url,
        data_dir = %config.data_dir.display(),
        "Starting arcbot"
    );

    let store: Arc<dyn HistoryStore> = Arc::new(JsonHistoryStore::new(&config.data_dir));
    let conversation = Conversation::new(Arc::new(provider), store, system_prompt, chat_config);

    let (sink, outbox) = napcat::outbox();
    let bot = Arc::new(Bot::new(
        Router::new(
            config.qqbot.group_prefix.clone(),
            config.qqbot.admin_qq.clone(),
        ),
        conversation,
        Arc::new(sink),
        Dispatcher::new(config.qqbot.max_concurrent_exchanges),
        config.qqbot.pacing(),
    ));

    let client = napcat::NapcatClient::new(&config.qqbot, outbox);
    let run = client.run(move |event| {
        // Exchanges run detached; the read loop never waits on them.
        let _ = bot.handle(event);
    });

    tokio::select! {
        _ = run => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "arcbot=debug,arc_chat=debug,arc_ai=debug"
    } else {
        "arcbot=info,arc_chat=info,arc_ai=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
