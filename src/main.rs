mod api;
mod gateway;

use chorus_channels::web::{Deadlines, Hub, WebChannelProvider};
use chorus_core::{
    config::{self, shellexpand, Prompts},
    queue,
    registry::Registry,
    traits::{ChannelProvider, Generator},
};
use chorus_memory::Store;
use chorus_providers::{GeminiGenerator, OpenAiGenerator};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "chorus",
    version,
    about = "Chorus: multi-bot conversations across chat gateways and the web"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Chorus service.
    Start,
    /// Check configuration and generator availability.
    Status,
    /// Send a one-shot prompt to a generator.
    Ask {
        /// Generator family, e.g. "openai".
        generator: String,
        /// The prompt to send.
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;
    let _log_guard = init_tracing(&cfg.chorus);

    match cli.command {
        Commands::Start => start(cfg).await?,
        Commands::Status => {
            println!("Chorus status\n");
            println!("Config: {}", cli.config);
            println!("Database: {}", shellexpand(&cfg.memory.db_path));
            println!(
                "API: {}:{} ({})",
                cfg.api.host,
                cfg.api.port,
                if cfg.api.api_key.is_empty() {
                    "no auth"
                } else {
                    "bearer auth"
                }
            );
            println!(
                "Web channel: {}",
                if cfg.channel.web.enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!();

            let generators = build_generators(&cfg);
            if generators.is_empty() {
                println!("  no generators enabled");
            }
            for (name, generator) in generators.iter() {
                println!(
                    "  {name}: {}",
                    if generator.is_available().await {
                        "available"
                    } else {
                        "unavailable"
                    }
                );
            }
        }
        Commands::Ask { generator, prompt } => {
            if prompt.is_empty() {
                anyhow::bail!("no prompt provided. Usage: chorus ask <generator> <prompt>");
            }
            let generators = build_generators(&cfg);
            let backend = generators.get(&generator)?;
            let response = backend.ask(&prompt.join(" ")).await?;
            println!("{response}");
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(
    cfg: &config::ChorusConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level));

    let (file_layer, guard) = if cfg.log_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(shellexpand(&cfg.log_dir), "chorus.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

/// Build the enabled generator backends.
fn build_generators(cfg: &config::Config) -> Registry<dyn Generator> {
    let mut generators: Registry<dyn Generator> = Registry::new("generator");

    let openai = &cfg.provider.openai;
    if openai.enabled {
        if openai.api_key.is_empty() {
            warn!("openai is enabled but api_key is empty (set OPENAI_API_KEY)");
        }
        generators.register("openai", Arc::new(OpenAiGenerator::from_config(openai)));
    }

    let gemini = &cfg.provider.gemini;
    if gemini.enabled {
        if gemini.api_key.is_empty() {
            warn!("gemini is enabled but api_key is empty (set GEMINI_API_KEY)");
        }
        generators.register("gemini", Arc::new(GeminiGenerator::from_config(gemini)));
    }

    generators
}

/// Wire every component and run until Ctrl-C.
async fn start(cfg: config::Config) -> anyhow::Result<()> {
    let generators = build_generators(&cfg);
    if generators.is_empty() {
        anyhow::bail!("No generators enabled. Enable at least one in [provider.*] of config.toml.");
    }
    if !cfg.channel.web.enabled {
        warn!("web channel disabled: only externally registered providers will be served");
    }

    let store = Store::new(&cfg.memory).await?;
    let prompts = Prompts::load(&cfg.chorus.data_dir);
    let shutdown = CancellationToken::new();

    let (inbound_topic, inbound_sub) = queue::topic("inbound-events", &cfg.queue);
    let (task_topic, task_sub) = queue::topic("generation-tasks", &cfg.queue);
    let (result_topic, result_sub) = queue::topic("generation-results", &cfg.queue);

    let (hub, hub_task) = Hub::spawn(&cfg.hub, shutdown.clone());

    let mut providers: Registry<dyn ChannelProvider> = Registry::new("provider");
    if cfg.channel.web.enabled {
        let web = WebChannelProvider::new(hub.clone(), inbound_topic.clone());
        providers.register("web", Arc::new(web));
    }

    let gw = Arc::new(gateway::Gateway::new(
        store,
        generators,
        providers,
        prompts,
        task_topic,
        result_topic,
        cfg.memory.history_limit,
    ));

    let events = Arc::new(gateway::WebEvents::new(
        gw.clone(),
        hub.clone(),
        inbound_topic,
        cfg.channel.web.seed_bots,
    ));
    let api_state = api::ApiState::new(
        gw.clone(),
        hub,
        events,
        Deadlines::from(&cfg.hub),
        &cfg.api.api_key,
        shutdown.clone(),
    );
    let api_handle = tokio::spawn(api::serve(cfg.api.clone(), api_state));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        signal.cancel();
    });

    println!("Chorus starting...");
    gw.run(
        gateway::Subscriptions {
            inbound: inbound_sub,
            tasks: task_sub,
            results: result_sub,
        },
        cfg.scheduler.clone(),
        shutdown,
    )
    .await;

    let _ = api_handle.await;
    let _ = hub_task.await;
    info!("Shutdown complete.");
    Ok(())
}
