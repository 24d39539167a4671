mod cli;
mod settings;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use cli::{Cli, Commands};
use elocute_live::desktop::CpalBackend;
use elocute_live::gemini::GeminiConnector;
use elocute_live::{CoachSession, LiveEventHandler, format_material};
use settings::SettingsFile;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .init();
}

/// Prints the coach's words and what it heard as they stream in.
struct ConsoleHandler;

#[async_trait]
impl LiveEventHandler for ConsoleHandler {
    async fn on_text(&self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    async fn on_input_transcription(&self, text: &str) {
        tracing::debug!(heard = text, "User speech");
    }

    async fn on_turn_complete(&self) {
        println!();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let file = SettingsFile::load(&cli.config)?;

    match cli.command {
        Commands::Practice { sentences, voice, model } => {
            let mut config = file.live.clone();
            if let Some(voice) = voice {
                config = config.with_voice(voice);
            }
            let settings = file.provider_settings(model.as_deref())?;
            let sentences = file.practice_sentences(&sentences);
            let material = (!sentences.is_empty()).then(|| format_material(&sentences));
            practice(settings, config, material).await
        }
        Commands::CheckConfig => {
            let settings = file.provider_settings(None)?;
            println!("provider: {}", settings.provider);
            println!("model:    {}", settings.model);
            println!("endpoint: {}", settings.endpoint.as_deref().unwrap_or("(default)"));
            println!("voice:    {}", file.live.voice);
            println!("sentences: {}", file.sentences.len());
            Ok(())
        }
    }
}

async fn practice(
    settings: elocute_live::ProviderSettings,
    config: elocute_live::LiveConfig,
    material: Option<String>,
) -> Result<()> {
    let coach = CoachSession::new(
        settings,
        config,
        Arc::new(GeminiConnector),
        Arc::new(CpalBackend::new()),
    )
    .with_event_handler(Arc::new(ConsoleHandler));

    let mut states = coach.subscribe();
    let status = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            eprintln!("[{state}] {}", state.status_text());
        }
    });

    let result = match coach.start(material.as_deref()).await {
        Ok(()) => tokio::signal::ctrl_c().await.map_err(anyhow::Error::from),
        Err(e) => Err(e.into()),
    };

    coach.stop().await;
    status.abort();
    result
}
