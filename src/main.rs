//! # Companion Gateway
//!
//! Operator binary for the access gateway.
//!
//! ## Usage
//!
//! ```bash
//! # Validate configuration, warm credentials, print dependency health
//! companion-gateway --config gateway.yaml check
//!
//! # Chat through the gateway as a guest
//! companion-gateway --config gateway.yaml chat
//!
//! # Chat as a signed-in user, synthesizing each reply
//! GATEWAY_TOKEN=eyJ... companion-gateway chat --speak --audio-dir ./replies
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gateway_config::{load_config, GatewayConfig, LogFormat};
use gateway_core::generate_session_id;
use gateway_facade::{AccessError, ConversationService, Gateway, GatewayBuilder};
use gateway_providers::InMemoryConversationStore;
use gateway_security::GuestAccess;
use gateway_telemetry::{init_logging, LoggingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// Access gateway for the companion app's secret store, identity provider,
/// completion and speech services
#[derive(Parser, Debug)]
#[command(name = "companion-gateway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "GATEWAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration, warm credentials, and print dependency health
    Check(CheckArgs),

    /// Chat interactively through the gateway
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Print the health report and metrics as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Identity token; without one the session is a guest session
    #[arg(long, env = "GATEWAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Guest session id; generated when absent
    #[arg(long)]
    session: Option<String>,

    /// Synthesize each reply
    #[arg(long)]
    speak: bool,

    /// Voice for synthesized replies
    #[arg(long)]
    voice: Option<String>,

    /// Directory synthesized replies are written to
    #[arg(long, default_value = ".")]
    audio_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    init_tracing(&config, cli.verbose)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting companion gateway");

    let gateway = Arc::new(
        GatewayBuilder::new(config.clone())
            .build()
            .context("Failed to build gateway")?,
    );

    match cli.command {
        Commands::Check(args) => check(&gateway, &args).await,
        Commands::Chat(args) => chat(gateway, &config, args).await,
    }
}

fn init_tracing(config: &GatewayConfig, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let logging = LoggingConfig::new(level).with_json(config.logging.format == LogFormat::Json);
    init_logging(&logging).context("Failed to initialize logging")
}

async fn check(gateway: &Gateway, args: &CheckArgs) -> Result<()> {
    let mut missing = 0;
    for (name, result) in gateway.warm_credentials().await {
        match result {
            Ok(descriptor) => println!(
                "credential {name}: ok (sha256 {}, {} bytes, {})",
                descriptor.fingerprint, descriptor.length, descriptor.source
            ),
            Err(err) => {
                missing += 1;
                println!("credential {name}: {err}");
            }
        }
    }

    let health = gateway.health();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&health)?);
        print!("{}", gateway.metrics().render()?);
    } else {
        println!("status: {}", health.status);
        for dependency in &health.dependencies {
            println!(
                "  {:<20} {:<10} {}",
                dependency.dependency.name(),
                dependency.state,
                dependency.status
            );
        }
    }

    if missing > 0 {
        anyhow::bail!("{missing} credential(s) unavailable");
    }
    Ok(())
}

async fn chat(gateway: Arc<Gateway>, config: &GatewayConfig, args: ChatArgs) -> Result<()> {
    let session = args.session.clone().unwrap_or_else(generate_session_id);
    let caller = match gateway
        .validate_caller(args.token.as_deref(), &GuestAccess::permitted(session))
        .await
    {
        Ok(caller) => caller,
        Err(err) => anyhow::bail!("Cannot start chat: {err}"),
    };
    let service = ConversationService::new(gateway.clone(), Arc::new(InMemoryConversationStore::new()))
        .with_system_prompt(config.facade.system_prompt.clone());

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("session {} ({})\n", caller.session_id(), caller.identity_class()).as_bytes())
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turn = 0_u32;
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match service.send(&caller, &line).await {
            Ok(reply) => {
                turn += 1;
                let mut out = reply.text.clone();
                if let Some(remaining) = reply.remaining_guest_messages {
                    out.push_str(&format!("\n[{remaining} guest message(s) left]"));
                }
                stdout.write_all(format!("{out}\n").as_bytes()).await?;

                if args.speak {
                    speak(&gateway, &caller, &reply.text, &args, turn).await?;
                }
            }
            Err(AccessError::QuotaExceeded { limit, .. }) => {
                stdout
                    .write_all(format!("Guest limit of {limit} messages reached. Sign in to continue.\n").as_bytes())
                    .await?;
            }
            Err(err @ AccessError::DependencyUnavailable { .. }) => {
                warn!(error = %err, "Completion unavailable");
                stdout
                    .write_all(b"The assistant is unavailable right now, please try again shortly.\n")
                    .await?;
            }
            Err(err) => {
                stdout.write_all(format!("{err}\n").as_bytes()).await?;
            }
        }
    }
    Ok(())
}

async fn speak(
    gateway: &Gateway,
    caller: &gateway_core::CallerContext,
    text: &str,
    args: &ChatArgs,
    turn: u32,
) -> Result<()> {
    if !gateway.would_admit(gateway_core::Dependency::SpeechService) {
        info!("Speech service breaker open, skipping synthesis");
        return Ok(());
    }
    match gateway.call_speech(caller, text, args.voice.as_deref()).await {
        Ok(audio) => {
            let path = args.audio_dir.join(format!("reply-{turn}.mp3"));
            tokio::fs::write(&path, &audio.audio)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = audio.audio.len(), "Reply synthesized");
        }
        Err(err) => warn!(error = %err, "Speech synthesis skipped"),
    }
    Ok(())
}
