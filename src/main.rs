use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use waav_concierge::{
    AgentConfig, Capabilities,
    core::{
        ConversationMode, ConversationOrchestrator, ConversationSink, FunctionResult, InputMode,
        LoopbackConnector, NotificationSink, OpenAIRealtime, RealtimeConnector, RealtimeProvider,
        StatusNotice, UserInput, default_backend,
        realtime::{ECHO_CALL_PREFIX, ResponseOutcome, TranscriptRole},
    },
};

/// WaaV Concierge - realtime voice assistant for a cafe service robot
#[derive(Parser, Debug)]
#[command(name = "waav-concierge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Input mode override (auto, voice or text)
    #[arg(short = 'm', long = "mode")]
    mode: Option<InputMode>,

    /// Run against the in-memory echo endpoint instead of a remote service
    #[arg(long = "loopback")]
    loopback: bool,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the capability schemas offered to the model
    Capabilities,
}

/// Prints the conversation to the terminal.
struct ConsoleSink;

impl ConversationSink for ConsoleSink {
    fn on_text_delta(&self, _response_id: &str, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn on_transcript(&self, role: TranscriptRole, text: &str) {
        println!("[{role}] {text}");
    }

    fn on_response_done(&self, _response_id: &str, outcome: ResponseOutcome) {
        match outcome {
            ResponseOutcome::Completed => println!(),
            other => println!(" [{other:?}]"),
        }
    }

    fn on_notice(&self, notice: &StatusNotice) {
        println!("[status] {notice}");
    }
}

impl NotificationSink for ConsoleSink {
    fn on_function_executed(&self, result: &FunctionResult, mode: ConversationMode) {
        let status = if result.is_success() { "ok" } else { "failed" };
        println!("[function] {} {status} (mode: {mode})", result.name);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let mut config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        AgentConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        AgentConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let capabilities = Capabilities::new();
    let registry = capabilities
        .build_registry(config.handler_timeout())
        .map_err(|e| anyhow!("Failed to register capabilities: {}", e))?;

    if let Some(Commands::Capabilities) = cli.command {
        let schemas = serde_json::to_string_pretty(&registry.capability_schemas())?;
        println!("{schemas}");
        return Ok(());
    }

    if cli.loopback {
        config.provider = RealtimeProvider::Loopback;
    }
    if let Some(mode) = cli.mode {
        config.input_mode = mode;
    }
    config.validate_credentials().map_err(|e| anyhow!(e))?;

    let connector: Arc<dyn RealtimeConnector> = match config.provider {
        RealtimeProvider::OpenAI => {
            let settings = config.openai_settings().map_err(|e| anyhow!(e))?;
            Arc::new(OpenAIRealtime::new(settings)?)
        }
        RealtimeProvider::Loopback => {
            let (connector, peer) = LoopbackConnector::new(64);
            peer.spawn_echo();
            println!("Offline mode: replies are echoed; '{ECHO_CALL_PREFIX}<name> <json>' invokes a capability");
            Arc::new(connector)
        }
    };

    info!(
        provider = %config.provider,
        input_mode = %config.input_mode,
        capabilities = registry.len(),
        "Starting conversation"
    );

    let console = Arc::new(ConsoleSink);
    let conversation = ConversationOrchestrator::new(
        config.orchestrator_config(),
        connector,
        registry,
        default_backend(),
    )
    .with_sink(console.clone())
    .with_notifications(console)
    .start()
    .await?;

    if conversation.is_text_only() {
        println!("Type a message and press enter ('quit' to exit).");
    } else {
        println!("Listening. Speak, or type a message ('quit' to exit).");
    }

    let (input_tx, input_rx) = mpsc::channel(16);
    spawn_input_reader(input_tx);

    let reason = conversation.run(input_rx).await;
    println!("Conversation ended: {reason}");
    Ok(())
}

/// Feed stdin lines and Ctrl+C into the conversation.
fn spawn_input_reader(tx: mpsc::Sender<UserInput>) {
    let ctrl_c_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(UserInput::Exit).await;
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let input = match line.trim().to_lowercase().as_str() {
                "quit" | "exit" | "q" => UserInput::Exit,
                _ => UserInput::Text(line),
            };
            let exit = matches!(input, UserInput::Exit);
            if tx.send(input).await.is_err() || exit {
                break;
            }
        }
    });
}
