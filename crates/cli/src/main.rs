//! picoagent CLI — the main entry point.
//!
//! Exit codes: 0 success, 1 user error, 2 config error, 3 provider
//! unreachable.

use clap::{Parser, Subcommand};

mod commands;

pub(crate) enum CliError {
    /// Bad input or missing target (exit 1)
    User(String),
    /// Unreadable or invalid configuration (exit 2)
    Config(String),
    /// No provider reachable when one is required (exit 3)
    Provider(String),
}

pub(crate) type CliResult = Result<(), CliError>;

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::User(_) => 1,
            CliError::Config(_) => 2,
            CliError::Provider(_) => 3,
        }
    }

    fn message(&self) -> &str {
        match self {
            CliError::User(m) | CliError::Config(m) | CliError::Provider(m) => m,
        }
    }
}

impl From<picoagent_config::ConfigError> for CliError {
    fn from(e: picoagent_config::ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

#[derive(Parser)]
#[command(
    name = "picoagent",
    about = "picoagent — entropy-gated personal assistant runtime",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration, workspace, and skills directory
    Onboard,

    /// Chat with the agent
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List known provider specs
    Providers,

    /// List registered tools
    Tools,

    /// Diagnose configuration, workspace, memory, and provider health
    Doctor,

    /// Remove old or decayed memory records
    PruneMemory {
        /// Remove records older than this many days
        #[arg(long)]
        older_than: Option<f64>,

        /// Remove records whose decay weight fell below this floor
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Show the adaptive threshold state
    ThresholdStats,

    /// Print one session as JSON
    ExportSession { id: String },

    /// Import a session from a JSON file
    ImportSession { file: String },

    /// Re-scan the skills directory and report what loaded
    ReloadSkills,
}

// One logical event loop: the turn state machine relies on per-session
// serialization, so the runtime stays single-threaded.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Onboard => commands::onboard::run().await,
        Commands::Agent { message } => commands::agent::run(message).await,
        Commands::Providers => commands::providers::run().await,
        Commands::Tools => commands::tools::run().await,
        Commands::Doctor => commands::doctor::run().await,
        Commands::PruneMemory { older_than, min_score } => {
            commands::memory::prune(older_than, min_score).await
        }
        Commands::ThresholdStats => commands::threshold::run().await,
        Commands::ExportSession { id } => commands::sessions::export(&id).await,
        Commands::ImportSession { file } => commands::sessions::import(&file).await,
        Commands::ReloadSkills => commands::skills::reload().await,
    };

    if let Err(e) = result {
        eprintln!("error: {}", e.message());
        std::process::exit(e.exit_code());
    }
}
