use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod http;

#[derive(Parser)]
#[command(name = "worktally", version, about = "Azure DevOps effort tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass over every tracked work item
    Tick,
    /// Start tracking work items and initialize them remotely
    Connect {
        /// Work item ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Stop accruing time for work items
    Pause {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Resume accruing time for work items
    Resume {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Make one work item the only running one
    Focus { id: String },
    /// Print every tracking record as JSON
    Status,
    /// Print recent effort applications
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Process a service-hook payload from a file (`-` for stdin)
    Webhook { source: String },
    /// Serve the webhook and control API and run the periodic tick
    Serve,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Tick => commands::tick::run().await,
        Commands::Connect { ids } => commands::tracking::connect(ids).await,
        Commands::Pause { ids } => commands::tracking::set_running(ids, false),
        Commands::Resume { ids } => commands::tracking::set_running(ids, true),
        Commands::Focus { id } => commands::tracking::focus(&id),
        Commands::Status => commands::tracking::status(),
        Commands::History { limit } => commands::tracking::history(limit),
        Commands::Webhook { source } => commands::webhook::run(&source).await,
        Commands::Serve => commands::serve::run().await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
