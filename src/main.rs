//! # Extract Harness CLI (`xh`)
//!
//! Runs the multi-channel extraction pipeline from the command line and
//! serves the HTTP API used by the review front-end.
//!
//! ## Usage
//!
//! ```bash
//! xh --config ./config/xh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `xh serve` | Start the HTTP API server |
//! | `xh create-task` | Allocate a new task id |
//! | `xh upload <task> <file>` | Add a document to a task |
//! | `xh documents <task>` | List a task's documents |
//! | `xh run <task>` | Run the extraction channels for a task |
//! | `xh locate <task>` | Map markdown-channel values onto page boxes |
//! | `xh results <task>` | Print the aggregated multi-channel results |
//! | `xh extract-json <file>` | Recover JSON from a saved model answer |
//!
//! ## Examples
//!
//! ```bash
//! TASK=$(xh create-task)
//! xh upload "$TASK" ./scans/invoice.pdf
//! xh run "$TASK" --schema ./schema/invoice.json --strategy markdown
//! xh results "$TASK"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use extract_harness::config::{self, Config};
use extract_harness::provider::create_provider;
use extract_harness::{commands, server};

/// Extract Harness: structured data extraction from documents through
/// several model channels side by side.
#[derive(Parser)]
#[command(
    name = "xh",
    about = "Extract Harness: multi-channel structured extraction from documents",
    version,
    long_about = "Extract Harness runs each uploaded document through several extraction \
    channels (vision model over page images, chat model over OCR markdown), keeps every \
    channel's JSON answer, maps extracted values back onto page boxes, and serves the \
    results to a reviewer over HTTP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/xh.toml`. When the file does not exist, built-in
    /// defaults rooted at the current directory are used.
    #[arg(long, global = true, default_value = "./config/xh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,

    /// Create a new, empty task and print its id.
    CreateTask,

    /// Add a document to a task.
    Upload {
        /// Task id.
        task: String,
        /// Document to upload.
        file: PathBuf,
    },

    /// List a task's documents.
    Documents {
        /// Task id.
        task: String,
    },

    /// Run the extraction channels for a task.
    ///
    /// Channels whose result file already exists are not re-run.
    Run {
        /// Task id.
        task: String,

        /// JSON schema file; defaults to the task's stored schema.
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Strategy to run (`multi-modal`, `markdown`); repeatable.
        /// Defaults to `[channels].strategies`.
        #[arg(long = "strategy")]
        strategies: Vec<String>,
    },

    /// Map the markdown channel's values onto page boxes.
    Locate {
        /// Task id.
        task: String,
    },

    /// Print the aggregated multi-channel results as JSON.
    Results {
        /// Task id.
        task: String,
    },

    /// Recover a JSON value from a saved model answer.
    ExtractJson {
        /// File holding the raw model output.
        file: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("extract_harness=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_or_default(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal(&std::env::current_dir()?))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    if let Commands::ExtractJson { file } = &cli.command {
        return commands::run_extract_json(file);
    }

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let provider = create_provider(&cfg.provider)?;
            server::run_server(&cfg, provider).await?;
        }
        Commands::CreateTask => commands::run_create_task(&cfg)?,
        Commands::Upload { task, file } => commands::run_upload(&cfg, &task, &file)?,
        Commands::Documents { task } => commands::run_documents(&cfg, &task)?,
        Commands::Run {
            task,
            schema,
            strategies,
        } => {
            let provider = create_provider(&cfg.provider)?;
            commands::run_extraction(&cfg, provider, &task, schema.as_deref(), &strategies)
                .await?;
        }
        Commands::Locate { task } => commands::run_locate(&cfg, &task)?,
        Commands::Results { task } => commands::run_results(&cfg, &task)?,
        Commands::ExtractJson { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
