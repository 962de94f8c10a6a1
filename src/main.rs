//! # Case Knowledge CLI (`casekb`)
//!
//! ## Usage
//!
//! ```bash
//! casekb --config ./config/casekb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `casekb init` | Create the SQLite database and run schema migrations |
//! | `casekb case create` | Ingest documents, audio and images into a new case |
//! | `casekb case list` | List cases, newest first |
//! | `casekb case show <id>` | Show a case's files, content and tasks |
//! | `casekb case delete <id>` | Cascade-delete a case from every store |
//! | `casekb query "<text>"` | Answer a question from indexed records, with citations |
//! | `casekb tasks` | Task totals and high-priority tasks |
//! | `casekb file url <id>` | Signed URL for a stored file |
//! | `casekb file download <id>` | Download a stored file |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use case_knowledge::{cli, config};
use tracing_subscriber::EnvFilter;

/// Case Knowledge: case-scoped ingestion, retrieval and task extraction
/// for construction site records.
#[derive(Parser)]
#[command(name = "casekb", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/casekb.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent, so running it multiple times is safe.
    Init,

    /// Create, inspect and delete cases.
    Case {
        #[command(subcommand)]
        action: CaseAction,
    },

    /// Answer a question from the indexed case records.
    Query {
        /// The question.
        text: String,

        /// Restrict retrieval to one case.
        #[arg(long = "case")]
        case_id: Option<String>,
    },

    /// Summarize generated tasks.
    Tasks {
        /// Restrict to one case.
        #[arg(long = "case")]
        case_id: Option<String>,
    },

    /// Access stored files.
    File {
        #[command(subcommand)]
        action: FileAction,
    },
}

#[derive(Subcommand)]
enum CaseAction {
    /// Create a case from uploaded files and extract tasks.
    ///
    /// Prints the per-file outcomes and the task summary as JSON.
    Create {
        /// Document to ingest (PDF, DOCX, PPTX, XLSX, TXT, MD). Repeatable.
        #[arg(long = "doc")]
        docs: Vec<PathBuf>,

        /// Audio recording to transcribe. Repeatable.
        #[arg(long)]
        audio: Vec<PathBuf>,

        /// Site photo to caption. Repeatable.
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },

    /// List cases, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show a case's files, reconstructed content and tasks.
    Show {
        /// Case UUID.
        id: String,
    },

    /// Delete a case from the registry, object storage and the index.
    ///
    /// Exits non-zero if any step of the cascade failed.
    Delete {
        /// Case UUID.
        id: String,
    },
}

#[derive(Subcommand)]
enum FileAction {
    /// Print a signed, time-limited URL for a stored file.
    Url {
        /// File UUID.
        id: String,

        /// Lifetime in seconds (defaults to `storage.signed_url_ttl_secs`).
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Download a stored file.
    Download {
        /// File UUID.
        id: String,

        /// Output path (defaults to the original filename).
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let cfg = config::load_config(&args.config)?;

    match args.command {
        Commands::Init => cli::run_init(&cfg).await?,
        Commands::Case { action } => match action {
            CaseAction::Create {
                docs,
                audio,
                images,
            } => cli::run_case_create(&cfg, &docs, &audio, &images).await?,
            CaseAction::List { limit, offset } => cli::run_case_list(&cfg, limit, offset).await?,
            CaseAction::Show { id } => cli::run_case_show(&cfg, &id).await?,
            CaseAction::Delete { id } => {
                if !cli::run_case_delete(&cfg, &id).await? {
                    return Ok(ExitCode::FAILURE);
                }
            }
        },
        Commands::Query { text, case_id } => cli::run_query(&cfg, &text, case_id).await?,
        Commands::Tasks { case_id } => cli::run_tasks(&cfg, case_id).await?,
        Commands::File { action } => match action {
            FileAction::Url { id, ttl } => cli::run_file_url(&cfg, &id, ttl).await?,
            FileAction::Download { id, out } => cli::run_file_download(&cfg, &id, out).await?,
        },
    }

    Ok(ExitCode::SUCCESS)
}
