//! # codemend CLI
//!
//! ```bash
//! codemend --config ./config/codemend.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codemend init` | Create the SQLite database and run schema migrations |
//! | `codemend index <owner/repo>` | Index a repository revision |
//! | `codemend reconstruct <owner/repo> <path> --revision <sha>` | Print a file rebuilt from its chunks |
//! | `codemend retrieve <owner/repo> "<task>"` | List the files relevant to a task |
//! | `codemend run <owner/repo> "<task>"` | Propose, verify and open a pull request |
//! | `codemend completions <shell>` | Print shell completions |

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use codemend::pipeline::RunOptions;
use codemend::{config, ingest, migrate, pipeline, retrieve};

/// codemend: retrieval-augmented code edits as pull requests.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/codemend.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "codemend",
    about = "Index a repository and turn natural-language tasks into verified pull requests",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/codemend.toml")]
    config: PathBuf,

    /// Log at debug level. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and its tables. Safe to run
    /// repeatedly.
    Init,

    /// Index a repository at a revision.
    ///
    /// Walks the repository tree, chunks every file matching
    /// `[indexing] include_globs`, and stores the chunks. A revision that
    /// is already indexed is not walked again.
    Index {
        /// Repository as `owner/name`.
        repo: String,

        /// Commit to index. Defaults to the head of the default branch.
        #[arg(long)]
        revision: Option<String>,
    },

    /// Print an indexed file rebuilt from its chunks.
    Reconstruct {
        /// Repository as `owner/name`.
        repo: String,

        /// Repository-relative file path.
        path: String,

        /// Indexed commit.
        #[arg(long)]
        revision: String,
    },

    /// List the files relevant to a task, indexing first if needed.
    Retrieve {
        /// Repository as `owner/name`.
        repo: String,

        /// Natural-language task description.
        task: String,

        #[arg(long)]
        revision: Option<String>,
    },

    /// Run the full pipeline and open a pull request.
    Run {
        /// Repository as `owner/name`.
        repo: String,

        /// Natural-language task description.
        task: String,

        /// Stop after verification; print the accepted edits only.
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        revision: Option<String>,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default.as_str()));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "codemend", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { repo, revision } => {
            ingest::run_index(&cfg, &repo, revision).await?;
        }
        Commands::Reconstruct { repo, path, revision } => {
            retrieve::run_reconstruct(&cfg, &repo, &path, &revision).await?;
        }
        Commands::Retrieve { repo, task, revision } => {
            retrieve::run_retrieve(&cfg, &repo, &task, revision).await?;
        }
        Commands::Run {
            repo,
            task,
            dry_run,
            revision,
        } => {
            pipeline::run_task(&cfg, &repo, &task, RunOptions { revision, dry_run }).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
