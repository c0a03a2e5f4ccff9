//! # FLIPFLOPS CLI (`flipflops`)
//!
//! ## Usage
//!
//! ```bash
//! flipflops --config ./config/flipflops.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `flipflops init` | Create the data directories and a default config |
//! | `flipflops ingest` | Index the documents root (`--reindex` for a full rebuild) |
//! | `flipflops chat` | Interactive study session |
//! | `flipflops ask <command>` | Run one command and print the reply |
//! | `flipflops completions <shell>` | Print shell completions |
//!
//! ```bash
//! flipflops init
//! flipflops ingest
//! flipflops ask pergunta O que é fotossíntese?
//! flipflops chat --session estudo
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use flipflops::app::App;
use flipflops::config::{self, Config};
use flipflops::model::api_key_status;
use flipflops::repl;
use flipflops::store::DataStore;

/// FLIPFLOPS: a study assistant that answers from your own material.
#[derive(Parser)]
#[command(
    name = "flipflops",
    about = "FLIPFLOPS: retrieval-augmented study assistant for entrance exam preparation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/flipflops.toml")]
    config: PathBuf,

    /// Log level used when FLIPFLOPS_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory layout and write a default config file.
    ///
    /// Existing files are left untouched, so running it twice is safe.
    Init,

    /// Index the documents root.
    ///
    /// Unchanged documents are skipped and removed files leave the index.
    Ingest {
        /// Re-embed everything and swap the new index in at once.
        #[arg(long)]
        reindex: bool,
    },

    /// Start an interactive study session.
    Chat {
        /// Session id; conversations are stored per id.
        #[arg(long, default_value = "default")]
        session: String,

        /// Rebuild the index before starting.
        #[arg(long)]
        reindex: bool,
    },

    /// Run a single command, e.g. `ask tópicos` or `ask pergunta O que é DNA?`.
    Ask {
        #[arg(long, default_value = "default")]
        session: String,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("flipflops error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "flipflops", &mut std::io::stdout());
            Ok(())
        }
        Commands::Init => init(&cli.config),
        Commands::Ingest { reindex } => {
            let cfg = config::load_or_default(&cli.config)?;
            let mut app = App::build(cfg)?;
            let report = app.ingest(reindex).await?;
            report.print();
            Ok(())
        }
        Commands::Chat { session, reindex } => {
            let cfg = config::load_or_default(&cli.config)?;
            let mut app = App::build(cfg)?;
            app.prepare(reindex).await?;
            repl::run(&app.router, &session).await
        }
        Commands::Ask { session, command } => {
            let cfg = config::load_or_default(&cli.config)?;
            let mut app = App::build(cfg)?;
            app.prepare(false).await?;
            let reply = app.router.handle(&session, &command.join(" ")).await?;
            println!("{}", reply.render());
            Ok(())
        }
    }
}

fn init(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(config_path, config::default_config_toml()?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote default config: {}", config_path.display());
    }

    let cfg: Config = config::load_config(config_path)?;
    let store = DataStore::new(&cfg.data.dir);
    store.ensure_layout()?;
    println!("Data directory ready: {}", store.root().display());
    println!("Put your study material under: {}", cfg.documents_root().display());

    if let Err(e) = api_key_status(&cfg.model) {
        println!("Note: {}; commands that need the language model will fail.", e);
    }
    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("FLIPFLOPS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
