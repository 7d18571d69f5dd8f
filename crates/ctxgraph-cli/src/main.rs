//! Context graph CLI.
//!
//! Provides the `ctxgraph` binary for moving serialized graphs in and out of
//! a SQLite store and checking them.
//!
//! Reads configuration from the environment when not given on the command
//! line:
//! - `CTXGRAPH_DB_PATH`: SQLite database file path (default: "ctxgraph.db")
//!
//! Exit codes: 0 = success, 1 = rejected graph, 2 = `check` found
//! violations, 3 = I/O or storage error.

mod commands;

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use ctxgraph_core::NodeId;
use ctxgraph_storage::{GraphId, SqliteStore};

use crate::commands::{CliError, EXIT_VIOLATIONS};

/// Field propagation graph tools.
#[derive(Parser)]
#[command(name = "ctxgraph", about = "Context graph storage and checks")]
struct Cli {
    /// Path to the graph database file.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a serialized graph from a JSON file.
    Import {
        #[arg(short, long)]
        file: PathBuf,

        /// Name for the stored graph (default: the file stem).
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Export a stored graph as JSON.
    Export {
        #[arg(short, long)]
        graph: i64,

        /// Output file (default: stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List stored graphs.
    List,
    /// Print node fields as JSON.
    Inspect {
        #[arg(short, long)]
        graph: i64,

        /// Only this node.
        #[arg(short, long)]
        node: Option<u32>,
    },
    /// Validate a stored graph.
    Check {
        #[arg(short, long)]
        graph: i64,
    },
}

fn main() {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let db_path = cli
        .db
        .or_else(|| std::env::var("CTXGRAPH_DB_PATH").ok())
        .unwrap_or_else(|| "ctxgraph.db".to_string());

    match run(&db_path, cli.command) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run(db_path: &str, command: Commands) -> Result<i32, CliError> {
    let mut store = SqliteStore::new(db_path)?;
    let mut stdout = io::stdout().lock();

    match command {
        Commands::Import { file, name } => {
            commands::import_file(&mut store, &file, name.as_deref(), &mut stdout)?;
        }
        Commands::Export { graph, out } => {
            let mut sink: Box<dyn Write> = match out {
                Some(path) => Box::new(File::create(path)?),
                None => Box::new(stdout),
            };
            commands::export(&store, GraphId(graph), &mut sink)?;
        }
        Commands::List => commands::list(&store, &mut stdout)?,
        Commands::Inspect { graph, node } => {
            commands::inspect(&store, GraphId(graph), node.map(NodeId), &mut stdout)?;
        }
        Commands::Check { graph } => {
            if !commands::check(&store, GraphId(graph), &mut stdout)? {
                return Ok(EXIT_VIOLATIONS);
            }
        }
    }
    Ok(0)
}
