//! Interactive JSONQL shell.
//!
//! ```bash
//! # REPL against the default database file
//! surikov_shell
//!
//! # one batch and exit
//! surikov_shell --path ./data/users.db -c '{"type": "select", "table_name": "users"}'
//! ```
//!
//! A line ending in `\` continues on the next one. Every command prints one JSON
//! value to stdout; logs go to stderr.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use surikov_db::{Command, DataBaseConfig, DataBaseStorage, JsonQlParser};

const HISTORY_FILE: &str = ".surikov_history";

/// JSONQL shell for SurikovDB files
#[derive(Parser, Debug)]
#[command(name = "surikov_shell", version, about)]
struct Args {
    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overrides the configuration
    #[arg(long, value_name = "FILE", env = "SURIKOV_PATH")]
    path: Option<PathBuf>,

    /// Block size in bytes, overrides the configuration
    #[arg(long, env = "SURIKOV_BLOCK_SIZE")]
    block_size: Option<usize>,

    /// Execute a JSONQL document and exit
    #[arg(short = 'c', long)]
    command: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = load_config(&args)?;
    if let Some(parent) = config.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut storage = DataBaseStorage::from_config(&config)
        .with_context(|| format!("failed to open {}", config.path.display()))?;

    match &args.command {
        Some(document) => {
            let ok = execute(&mut storage, document);
            storage.sync()?;
            if !ok {
                anyhow::bail!("command failed");
            }
            Ok(())
        }
        None => repl(&mut storage),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("surikov_db=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<DataBaseConfig> {
    let mut config = match &args.config {
        Some(path) => DataBaseConfig::load(path)?,
        None => DataBaseConfig::default(),
    };
    if let Some(path) = &args.path {
        config.path = path.clone();
    }
    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    config.validate()?;
    Ok(config)
}

/// Parses and runs one document, printing a JSON value per command. Stops at the
/// first failing command.
fn execute(storage: &mut DataBaseStorage, document: &str) -> bool {
    let commands = match JsonQlParser::parse_str(document) {
        Ok(commands) => commands,
        Err(err) => {
            print_json(&json!({"error": err.to_string()}));
            return false;
        }
    };

    for command in commands {
        let command_type = command.command_type();
        match command.run(storage) {
            Ok(output) => {
                let output = output.map_or(Value::Null, |output| output.into_json());
                print_json(&output);
            }
            Err(err) => {
                warn!(command = command_type, %err, "command failed");
                print_json(&json!({"error": err.to_string()}));
                return false;
            }
        }
    }
    true
}

fn print_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(text) => println!("{text}"),
        Err(err) => println!("{{\"error\": {:?}}}", err.to_string()),
    }
}

fn repl(storage: &mut DataBaseStorage) -> Result<()> {
    let mut cli = DefaultEditor::new()?;
    if cli.load_history(HISTORY_FILE).is_err() {
        info!("no history file");
    }

    let mut statement = String::new();
    loop {
        let prompt = if statement.is_empty() { ">>> " } else { "..> " };
        match cli.readline(prompt) {
            Ok(line) => {
                if let Some(continued) = line.strip_suffix('\\') {
                    statement.push_str(continued);
                    statement.push('\n');
                    continue;
                }
                statement.push_str(&line);
                if !statement.trim().is_empty() {
                    execute(storage, &statement);
                    storage.sync()?;
                    cli.add_history_entry(statement.as_str())?;
                }
                statement.clear();
            }
            Err(ReadlineError::Interrupted) => {
                // drop the statement being typed, keep the session
                statement.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    if let Err(err) = cli.save_history(HISTORY_FILE) {
        warn!(%err, "failed to save history");
    }
    Ok(())
}
