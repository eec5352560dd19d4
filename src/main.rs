use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use itertools::Itertools;
use rustyline::{error::ReadlineError, Editor};
use structopt::StructOpt;
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use insight::{parse_command, Command, DatasetKind, FacadeConfig, InsightFacade};

const HELP: &str = "\
add <id> <kind> <path>   load a .tar.gz dataset archive
remove <id>              drop a dataset
list                     show loaded datasets
query <json>             run a query
exit                     leave the shell";

#[derive(Debug, StructOpt)]
#[structopt(name = "insight", about = "Load course datasets and query them")]
struct Opt {
    /// SQLite file that keeps datasets across runs
    #[structopt(long, parse(from_os_str))]
    snapshot: Option<PathBuf>,

    /// Largest result a query may return
    #[structopt(long, default_value = "5000")]
    max_rows: usize,

    /// Commands to run before the prompt, one per line
    #[structopt(long, parse(from_os_str))]
    script: Option<PathBuf>,

    /// File that keeps the prompt's line history across runs
    #[structopt(long, parse(from_os_str))]
    history: Option<PathBuf>,
}

enum Outcome {
    Print(String),
    Exit,
}

fn handle_input(runtime: &Runtime, facade: &InsightFacade, line: &str) -> Result<Outcome> {
    let output = match parse_command(line)? {
        Command::Add { id, kind, path } => {
            let kind: DatasetKind = kind.parse()?;
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let content = general_purpose::STANDARD.encode(bytes);
            let ids = runtime.block_on(facade.add_dataset(&id, &content, kind))?;
            ids.iter().join(", ")
        }
        Command::Remove { id } => runtime.block_on(facade.remove_dataset(&id))?,
        Command::List => runtime
            .block_on(facade.list_datasets())?
            .iter()
            .map(|dataset| format!("{}\t{}\t{}", dataset.id, dataset.kind, dataset.num_rows))
            .join("\n"),
        Command::Query(json) => {
            let query = serde_json::from_str(&json).context("Query is not valid JSON")?;
            let rows = runtime.block_on(facade.perform_query(&query))?;
            serde_json::to_string_pretty(&rows)?
        }
        Command::Help => HELP.to_owned(),
        Command::Exit => return Ok(Outcome::Exit),
    };
    Ok(Outcome::Print(output))
}

/// Runs one line, reporting errors without stopping. Returns false on exit.
fn run_line(runtime: &Runtime, facade: &InsightFacade, line: &str) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    match handle_input(runtime, facade, line) {
        Ok(Outcome::Print(output)) => {
            println!("{}", output);
            true
        }
        Ok(Outcome::Exit) => false,
        Err(e) => {
            println!("Error: {:#}", e);
            true
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::from_args();
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let facade = InsightFacade::with_config(FacadeConfig {
        snapshot: opt.snapshot,
        max_result_rows: opt.max_rows,
    })?;

    if let Some(script) = &opt.script {
        let script = std::fs::read_to_string(script)
            .with_context(|| format!("Failed to read {}", script.display()))?;
        for line in script.lines() {
            if !run_line(&runtime, &facade, line) {
                return Ok(());
            }
        }
    }

    let mut editor = Editor::<()>::new();
    if let Some(history) = &opt.history {
        // A missing file just means a first run.
        if let Err(err) = editor.load_history(history) {
            debug!(path = %history.display(), %err, "no history loaded");
        }
    }

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                editor.add_history_entry(line.as_str());
                if !run_line(&runtime, &facade, &line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {}", err);
                break;
            }
        }
    }

    if let Some(history) = &opt.history {
        editor
            .save_history(history)
            .with_context(|| format!("Failed to save history to {}", history.display()))?;
    }

    Ok(())
}
