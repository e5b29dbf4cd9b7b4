//! `fleet`: manage CTF challenge images and their container fleets.
//!
//! Three entry modes share one command language: an interactive REPL (the
//! default), `script <file>` replay, and `command <tokens...>` one-shots.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleet_core::{AssumeYes, CommandTree, FleetConfig, FleetManager, Prompter};
use fleet_runtime::DockerRuntime;
use tracing::info;

mod args;

#[derive(Parser)]
#[command(name = "fleet", version, about = "CTF challenge fleet manager")]
struct Cli {
    /// Directory holding build contexts, deploy bundles and the fleet
    /// snapshot.
    #[arg(long, default_value = "runtime")]
    state_dir: PathBuf,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Replay commands from a file; `#` lines and blank lines are skipped.
    Script { file: PathBuf },
    /// Execute a single command and exit.
    Command {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
    },
}

/// Asks on stdout, reads the answer from stdin. Anything but `y`/`yes`
/// declines.
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, question: &str) -> bool {
        print!("{question} [y/N] ");
        let _ = io::stdout().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let script_mode = matches!(cli.mode, Some(Mode::Script { .. }));

    let runtime = Arc::new(DockerRuntime::connect().await?);
    let mut config = FleetConfig::with_state_dir(cli.state_dir);
    config.script_mode = script_mode;

    let prompter: Box<dyn Prompter> = if script_mode {
        Box::new(AssumeYes)
    } else {
        Box::new(StdinPrompter)
    };
    let mut manager = FleetManager::new(config, runtime, prompter);
    manager.load().await?;

    match cli.mode {
        None => repl(&mut manager).await,
        Some(Mode::Script { file }) => script(&mut manager, &file).await,
        Some(Mode::Command { tokens }) => {
            let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
            dispatch(&mut manager, &CommandTree::standard(), &tokens).await
        }
    }
}

async fn repl(manager: &mut FleetManager) -> Result<()> {
    let tree = CommandTree::standard();
    let stdin = io::stdin();
    loop {
        print!("fleet> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if matches!(tokens.as_slice(), ["exit"] | ["quit"]) {
            break;
        }
        if let Err(e) = dispatch(manager, &tree, &tokens).await {
            eprintln!("error: {e}");
        }
    }
    Ok(())
}

async fn script(manager: &mut FleetManager, file: &PathBuf) -> Result<()> {
    let tree = CommandTree::standard();
    let content = fs::read_to_string(file)?;
    info!(script = %file.display(), "replaying command script");
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        println!("fleet> {line}");
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if let Err(e) = dispatch(manager, &tree, &tokens).await {
            eprintln!("error: {e}");
        }
    }
    Ok(())
}

async fn dispatch(
    manager: &mut FleetManager,
    tree: &CommandTree,
    tokens: &[&str],
) -> Result<()> {
    let Some((op, offset)) = tree.resolve(tokens)? else {
        return Ok(());
    };
    let command = args::parse(op, &tokens[offset..])?;
    if let Some(output) = manager.execute(command).await? {
        print!("{output}");
    }
    Ok(())
}
