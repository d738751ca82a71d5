mod commands;
mod ui;

use anyhow::Result;
use askerp::config::{load_config, Config, LogFormat};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "askerp",
    version,
    about = "Ask your ERP in plain words",
    after_help = "Examples:\n  askerp ask \"top 10 customers this year\"\n  askerp ask --dry-run \"create a workflow for leave approval\"\n  askerp presets"
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    #[command(about = "Answer a question or run a command")]
    Ask {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[arg(long, help = "Run read-only steps only; report what writes would do")]
        dry_run: bool,
        #[arg(short, long, help = "Confirm structural changes without prompting")]
        yes: bool,
        #[arg(long, help = "Emit the execution result as JSON")]
        json: bool,
    },
    #[command(about = "Show the plan for a command without running it")]
    Plan {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "List curated management questions")]
    Presets {
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Show month-to-date sales and purchases against last month")]
    Metrics {
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Check the model backend, store, docs and config")]
    Doctor,
    #[command(about = "Edit the config file")]
    Config {
        #[arg(long, help = "Print the config instead of opening an editor")]
        show: bool,
    },
    #[command(about = "Load demo business data into the store")]
    Seed,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    init_logging(&config);

    match cli.command {
        Cmd::Ask { text, dry_run, yes, json } => commands::cmd_ask(&config, &text.join(" "), dry_run, yes, json),
        Cmd::Plan { text, json } => commands::cmd_plan(&config, &text.join(" "), json),
        Cmd::Presets { json } => commands::cmd_presets(json),
        Cmd::Metrics { json } => commands::cmd_metrics(&config, json),
        Cmd::Doctor => commands::cmd_doctor(&config),
        Cmd::Config { show } => commands::cmd_config(show),
        Cmd::Seed => commands::cmd_seed(&config),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("askerp: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
