pub mod commands;
pub mod runtime;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "askwell",
    about = "Askwell operator CLI",
    long_about = "Ask business questions, inspect classification, and check runtime readiness.",
    after_help = concat!(
        "Examples:\n",
        "  askwell ask \"Which kit has the fewest parts?\"\n",
        "  askwell classify \"Our equivalent of HX-100?\"\n",
        "  askwell doctor --json"
    )
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to an askwell.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Classify and answer one question against the configured warehouse")]
    Ask {
        question: String,
        #[arg(long, help = "Emit the full tool chain result as JSON")]
        json: bool,
    },
    #[command(about = "Show how a question would be classified without executing it")]
    Classify { question: String },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity, persona catalogue, and LLM client setup")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Command::Ask { question, json } => commands::ask::run(config_path, &question, json),
        Command::Classify { question } => commands::classify::run(config_path, &question),
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(config_path.as_deref()),
        },
        Command::Doctor { json } => commands::CommandResult {
            exit_code: 0,
            output: commands::doctor::run(config_path, json),
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
