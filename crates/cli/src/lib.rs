pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::cleanup::CleanupMode;

#[derive(Debug, Parser)]
#[command(
    name = "portline",
    about = "Portline operator CLI",
    long_about = "Operate Portline readiness, migrations, config inspection, and conversation data retention.",
    after_help = "Examples:\n  portline doctor --json\n  portline config\n  portline cleanup --stats"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(
        about = "Validate config, encryption key, model and service endpoints, and DB readiness"
    )]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Purge sensitive conversation data past the retention window")]
    Cleanup {
        #[arg(long, conflicts_with = "conversation", help = "Report what a sweep would touch")]
        stats: bool,
        #[arg(long, value_name = "KEY", help = "Purge a single conversation regardless of age")]
        conversation: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Cleanup { stats, conversation } => {
            let mode = match (stats, conversation) {
                (_, Some(key)) => CleanupMode::Conversation(key),
                (true, None) => CleanupMode::Stats,
                (false, None) => CleanupMode::Sweep,
            };
            commands::cleanup::run(mode)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
