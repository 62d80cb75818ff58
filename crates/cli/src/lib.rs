pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "pgben",
    about = "PGBen operator CLI",
    long_about = "Operate the PGBen approval and benefit-request engines: migrations, config \
                  inspection, escalation ticks, policy and workflow definition checks.",
    after_help = "Examples:\n  pgben migrate\n  pgben tick --at 2026-05-04T12:00:00Z\n  \
                  pgben validate-workflow flows/auxilio.toml --register"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Run one escalation pass: expire due approvals and flag overdue stages")]
    Tick {
        #[arg(long, help = "Evaluate deadlines as of this RFC3339 instant instead of now")]
        at: Option<String>,
    },
    #[command(about = "Check stored approval policies against their current approver pools")]
    ValidatePolicies,
    #[command(about = "Validate a TOML workflow definition and optionally register it")]
    ValidateWorkflow {
        #[arg(help = "Path to the workflow definition file")]
        path: PathBuf,
        #[arg(long, help = "Store the definition after it validates")]
        register: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Tick { at } => commands::tick::run(at),
        Command::ValidatePolicies => commands::validate_policies::run(),
        Command::ValidateWorkflow { path, register } => {
            commands::validate_workflow::run(&path, register)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
