//! CLI entrypoint for the scopestack harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use scopestack_core::structured_log::validate_log_file;
use scopestack_harness::{RunOptions, Scenario, scenario};

/// Cleanup-scenario tooling for scopestack.
#[derive(Debug, Parser)]
#[command(name = "scopestack-harness")]
#[command(about = "Scenario runner and event-log validator for scopestack")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one named scenario. Releases are printed as they happen.
    Scenario {
        #[arg(value_enum)]
        name: Scenario,
        /// Fixed "This might help" text instead of the OS error text.
        #[arg(long)]
        last_error: Option<String>,
        /// Print a JSON summary line after the scenario returns.
        #[arg(long)]
        json: bool,
    },
    /// List scenario names.
    List,
    /// Validate a structured JSONL event log.
    ValidateLog {
        /// Log file path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scenario {
            name,
            last_error,
            json,
        } => {
            let outcome = scenario::run(name, &RunOptions { last_error })?;
            if json {
                println!("{}", serde_json::to_string(&outcome)?);
            }
        }
        Command::List => {
            for scenario in Scenario::ALL {
                let marker = if scenario.is_fatal() { " (fatal)" } else { "" };
                println!("{}{marker}", scenario.name());
            }
        }
        Command::ValidateLog { log } => match validate_log_file(&log) {
            Ok(lines) => {
                println!(
                    "{}",
                    serde_json::json!({ "ok": true, "lines": lines, "violations": [] })
                );
            }
            Err(errors) => {
                let violations: Vec<String> = errors.iter().map(ToString::to_string).collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "violation_count": violations.len(),
                        "violations": violations,
                    })
                );
                return Err(format!("{} invalid log line(s) in {}", errors.len(), log.display()).into());
            }
        },
    }

    Ok(())
}
