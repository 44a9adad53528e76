//! TKE CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// tke - offline tooling for TKE cluster documents
#[derive(Parser, Debug)]
#[command(name = "tke")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "TKE_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a desired-state document
    Validate(commands::validate::ValidateArgs),
    /// Show the operations that would converge a cluster
    Plan(commands::plan::PlanArgs),
    /// Print the effective engine configuration
    Config(commands::config::ConfigArgs),
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Validate(args) => commands::validate::run(args),
            Commands::Plan(args) => commands::plan::run(args),
            Commands::Config(args) => commands::config::run(args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plan_with_observed_state() {
        let cli = Cli::parse_from([
            "tke",
            "plan",
            "--desired",
            "cluster.yaml",
            "--observed",
            "state.yaml",
            "--output",
            "json",
        ]);
        match cli.command {
            Commands::Plan(args) => {
                assert_eq!(args.desired.to_str(), Some("cluster.yaml"));
                assert_eq!(args.observed.as_deref().and_then(|p| p.to_str()), Some("state.yaml"));
                assert_eq!(args.output, commands::OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn log_format_flag_is_global() {
        let cli = Cli::parse_from(["tke", "validate", "cluster.yaml", "--log-json"]);
        assert!(cli.log_json);
    }
}
