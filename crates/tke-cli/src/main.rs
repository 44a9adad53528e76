//! TKE CLI
//!
//! Offline tooling for desired-state and observed-state documents.

use clap::Parser;

use tke_cli::{Cli, Result};
use tke_common::telemetry::{self, TelemetryConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    telemetry::init(TelemetryConfig {
        json: cli.log_json,
        ..TelemetryConfig::default()
    })?;

    cli.run()
}
