//! Validate command

use std::path::PathBuf;

use clap::Args;
use tracing::debug;

use super::load_desired;
use crate::Result;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Desired-state documents to check
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    for file in &args.files {
        let desired = load_desired(file)?;
        desired.validate()?;
        debug!(path = %file.display(), cluster = %desired.cluster.name, "Document valid");
        println!("  {} valid", file.display());
    }
    Ok(())
}
