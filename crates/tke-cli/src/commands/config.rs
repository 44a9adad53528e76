//! Config command

use std::path::PathBuf;

use clap::Args;

use tke_common::config::EngineConfig;

use super::{render, OutputFormat};
use crate::Result;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Engine config file; falls back to $TKE_ENGINE_CONFIG, then defaults
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    let config = EngineConfig::resolve(args.config.as_deref())?;
    print!("{}", render(&config, args.output)?);
    Ok(())
}
