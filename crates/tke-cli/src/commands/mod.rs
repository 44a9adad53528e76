//! CLI commands

use std::path::Path;

use clap::ValueEnum;
use serde::Serialize;

use tke_common::state::{DesiredState, ObservedState};

use crate::{Error, Result};

pub mod config;
pub mod plan;
pub mod validate;

/// How structured output is rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per item
    #[default]
    Text,
    Yaml,
    Json,
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::read(path, e))
}

/// Load a desired-state document without validating it
pub fn load_desired(path: &Path) -> Result<DesiredState> {
    Ok(DesiredState::from_yaml_str(&read(path)?)?)
}

/// Load an observed-state document written by a previous run
pub fn load_observed(path: &Path) -> Result<ObservedState> {
    Ok(ObservedState::from_yaml_str(&read(path)?)?)
}

/// Render `value` as YAML or pretty JSON
pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml | OutputFormat::Text => Ok(serde_yaml::to_string(value)?),
    }
}
