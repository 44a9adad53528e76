//! Plan command
//!
//! Diffs a desired-state document against an observed-state document (or
//! against nothing, for a cluster that does not exist yet) and prints the
//! operations a convergence run would apply, in order.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use tke_engine::{plan, Operation};

use super::{load_desired, load_observed, render, OutputFormat};
use crate::Result;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Desired-state document
    #[arg(long, short)]
    pub desired: PathBuf,

    /// Observed state written by the previous run; omit for a new cluster
    #[arg(long, short)]
    pub observed: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

pub fn run(args: PlanArgs) -> Result<()> {
    let ops = compute(&args)?;
    info!(operations = ops.len(), "Plan computed");
    print!("{}", format_plan(&ops, args.output)?);
    Ok(())
}

fn compute(args: &PlanArgs) -> Result<Vec<Operation>> {
    let desired = load_desired(&args.desired)?;
    let observed = args.observed.as_deref().map(load_observed).transpose()?;
    Ok(plan(&desired, observed.as_ref())?)
}

fn format_plan(ops: &[Operation], format: OutputFormat) -> Result<String> {
    if format != OutputFormat::Text {
        return render(&ops, format);
    }
    if ops.is_empty() {
        return Ok("No changes. Cluster matches the desired state.\n".to_string());
    }
    Ok(ops
        .iter()
        .enumerate()
        .map(|(i, op)| format!("{:>3}. [{:?}] {}\n", i + 1, op.stage(), op))
        .collect())
}
