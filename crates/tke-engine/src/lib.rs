//! Convergence engine for TKE managed Kubernetes clusters
//!
//! Given a desired-state document and the observed state left by the previous
//! run, the engine plans the remote mutations that close the gap and applies
//! them one at a time, waiting for each to settle.
//!
//! - [`planner`]: pure diff of desired against observed state
//! - [`orchestrator`]: sequential application with barriers and compensation
//! - [`poller`]: deadline-bounded status polling
//! - [`classify`]: per-call interpretation of remote error codes
//! - [`client`]: the RPC trait implementations plug into
//!
//! Related crates:
//! - `tke-common`: state documents, phases, errors, configuration

#![deny(missing_docs)]

pub mod classify;
pub mod client;
pub mod orchestrator;
pub mod planner;
pub mod poller;

pub use classify::{retry_call, Applied, Classifier, Outcome};
pub use client::{EndpointKind, TkeApi, UpgradeType};
pub use orchestrator::{ConvergeError, Orchestrator};
pub use planner::{plan, Operation, OperationKind, Stage};
pub use poller::{Goal, PollResult, Poller};

// Re-export common types
pub use tke_common::phase as phases;
pub use tke_common::{Error, RemoteError, Result};
