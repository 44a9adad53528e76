//! Shared vocabulary for the TKE convergence engine: state documents, phases,
//! errors, and configuration

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod phase;
pub mod retry;
pub mod state;
pub mod telemetry;

pub use error::{Error, RemoteError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
