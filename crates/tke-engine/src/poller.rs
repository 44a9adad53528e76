//! Bounded status polling
//!
//! A [`Poller`] calls a describe function at a fixed interval until it reports
//! a terminal phase, a fetch error is classified fatal, the timeout elapses, or
//! the run is cancelled. Polling never mutates anything, so a poll can be
//! repeated or abandoned at any point.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tke_common::phase::{Phase, PhaseOutcome};
use tke_common::{Error, RemoteError};

use crate::classify::{Classifier, Outcome};

/// What a wait is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Goal {
    /// The object should exist and settle: terminal on success or failure
    Present,
    /// The object should go away: terminal on absence or failure
    Absent,
}

/// One observation of a remote object.
///
/// Built fresh for every fetch and dropped once the poller has looked at it.
#[derive(Clone, Debug, PartialEq)]
pub struct PollResult<P> {
    /// Whether no further progress is expected
    pub terminal: bool,
    /// Observed phase
    pub phase: P,
    /// Reason attached to the phase
    pub message: String,
}

impl<P: Phase> PollResult<P> {
    /// Interpret `phase` against what the caller is waiting for.
    ///
    /// While waiting for presence, an absent phase is not terminal: the
    /// object may simply not be visible yet.
    pub fn toward(phase: P, message: impl Into<String>, goal: Goal) -> Self {
        let terminal = match (goal, phase.outcome()) {
            (_, PhaseOutcome::Failed) => true,
            (Goal::Present, PhaseOutcome::Succeeded) => true,
            (Goal::Absent, PhaseOutcome::Absent) => true,
            _ => false,
        };
        Self {
            terminal,
            phase,
            message: message.into(),
        }
    }

    /// Whether the wait ended in a failure phase
    pub fn failed(&self) -> bool {
        self.phase.outcome() == PhaseOutcome::Failed
    }
}

/// Why a poll ended without a terminal phase
#[derive(Debug, Error)]
pub enum PollError<P: Phase> {
    /// The timeout elapsed
    #[error("timed out after {elapsed:?}")]
    Timeout {
        /// Time spent polling
        elapsed: Duration,
        /// Last non-terminal phase seen, if any fetch succeeded
        last_phase: Option<P>,
    },

    /// A fetch failed with a fatal error
    #[error("{0}")]
    Remote(#[source] RemoteError),

    /// The run was cancelled
    #[error("cancelled")]
    Cancelled {
        /// Last non-terminal phase seen
        last_phase: Option<P>,
    },
}

impl<P: Phase> PollError<P> {
    /// Last phase seen before the poll ended
    pub fn last_phase(&self) -> Option<&P> {
        match self {
            PollError::Timeout { last_phase, .. } | PollError::Cancelled { last_phase } => {
                last_phase.as_ref()
            }
            PollError::Remote(_) => None,
        }
    }

    /// Attach the step name and convert into the engine error
    pub fn into_error(self, step: &str) -> Error {
        match self {
            PollError::Timeout {
                elapsed,
                last_phase,
            } => Error::Timeout {
                step: step.to_string(),
                last_phase: last_phase.map(|p| p.to_string()),
                elapsed,
            },
            PollError::Remote(source) => Error::remote(step, source),
            PollError::Cancelled { .. } => Error::Cancelled {
                step: step.to_string(),
            },
        }
    }
}

/// Fixed-interval, deadline-bounded poller
#[derive(Clone, Debug)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Poller {
    /// Create a poller; it never waits longer than `timeout` in total
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop polling as soon as `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `fetch` until it reports a terminal phase.
    ///
    /// Fetch errors go through `classifier`: retryable errors keep polling
    /// inside the same deadline, already-satisfied errors end the poll with
    /// [`Phase::absent`], and fatal errors end it at once.
    pub async fn poll<P, F, Fut>(
        &self,
        step: &str,
        classifier: &Classifier,
        mut fetch: F,
    ) -> Result<PollResult<P>, PollError<P>>
    where
        P: Phase,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollResult<P>, RemoteError>>,
    {
        let start = Instant::now();
        let mut last_phase: Option<P> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled { last_phase });
            }

            match fetch().await {
                Ok(result) => {
                    if let Some(previous) = &last_phase {
                        if !previous.can_transition_to(&result.phase) {
                            warn!(
                                step = %step,
                                kind = P::KIND,
                                from = %previous,
                                to = %result.phase,
                                "unexpected phase transition"
                            );
                        }
                    }
                    if result.terminal {
                        debug!(step = %step, phase = %result.phase, "reached terminal phase");
                        return Ok(result);
                    }
                    trace!(step = %step, phase = %result.phase, "still in progress");
                    last_phase = Some(result.phase);
                }
                Err(err) => match classifier.classify(&err, start.elapsed()) {
                    Outcome::Retryable => {
                        debug!(step = %step, error = %err, "transient error while polling");
                    }
                    Outcome::AlreadySatisfied => {
                        debug!(step = %step, code = %err.code, "object absent");
                        return Ok(PollResult {
                            terminal: true,
                            phase: P::absent(),
                            message: err.message,
                        });
                    }
                    Outcome::Fatal => return Err(PollError::Remote(err)),
                },
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(PollError::Timeout {
                    elapsed,
                    last_phase,
                });
            }

            let wait = self.interval.min(self.timeout - elapsed);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(PollError::Cancelled { last_phase });
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
