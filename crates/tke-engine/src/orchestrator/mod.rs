//! Convergence orchestration
//!
//! The [`Orchestrator`] applies a plan one operation at a time. Every
//! operation that starts a remote transition is polled to a terminal phase
//! before the next one is issued, and every result is written into the
//! observed state the run hands back, so a failed or abandoned run can be
//! resumed from exactly where it stopped.
//!
//! A run is strictly sequential. Several orchestrators may drive different
//! clusters at once; they share nothing but the RPC client.

mod cluster;
mod nodes;
mod satellites;

#[cfg(test)]
pub(crate) mod fake;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use tke_common::config::EngineConfig;
use tke_common::phase::{Phase, PhaseOutcome};
use tke_common::state::{ClusterSpec, DesiredState, NetworkSpec, ObservedState};
use tke_common::{Error, RemoteError, Result};

use crate::classify::{retry_call, Applied, Classifier};
use crate::client::{StatusReport, TkeApi};
use crate::planner::{plan, Operation, Payload, ResourceRef, Stage};
use crate::poller::{Goal, PollResult, Poller};

const REFRESH_STEP: &str = "refresh observed state";
const CLUSTER_BARRIER_STEP: &str = "wait for cluster running";
const NODE_BARRIER_STEP: &str = "wait for a running node";

/// A convergence run that stopped before reaching the desired state.
///
/// Earlier steps are left converged. `observed` holds everything the run
/// learned, including identifiers of objects it created, and can be passed
/// straight back to [`Orchestrator::converge`].
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct ConvergeError {
    /// The operation or wait that failed
    pub step: String,
    /// Last phase observed for the failing object
    pub phase: Option<String>,
    /// Whether a compensating action undid the failing step's side effects
    pub compensated: bool,
    /// Underlying error
    #[source]
    pub source: Error,
    /// Observed state at the time of failure; absent if no cluster exists yet
    pub observed: Option<Box<ObservedState>>,
}

impl ConvergeError {
    fn new(step: impl Into<String>, failure: StepError, observed: Option<&ObservedState>) -> Self {
        Self {
            step: step.into(),
            phase: failure.source.last_phase().map(str::to_string),
            compensated: failure.compensated,
            source: failure.source,
            observed: observed.cloned().map(Box::new),
        }
    }

    /// Whether the run was rejected before any remote call
    pub fn is_planning_error(&self) -> bool {
        self.source.is_planning_error()
    }

    /// Take the observed state out of the error
    pub fn into_observed(self) -> Option<ObservedState> {
        self.observed.map(|o| *o)
    }
}

/// Failure of a single step, before it is attributed to an operation
#[derive(Debug)]
struct StepError {
    source: Error,
    compensated: bool,
}

impl StepError {
    fn compensated(source: Error) -> Self {
        Self {
            source,
            compensated: true,
        }
    }
}

impl From<Error> for StepError {
    fn from(source: Error) -> Self {
        Self {
            source,
            compensated: false,
        }
    }
}

type StepResult = std::result::Result<(), StepError>;

/// Drives one cluster from its observed state to a desired state
pub struct Orchestrator {
    api: Arc<dyn TkeApi>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator over an RPC client
    pub fn new(api: Arc<dyn TkeApi>, config: EngineConfig) -> Self {
        Self {
            api,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon the run at the next await point once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Engine configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Converge a cluster onto `desired`.
    ///
    /// `observed` is the state returned by the previous run, or `None` to
    /// create the cluster. Objects the previous run left mid-transition are
    /// waited on before planning. When nothing differs no remote mutation is
    /// issued and `observed` comes back unchanged.
    #[instrument(skip(self, desired, observed), fields(cluster = %desired.cluster.name))]
    pub async fn converge(
        &self,
        desired: &DesiredState,
        observed: Option<ObservedState>,
    ) -> std::result::Result<ObservedState, ConvergeError> {
        let observed = match observed {
            Some(state) if !state.is_settled() => self.refresh(state).await?,
            other => other,
        };

        let ops = plan(desired, observed.as_ref())
            .map_err(|e| ConvergeError::new("plan", e.into(), observed.as_ref()))?;

        let mut ops = ops.into_iter().peekable();
        let mut state = match observed {
            Some(state) => state,
            None => {
                let Some(op) = ops.next() else {
                    let err = Error::internal_with_context("plan", "no cluster creation planned");
                    return Err(ConvergeError::new("plan", err.into(), None));
                };
                self.create_cluster(desired, &op)
                    .await
                    .map_err(|e| ConvergeError::new(op.to_string(), e.into(), None))?
            }
        };

        if ops.peek().is_none() && state.cluster.phase.outcome() == PhaseOutcome::Succeeded {
            info!(cluster_id = %state.cluster.id, "Already converged");
            return Ok(state);
        }

        let mut cluster_settled = state.cluster.phase.outcome() == PhaseOutcome::Succeeded;
        let mut node_ready = false;
        let mut applied = 0usize;

        for op in ops {
            let stage = op.stage();

            if stage > Stage::Network && !cluster_settled {
                if let Err(e) = self.wait_cluster_running(&mut state, CLUSTER_BARRIER_STEP).await {
                    return Err(ConvergeError::new(CLUSTER_BARRIER_STEP, e.into(), Some(&state)));
                }
                cluster_settled = true;
            }
            if stage >= Stage::Endpoints && !node_ready {
                if let Err(e) = self.wait_for_node(&mut state, NODE_BARRIER_STEP).await {
                    return Err(ConvergeError::new(NODE_BARRIER_STEP, e.into(), Some(&state)));
                }
                node_ready = true;
            }

            if let Err(failure) = self.apply(desired, &mut state, &op).await {
                warn!(operation = %op, error = %failure.source, "Operation failed");
                return Err(ConvergeError::new(op.to_string(), failure, Some(&state)));
            }
            applied += 1;

            if stage <= Stage::Network {
                cluster_settled = false;
            }
        }

        if !cluster_settled {
            if let Err(e) = self.wait_cluster_running(&mut state, CLUSTER_BARRIER_STEP).await {
                return Err(ConvergeError::new(CLUSTER_BARRIER_STEP, e.into(), Some(&state)));
            }
        }

        state.observed_at = Some(Utc::now());
        info!(cluster_id = %state.cluster.id, operations = applied, "Converged");
        Ok(state)
    }

    /// Delete the cluster and wait until it is gone.
    ///
    /// Refuses without any remote call while deletion protection is on. A
    /// cluster that is already gone counts as deleted.
    #[instrument(skip(self, observed), fields(cluster_id = %observed.cluster.id))]
    pub async fn destroy(&self, observed: ObservedState) -> std::result::Result<(), ConvergeError> {
        let step = format!("delete cluster {}", observed.cluster.id);

        if observed.spec.deletion_protection {
            let err = Error::validation_for_field(
                &observed.spec.name,
                "cluster.deletionProtection",
                "deletion protection is enabled; disable it before deleting the cluster",
            );
            return Err(ConvergeError::new(step, err.into(), Some(&observed)));
        }

        let mut state = observed;
        if let Err(e) = self.delete_cluster(&mut state, &step).await {
            return Err(ConvergeError::new(step, e.into(), Some(&state)));
        }
        info!("Cluster deleted");
        Ok(())
    }

    #[instrument(skip_all, fields(operation = %op))]
    async fn apply(
        &self,
        desired: &DesiredState,
        state: &mut ObservedState,
        op: &Operation,
    ) -> StepResult {
        let step = op.to_string();
        info!("Applying operation");

        match &op.target {
            ResourceRef::Cluster { .. } => self.apply_cluster(desired, state, op, &step).await?,
            ResourceRef::Network => self.apply_network(state, op, &step).await?,
            ResourceRef::Instances { group } => {
                self.apply_instances(state, group.as_deref(), op, &step)
                    .await?
            }
            ResourceRef::NodePool { name, .. } => {
                self.apply_node_pool(state, name, op, &step).await?
            }
            ResourceRef::ServerlessPool { name, .. } => {
                self.apply_serverless_pool(state, name, op, &step).await?
            }
            ResourceRef::Endpoint { kind } => self.apply_endpoint(state, *kind, op, &step).await?,
            ResourceRef::Feature { .. } => self.apply_feature(state, op, &step).await?,
            ResourceRef::Addon { name } => return self.apply_addon(state, name, op, &step).await,
        }
        Ok(())
    }

    /// Wait for every object a previous run left mid-transition.
    ///
    /// Returns `None` when the cluster itself turns out to be gone, so the
    /// plan starts from scratch.
    async fn refresh(
        &self,
        mut state: ObservedState,
    ) -> std::result::Result<Option<ObservedState>, ConvergeError> {
        info!(cluster_id = %state.cluster.id, "Waiting for in-flight objects before planning");
        match self.settle_in_flight(&mut state).await {
            Ok(true) => Ok(Some(state)),
            Ok(false) => {
                warn!(cluster_id = %state.cluster.id, "Cluster no longer exists, planning from scratch");
                Ok(None)
            }
            Err(e) => Err(ConvergeError::new(REFRESH_STEP, e.into(), Some(&state))),
        }
    }

    async fn settle_in_flight(&self, state: &mut ObservedState) -> Result<bool> {
        if !self.settle_cluster(state, REFRESH_STEP).await? {
            return Ok(false);
        }
        self.settle_instances(state, REFRESH_STEP).await?;
        self.settle_pools(state, REFRESH_STEP).await?;
        self.settle_satellites(state, REFRESH_STEP).await?;
        Ok(true)
    }

    fn poller(&self, timeout: Duration) -> Poller {
        Poller::new(self.config.poll_interval(), timeout).with_cancellation(self.cancel.clone())
    }

    /// Describe profile for objects created moments ago
    fn read_after_create(&self) -> Classifier {
        Classifier::for_read_after_create(self.config.not_found_grace())
    }

    /// Describe profile for an in-flight object left by a previous run.
    /// Only a delete in progress may count absence as success.
    fn settling(&self, goal: Goal) -> Classifier {
        match goal {
            Goal::Absent => Classifier::for_delete(),
            Goal::Present => self.read_after_create(),
        }
    }

    /// Issue one mutating call within the write budget
    async fn call<T, F, Fut>(
        &self,
        step: &str,
        classifier: &Classifier,
        call: F,
    ) -> Result<Applied<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        retry_call(
            step,
            classifier,
            self.config.write_timeout(),
            &self.config.retry,
            &self.cancel,
            call,
        )
        .await
    }
}

/// Interpret a describe response for a poll
fn reported<P: Phase>(report: StatusReport, goal: Goal) -> PollResult<P> {
    PollResult::toward(P::parse(&report.phase), report.message, goal)
}

/// Which way an in-flight object is heading
fn heading<P: Phase>(phase: &P, deleting: P) -> Goal {
    if *phase == deleting {
        Goal::Absent
    } else {
        Goal::Present
    }
}

/// Turn a failure phase into an error
fn succeeded<P: Phase>(step: &str, result: &PollResult<P>) -> Result<()> {
    if result.failed() {
        return Err(Error::terminal_phase(step, &result.phase, result.message.clone()));
    }
    Ok(())
}

fn unsupported(op: &Operation) -> Error {
    Error::internal_with_context("apply", format!("unsupported operation: {}", op))
}

/// Settings carried by a cluster creation
fn new_cluster(op: &Operation) -> Option<(&ClusterSpec, &NetworkSpec)> {
    match &op.payload {
        Payload::NewCluster { cluster, network } => Some((cluster, network)),
        _ => None,
    }
}

fn is_in_flight<P: Phase>(phase: &P) -> bool {
    phase.outcome() == PhaseOutcome::InProgress
}
