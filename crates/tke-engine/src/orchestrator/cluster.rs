//! Control-plane and network steps

use tracing::info;

use tke_common::phase::{ClusterPhase, Phase, PhaseOutcome};
use tke_common::state::{DesiredState, NetworkMode, ObservedState};
use tke_common::{Error, Result};

use super::{heading, new_cluster, reported, succeeded, unsupported, Orchestrator};
use crate::classify::Classifier;
use crate::client::{CreateClusterRequest, UpgradeType};
use crate::planner::{Operation, OperationKind, Payload};
use crate::poller::{Goal, PollResult};

impl Orchestrator {
    /// Create the cluster and start its observed state
    pub(super) async fn create_cluster(
        &self,
        desired: &DesiredState,
        op: &Operation,
    ) -> Result<ObservedState> {
        let step = op.to_string();
        let (cluster, network) = new_cluster(op).ok_or_else(|| unsupported(op))?;
        let request = CreateClusterRequest {
            cluster: cluster.clone(),
            network: network.clone(),
        };

        let api = self.api.as_ref();
        let request = &request;
        let id = self
            .call(&step, &Classifier::for_write(), move || api.create_cluster(request))
            .await?
            .done()
            .ok_or_else(|| Error::internal_with_context(&step, "create returned no cluster ID"))?;

        info!(cluster_id = %id, mode = %network.mode, "Cluster created");
        Ok(ObservedState::created(id, desired))
    }

    /// Poll the cluster toward `goal`, recording every phase seen
    pub(super) async fn wait_cluster(
        &self,
        state: &mut ObservedState,
        goal: Goal,
        classifier: &Classifier,
        step: &str,
    ) -> Result<PollResult<ClusterPhase>> {
        let api = self.api.as_ref();
        let id = state.cluster.id.clone();
        let id = id.as_str();

        let result = self
            .poller(self.config.cluster_budget())
            .poll(step, classifier, move || async move {
                api.describe_cluster(id).await.map(|r| reported::<ClusterPhase>(r, goal))
            })
            .await;

        match result {
            Ok(result) => {
                state.cluster.phase = result.phase.clone();
                Ok(result)
            }
            Err(e) => {
                if let Some(phase) = e.last_phase() {
                    state.cluster.phase = phase.clone();
                }
                Err(e.into_error(step))
            }
        }
    }

    /// Wait until the control plane reports `Running`; a failure phase is
    /// fatal. Always describes the cluster, since network changes leave the
    /// cached phase untouched.
    pub(super) async fn wait_cluster_running(
        &self,
        state: &mut ObservedState,
        step: &str,
    ) -> Result<()> {
        let classifier = self.read_after_create();
        let result = self
            .wait_cluster(state, Goal::Present, &classifier, step)
            .await?;
        succeeded(step, &result)
    }

    /// Settle a cluster a previous run left mid-transition. Returns whether
    /// the cluster still exists.
    pub(super) async fn settle_cluster(&self, state: &mut ObservedState, step: &str) -> Result<bool> {
        if state.cluster.phase.outcome() == PhaseOutcome::InProgress {
            let goal = heading(&state.cluster.phase, ClusterPhase::Deleting);
            self.wait_cluster(state, goal, &self.settling(goal), step)
                .await?;
        }
        match state.cluster.phase.outcome() {
            PhaseOutcome::Absent => Ok(false),
            PhaseOutcome::Failed => Err(Error::terminal_phase(
                step,
                &state.cluster.phase,
                "cluster is in a failure phase",
            )),
            _ => Ok(true),
        }
    }

    pub(super) async fn apply_cluster(
        &self,
        desired: &DesiredState,
        state: &mut ObservedState,
        op: &Operation,
        step: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let id = state.cluster.id.clone();
        let id = id.as_str();
        let write = Classifier::for_write();

        match &op.payload {
            Payload::ClusterAttributes(spec) => {
                self.call(step, &write, move || api.modify_cluster_attributes(id, spec))
                    .await?;
                state.spec.name = spec.name.clone();
                state.spec.description = spec.description.clone();
                state.spec.project_id = spec.project_id;
            }
            Payload::Tags(tags) => {
                self.call(step, &write, move || api.modify_cluster_tags(id, tags))
                    .await?;
                state.spec.tags = tags.clone();
            }
            Payload::DeletionProtection => {
                let enabled = op.kind == OperationKind::EnableFeature;
                self.call(step, &write, move || api.set_deletion_protection(id, enabled))
                    .await?;
                state.spec.deletion_protection = enabled;
            }
            Payload::Version { to, .. } => {
                self.upgrade(desired, state, to, step).await?;
            }
            _ => return Err(unsupported(op)),
        }
        Ok(())
    }

    /// Upgrade the control plane, then the workers if asked to
    async fn upgrade(
        &self,
        desired: &DesiredState,
        state: &mut ObservedState,
        version: &str,
        step: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let id = state.cluster.id.clone();
        let cluster_id = id.as_str();

        self.call(step, &Classifier::for_write(), move || {
            api.upgrade_cluster(cluster_id, version)
        })
        .await?;
        state.cluster.phase = ClusterPhase::Upgrading;
        self.wait_cluster_running(state, step).await?;
        state.spec.version = version.to_string();
        info!(version = %version, "Control plane upgraded");

        if desired.cluster.upgrade_instances_follow_cluster {
            self.upgrade_workers(state, step).await?;
        }
        state.spec.upgrade_instances_follow_cluster =
            desired.cluster.upgrade_instances_follow_cluster;
        Ok(())
    }

    /// Upgrade worker instances with the most thorough strategy that has
    /// eligible instances, falling back from major to hot
    async fn upgrade_workers(&self, state: &mut ObservedState, step: &str) -> Result<()> {
        let api = self.api.as_ref();
        let id = state.cluster.id.clone();
        let cluster_id = id.as_str();

        for upgrade in [UpgradeType::Major, UpgradeType::Hot] {
            let eligible = self
                .call(step, &Classifier::for_read(), move || {
                    api.upgradable_instances(cluster_id, upgrade)
                })
                .await?
                .done()
                .unwrap_or_default();
            if eligible.is_empty() {
                info!(%upgrade, "No instances eligible for upgrade");
                continue;
            }

            let instances = eligible.as_slice();
            self.call(step, &Classifier::for_write(), move || {
                api.upgrade_instances(cluster_id, upgrade, instances)
            })
            .await?;
            info!(%upgrade, count = eligible.len(), "Upgrading worker instances");

            state.cluster.phase = ClusterPhase::Upgrading;
            return self.wait_cluster_running(state, step).await;
        }

        info!("Worker instances already on the control-plane version");
        Ok(())
    }

    pub(super) async fn apply_network(
        &self,
        state: &mut ObservedState,
        op: &Operation,
        step: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let id = state.cluster.id.clone();
        let id = id.as_str();
        let write = Classifier::for_write();

        match &op.payload {
            Payload::Eni(eni) => {
                self.call(step, &write, move || api.enable_eni(id, eni)).await?;
                // The pod CIDR stays with the cluster so routed mode can come back
                state.network.mode = NetworkMode::EniDirect;
                state.network.eni = Some(eni.clone());
            }
            Payload::AddEniSubnets(subnets) => {
                self.call(step, &write, move || api.add_eni_subnets(id, subnets))
                    .await?;
                if let Some(eni) = state.network.eni.as_mut() {
                    eni.subnet_ids.extend(subnets.iter().cloned());
                }
            }
            Payload::DisableEni => {
                self.call(step, &write, move || api.disable_eni(id)).await?;
                state.network.mode = NetworkMode::Routed;
                state.network.eni = None;
            }
            _ => return Err(unsupported(op)),
        }
        Ok(())
    }

    /// Delete the cluster and wait for it to disappear
    pub(super) async fn delete_cluster(&self, state: &mut ObservedState, step: &str) -> Result<()> {
        let api = self.api.as_ref();
        let id = state.cluster.id.clone();
        let cluster_id = id.as_str();
        let classifier = Classifier::for_delete();

        if self
            .call(step, &classifier, move || api.delete_cluster(cluster_id))
            .await?
            .done()
            .is_none()
        {
            info!("Cluster already gone");
            state.cluster.phase = ClusterPhase::AlreadyGone;
            return Ok(());
        }

        state.cluster.phase = ClusterPhase::Deleting;
        let result = self
            .wait_cluster(state, Goal::Absent, &classifier, step)
            .await?;
        succeeded(step, &result)
    }
}
