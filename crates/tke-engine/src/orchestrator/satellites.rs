//! Endpoint, feature and add-on steps

use tracing::{error, info, warn};

use tke_common::phase::{AddonPhase, EndpointPhase, Phase, PhaseOutcome};
use tke_common::state::{EndpointStatus, ObservedState};
use tke_common::{Error, Result};

use super::{
    heading, is_in_flight, reported, succeeded, unsupported, Orchestrator, StepError, StepResult,
};
use crate::classify::Classifier;
use crate::client::EndpointKind;
use crate::planner::{Operation, OperationKind, Payload};
use crate::poller::{Goal, PollResult};

fn endpoint_phase(state: &ObservedState, kind: EndpointKind) -> Option<&EndpointPhase> {
    match kind {
        EndpointKind::Public => state.endpoints.public.as_ref().map(|e| &e.phase),
        EndpointKind::Private => state.endpoints.private.as_ref().map(|e| &e.phase),
    }
}

fn set_endpoint_phase(state: &mut ObservedState, kind: EndpointKind, phase: EndpointPhase) {
    match kind {
        EndpointKind::Public => {
            if let Some(endpoint) = state.endpoints.public.as_mut() {
                endpoint.phase = phase;
            }
        }
        EndpointKind::Private => {
            if let Some(endpoint) = state.endpoints.private.as_mut() {
                endpoint.phase = phase;
            }
        }
    }
}

fn clear_endpoint(state: &mut ObservedState, kind: EndpointKind) {
    match kind {
        EndpointKind::Public => state.endpoints.public = None,
        EndpointKind::Private => state.endpoints.private = None,
    }
}

fn set_addon_phase(state: &mut ObservedState, name: &str, phase: AddonPhase) {
    if let Some(status) = state.addons.iter_mut().find(|a| a.spec.name == name) {
        status.addon.phase = phase;
    }
}

impl Orchestrator {
    async fn wait_endpoint(
        &self,
        state: &mut ObservedState,
        kind: EndpointKind,
        goal: Goal,
        classifier: &Classifier,
        step: &str,
    ) -> Result<PollResult<EndpointPhase>> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();

        let result = self
            .poller(self.config.endpoint_budget())
            .poll(step, classifier, move || async move {
                api.describe_endpoint(cid, kind)
                    .await
                    .map(|r| reported::<EndpointPhase>(r, goal))
            })
            .await;

        match result {
            Ok(result) => {
                set_endpoint_phase(state, kind, result.phase.clone());
                Ok(result)
            }
            Err(e) => {
                if let Some(phase) = e.last_phase() {
                    set_endpoint_phase(state, kind, phase.clone());
                }
                Err(e.into_error(step))
            }
        }
    }

    pub(super) async fn apply_endpoint(
        &self,
        state: &mut ObservedState,
        kind: EndpointKind,
        op: &Operation,
        step: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();
        let write = Classifier::for_write();

        match (op.kind, &op.payload) {
            (OperationKind::Create, Payload::PublicEndpoint(spec)) => {
                self.call(step, &write, move || api.create_public_endpoint(cid, spec))
                    .await?;
                state.endpoints.public = Some(EndpointStatus {
                    phase: EndpointPhase::Creating,
                    spec: spec.clone(),
                });
            }
            (OperationKind::Create, Payload::PrivateEndpoint(spec)) => {
                self.call(step, &write, move || api.create_private_endpoint(cid, spec))
                    .await?;
                state.endpoints.private = Some(EndpointStatus {
                    phase: EndpointPhase::Creating,
                    spec: spec.clone(),
                });
            }
            (OperationKind::Modify, Payload::PublicEndpoint(spec)) => {
                self.call(step, &write, move || api.modify_public_endpoint(cid, spec))
                    .await?;
                if let Some(endpoint) = state.endpoints.public.as_mut() {
                    endpoint.spec = spec.clone();
                }
            }
            (OperationKind::Delete, Payload::None) => {
                let delete = Classifier::for_delete();
                let issued = self
                    .call(step, &delete, move || api.delete_endpoint(cid, kind))
                    .await?
                    .done()
                    .is_some();
                if issued {
                    set_endpoint_phase(state, kind, EndpointPhase::Deleting);
                    let result = self
                        .wait_endpoint(state, kind, Goal::Absent, &delete, step)
                        .await?;
                    succeeded(step, &result)?;
                }
                clear_endpoint(state, kind);
                info!(endpoint = %kind, "Endpoint deleted");
                return Ok(());
            }
            _ => return Err(unsupported(op)),
        }

        // An endpoint may not be visible for a moment after it is requested
        let classifier = self.read_after_create();
        let result = self
            .wait_endpoint(state, kind, Goal::Present, &classifier, step)
            .await?;
        succeeded(step, &result)?;
        info!(endpoint = %kind, "Endpoint ready");
        Ok(())
    }

    pub(super) async fn apply_feature(
        &self,
        state: &mut ObservedState,
        op: &Operation,
        step: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();
        let write = Classifier::for_write();

        match (op.kind, &op.payload) {
            (OperationKind::Modify, Payload::Auth(auth)) => {
                self.call(step, &write, move || api.modify_auth_options(cid, auth))
                    .await?;
                state.features.auth = Some(auth.clone());
            }
            (OperationKind::EnableFeature, Payload::Log(log)) => {
                self.call(step, &write, move || api.enable_log(cid, log))
                    .await?;
                state.features.log = Some(log.clone());
            }
            (OperationKind::DisableFeature, Payload::None) => {
                self.call(step, &Classifier::for_delete(), move || api.disable_log(cid))
                    .await?;
                state.features.log = None;
            }
            (OperationKind::EnableFeature, Payload::Audit(audit)) => {
                self.call(step, &write, move || api.enable_audit(cid, audit))
                    .await?;
                state.features.audit = Some(audit.clone());
            }
            (OperationKind::DisableFeature, Payload::Audit(audit)) => {
                let purge = audit.delete_logset_and_topic_on_disable;
                self.call(step, &Classifier::for_delete(), move || {
                    api.disable_audit(cid, purge)
                })
                .await?;
                state.features.audit = None;
            }
            _ => return Err(unsupported(op)),
        }
        info!(feature = %op.target, "Feature updated");
        Ok(())
    }

    async fn wait_addon(
        &self,
        state: &mut ObservedState,
        name: &str,
        goal: Goal,
        classifier: &Classifier,
        step: &str,
    ) -> Result<PollResult<AddonPhase>> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();

        let result = self
            .poller(self.config.addon_budget())
            .poll(step, classifier, move || async move {
                api.describe_addon(cid, name)
                    .await
                    .map(|r| reported::<AddonPhase>(r, goal))
            })
            .await;

        match result {
            Ok(result) => {
                set_addon_phase(state, name, result.phase.clone());
                Ok(result)
            }
            Err(e) => {
                if let Some(phase) = e.last_phase() {
                    set_addon_phase(state, name, phase.clone());
                }
                Err(e.into_error(step))
            }
        }
    }

    /// Delete an add-on and wait until it is gone
    async fn remove_addon(&self, state: &mut ObservedState, name: &str, step: &str) -> Result<()> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();
        let delete = Classifier::for_delete();

        let issued = self
            .call(step, &delete, move || api.delete_addon(cid, name))
            .await?
            .done()
            .is_some();
        if issued {
            set_addon_phase(state, name, AddonPhase::Deleting);
            let result = self
                .wait_addon(state, name, Goal::Absent, &delete, step)
                .await?;
            succeeded(step, &result)?;
        }
        state.addons.retain(|a| a.spec.name != name);
        Ok(())
    }

    pub(super) async fn apply_addon(
        &self,
        state: &mut ObservedState,
        name: &str,
        op: &Operation,
        step: &str,
    ) -> StepResult {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();
        let write = Classifier::for_write();

        match (op.kind, &op.payload) {
            (OperationKind::Create, Payload::Addon(spec)) => {
                self.call(step, &write, move || api.install_addon(cid, spec))
                    .await?;
                state.upsert_addon(spec.clone(), AddonPhase::Installing);

                let classifier = self.read_after_create();
                let result = self
                    .wait_addon(state, name, Goal::Present, &classifier, step)
                    .await?;
                if !result.failed() {
                    info!(addon = %name, version = %spec.version, "Add-on installed");
                    return Ok(());
                }

                // Leave no half-installed add-on behind; earlier steps stay
                let failure = Error::terminal_phase(step, &result.phase, result.message);
                warn!(addon = %name, phase = %result.phase, "Add-on install failed, removing it");
                match self.remove_addon(state, name, step).await {
                    Ok(()) => Err(StepError::compensated(failure)),
                    Err(e) => {
                        error!(addon = %name, error = %e, "Removing failed add-on failed");
                        Err(failure.into())
                    }
                }
            }
            (OperationKind::Modify, Payload::Addon(spec)) => {
                self.call(step, &write, move || api.update_addon(cid, spec))
                    .await?;
                state.upsert_addon(spec.clone(), AddonPhase::Upgrading);

                let result = self
                    .wait_addon(state, name, Goal::Present, &Classifier::for_read(), step)
                    .await?;
                succeeded(step, &result)?;
                info!(addon = %name, version = %spec.version, "Add-on updated");
                Ok(())
            }
            (OperationKind::Delete, Payload::None) => {
                self.remove_addon(state, name, step).await?;
                info!(addon = %name, "Add-on deleted");
                Ok(())
            }
            _ => Err(unsupported(op).into()),
        }
    }

    /// Settle endpoints and add-ons a previous run left mid-transition
    pub(super) async fn settle_satellites(&self, state: &mut ObservedState, step: &str) -> Result<()> {
        for kind in [EndpointKind::Public, EndpointKind::Private] {
            let Some(phase) = endpoint_phase(state, kind).cloned() else {
                continue;
            };
            if !is_in_flight(&phase) {
                continue;
            }
            let goal = heading(&phase, EndpointPhase::Deleting);
            let result = self
                .wait_endpoint(state, kind, goal, &self.settling(goal), step)
                .await?;
            if result.phase.outcome() == PhaseOutcome::Absent {
                clear_endpoint(state, kind);
            }
        }

        let pending: Vec<(String, AddonPhase)> = state
            .addons
            .iter()
            .filter(|a| is_in_flight(&a.addon.phase))
            .map(|a| (a.spec.name.clone(), a.addon.phase.clone()))
            .collect();
        for (name, phase) in pending {
            let goal = heading(&phase, AddonPhase::Deleting);
            self.wait_addon(state, &name, goal, &self.settling(goal), step)
                .await?;
        }
        state
            .addons
            .retain(|a| a.addon.phase.outcome() != PhaseOutcome::Absent);
        Ok(())
    }
}
