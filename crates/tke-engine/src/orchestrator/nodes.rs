//! Instance, node-pool and serverless-pool steps

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use tke_common::phase::{
    InstancePhase, NodePoolPhase, Phase, PhaseOutcome, ScalingPhase, ServerlessPoolPhase,
};
use tke_common::state::{
    NodePoolStatus, ObservedState, RemoteObject, ServerlessPoolStatus, WorkerGroupStatus,
};
use tke_common::{Error, Result};

use super::{heading, is_in_flight, reported, succeeded, unsupported, Orchestrator};
use crate::classify::Classifier;
use crate::client::InstanceReport;
use crate::planner::{Operation, OperationKind, Payload};
use crate::poller::{Goal, PollResult};

type InstancePhases = Vec<(String, InstancePhase)>;

/// Reduce a describe response to one fleet phase.
///
/// Instances missing from the response are not visible yet. Removed
/// instances do not count toward `min_ready`.
fn fleet(
    ids: &[String],
    reports: Vec<InstanceReport>,
    min_ready: usize,
    latest: &Mutex<InstancePhases>,
) -> PollResult<InstancePhase> {
    let phases: InstancePhases = ids
        .iter()
        .map(|id| {
            let phase = reports
                .iter()
                .find(|r| r.id == *id)
                .map(|r| InstancePhase::parse(&r.state))
                .unwrap_or_default();
            (id.clone(), phase)
        })
        .collect();

    let failures: Vec<String> = reports
        .iter()
        .filter(|r| InstancePhase::parse(&r.state) == InstancePhase::Failed)
        .map(|r| format!("{}: {}", r.id, r.message))
        .collect();

    let live: Vec<InstancePhase> = phases
        .iter()
        .map(|(_, phase)| phase.clone())
        .filter(|phase| *phase != InstancePhase::Removed)
        .collect();
    let phase = InstancePhase::aggregate(&live, min_ready.min(live.len()));

    *latest.lock().unwrap_or_else(PoisonError::into_inner) = phases;
    PollResult::toward(phase, failures.join("; "), Goal::Present)
}

fn record_instances(state: &mut ObservedState, phases: &[(String, InstancePhase)]) {
    let by_id: BTreeMap<&str, &InstancePhase> =
        phases.iter().map(|(id, p)| (id.as_str(), p)).collect();
    let instances = state
        .workers
        .values_mut()
        .flat_map(|g| g.instances.iter_mut())
        .chain(state.existing.iter_mut());
    for instance in instances {
        if let Some(phase) = by_id.get(instance.id.as_str()) {
            instance.phase = (*phase).clone();
        }
    }
}

fn pool_id(state: &ObservedState, name: &str) -> Result<String> {
    state
        .node_pool(name)
        .map(|p| p.pool.id.clone())
        .ok_or_else(|| {
            Error::internal_with_context("node pool", format!("{} is not in the observed state", name))
        })
}

fn serverless_pool_mut<'a>(
    state: &'a mut ObservedState,
    name: &str,
) -> Result<&'a mut ServerlessPoolStatus> {
    state
        .serverless_pools
        .iter_mut()
        .find(|p| p.spec.name == name)
        .ok_or_else(|| {
            Error::internal_with_context(
                "serverless pool",
                format!("{} is not in the observed state", name),
            )
        })
}

impl Orchestrator {
    /// Wait until at least `min_ready` of `ids` run; a failed instance that
    /// makes that impossible is fatal
    pub(super) async fn wait_instances(
        &self,
        state: &mut ObservedState,
        ids: &[String],
        min_ready: usize,
        step: &str,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();
        let latest = Mutex::new(InstancePhases::new());
        let seen = &latest;

        let result = self
            .poller(self.config.instance_budget(ids.len()))
            .poll(step, &self.read_after_create(), move || async move {
                api.describe_instances(cid, ids)
                    .await
                    .map(|reports| fleet(ids, reports, min_ready, seen))
            })
            .await;

        record_instances(
            state,
            &latest.into_inner().unwrap_or_else(PoisonError::into_inner),
        );
        let result = result.map_err(|e| e.into_error(step))?;
        succeeded(step, &result)
    }

    /// Endpoints need at least one node that can serve them
    pub(super) async fn wait_for_node(&self, state: &mut ObservedState, step: &str) -> Result<()> {
        let running = |outcome: PhaseOutcome| outcome == PhaseOutcome::Succeeded;
        let has_node = state.instances().any(|i| running(i.phase.outcome()))
            || state.node_pools.iter().any(|p| {
                running(p.pool.phase.outcome())
                    && p.spec.desired_capacity.unwrap_or(p.spec.min_size) > 0
            })
            || state
                .serverless_pools
                .iter()
                .any(|p| running(p.pool.phase.outcome()));
        if has_node {
            return Ok(());
        }

        let ids: Vec<String> = state.instances().map(|i| i.id.clone()).collect();
        if ids.is_empty() {
            return Err(Error::validation_for(
                &state.spec.name,
                "opening an endpoint requires at least one node",
            ));
        }
        self.wait_instances(state, &ids, 1, step).await
    }

    /// Settle instances a previous run left booting; drop removed ones
    pub(super) async fn settle_instances(&self, state: &mut ObservedState, step: &str) -> Result<()> {
        let pending: Vec<String> = state
            .instances()
            .filter(|i| is_in_flight(&i.phase))
            .map(|i| i.id.clone())
            .collect();
        self.wait_instances(state, &pending, pending.len(), step)
            .await?;

        let present = |i: &RemoteObject<InstancePhase>| i.phase != InstancePhase::Removed;
        state.existing.retain(present);
        for group in state.workers.values_mut() {
            group.instances.retain(present);
        }

        if let Some(failed) = state.instances().find(|i| i.phase == InstancePhase::Failed) {
            return Err(Error::terminal_phase(
                step,
                &failed.phase,
                format!("instance {} failed to join the cluster", failed.id),
            ));
        }
        Ok(())
    }

    pub(super) async fn apply_instances(
        &self,
        state: &mut ObservedState,
        group: Option<&str>,
        op: &Operation,
        step: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();

        match (op.kind, &op.payload) {
            (OperationKind::Create, Payload::WorkerGroup { spec, count }) => {
                let count = *count;
                let ids = self
                    .call(step, &Classifier::for_write(), move || {
                        api.create_instances(cid, spec, count)
                    })
                    .await?
                    .done()
                    .unwrap_or_default();
                info!(group = %spec.name, count = ids.len(), "Instances created");

                let status = state
                    .workers
                    .entry(spec.name.clone())
                    .or_insert_with(|| WorkerGroupStatus {
                        spec: spec.clone(),
                        instances: Vec::new(),
                    });
                status.spec = spec.clone();
                status.instances.extend(
                    ids.iter()
                        .map(|id| RemoteObject::new(id.clone(), InstancePhase::Initializing)),
                );

                self.wait_instances(state, &ids, ids.len(), step).await
            }
            (OperationKind::Create, Payload::AttachInstances(spec)) => {
                self.call(step, &Classifier::for_write(), move || {
                    api.attach_instances(cid, spec)
                })
                .await?;
                state.existing.extend(
                    spec.instance_ids
                        .iter()
                        .map(|id| RemoteObject::new(id.clone(), InstancePhase::Initializing)),
                );
                info!(count = spec.instance_ids.len(), "Instances attached");

                self.wait_instances(state, &spec.instance_ids, spec.instance_ids.len(), step)
                    .await
            }
            (OperationKind::Delete, Payload::RemoveInstances(ids)) => {
                self.call(step, &Classifier::for_delete(), move || {
                    api.remove_instances(cid, ids)
                })
                .await?;
                let keep = |i: &RemoteObject<InstancePhase>| !ids.contains(&i.id);
                match group {
                    Some(name) => {
                        if let Some(status) = state.workers.get_mut(name) {
                            status.instances.retain(keep);
                            status.spec.count = status.instances.len() as u32;
                            if status.instances.is_empty() {
                                state.workers.remove(name);
                            }
                        }
                    }
                    None => state.existing.retain(keep),
                }
                info!(count = ids.len(), "Instances removed");
                Ok(())
            }
            _ => Err(unsupported(op)),
        }
    }

    /// Poll a node pool's life state toward `goal`
    async fn wait_node_pool(
        &self,
        state: &mut ObservedState,
        name: &str,
        goal: Goal,
        classifier: &Classifier,
        step: &str,
    ) -> Result<NodePoolPhase> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let pool = pool_id(state, name)?;
        let (cid, pid) = (cluster_id.as_str(), pool.as_str());

        let result = self
            .poller(self.config.pool_budget())
            .poll(step, classifier, move || async move {
                api.describe_node_pool(cid, pid).await.map(|r| {
                    PollResult::toward(NodePoolPhase::parse(&r.life_state), String::new(), goal)
                })
            })
            .await;

        let (phase, outcome) = match result {
            Ok(result) => (Some(result.phase.clone()), Ok(result.phase)),
            Err(e) => (e.last_phase().cloned(), Err(e.into_error(step))),
        };
        if let (Some(phase), Some(status)) = (phase, state.node_pool_mut(name)) {
            status.pool.phase = phase;
        }
        outcome
    }

    /// Wait for the pool's scaling group to finish an enable or disable
    async fn wait_scaling(&self, state: &mut ObservedState, name: &str, step: &str) -> Result<()> {
        let settled = state
            .node_pool(name)
            .map(|p| p.scaling.outcome() == PhaseOutcome::Succeeded)
            .unwrap_or(true);
        if settled {
            return Ok(());
        }
        debug!(pool = %name, "Waiting for scaling group to settle");

        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let pool = pool_id(state, name)?;
        let (cid, pid) = (cluster_id.as_str(), pool.as_str());

        let result = self
            .poller(self.config.pool_budget())
            .poll(step, &Classifier::for_read(), move || async move {
                api.describe_node_pool(cid, pid).await.map(|r| {
                    PollResult::toward(
                        ScalingPhase::parse(&r.autoscaling),
                        String::new(),
                        Goal::Present,
                    )
                })
            })
            .await;

        let (phase, outcome) = match result {
            Ok(result) => (Some(result.phase), Ok(())),
            Err(e) => (e.last_phase().cloned(), Err(e.into_error(step))),
        };
        if let (Some(phase), Some(status)) = (phase, state.node_pool_mut(name)) {
            status.scaling = phase;
        }
        outcome
    }

    pub(super) async fn apply_node_pool(
        &self,
        state: &mut ObservedState,
        name: &str,
        op: &Operation,
        step: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();
        let write = Classifier::for_write();
        let read = Classifier::for_read();

        match (op.kind, &op.payload) {
            (OperationKind::Create, Payload::NodePool(spec)) => {
                let id = self
                    .call(step, &write, move || api.create_node_pool(cid, spec))
                    .await?
                    .done()
                    .ok_or_else(|| Error::internal_with_context(step, "create returned no pool ID"))?;
                info!(pool = %name, pool_id = %id, "Node pool created");

                state.node_pools.push(NodePoolStatus {
                    pool: RemoteObject::new(id, NodePoolPhase::Creating),
                    scaling: if spec.enable_auto_scale {
                        ScalingPhase::Enabling
                    } else {
                        ScalingPhase::Disabled
                    },
                    spec: spec.clone(),
                });
                let classifier = self.read_after_create();
                self.wait_node_pool(state, name, Goal::Present, &classifier, step)
                    .await?;
                self.wait_scaling(state, name, step).await
            }
            (OperationKind::Modify, Payload::NodePoolMetadata(spec)) => {
                let pid = pool_id(state, name)?;
                let pid = pid.as_str();
                self.call(step, &write, move || {
                    api.modify_node_pool_metadata(cid, pid, spec)
                })
                .await?;
                if let Some(status) = state.node_pool_mut(name) {
                    status.spec.labels = spec.labels.clone();
                    status.spec.taints = spec.taints.clone();
                    status.spec.tags = spec.tags.clone();
                    status.pool.phase = NodePoolPhase::Updating;
                }
                self.wait_node_pool(state, name, Goal::Present, &read, step)
                    .await
                    .map(drop)
            }
            (
                kind @ (OperationKind::EnableFeature | OperationKind::DisableFeature),
                Payload::AutoScaling,
            ) => {
                let enabled = kind == OperationKind::EnableFeature;
                let pid = pool_id(state, name)?;
                let pid = pid.as_str();
                self.wait_scaling(state, name, step).await?;
                self.call(step, &write, move || {
                    api.set_node_pool_autoscaling(cid, pid, enabled)
                })
                .await?;
                if let Some(status) = state.node_pool_mut(name) {
                    status.spec.enable_auto_scale = enabled;
                    status.scaling = if enabled {
                        ScalingPhase::Enabling
                    } else {
                        ScalingPhase::Disabling
                    };
                }
                self.wait_scaling(state, name, step).await
            }
            (OperationKind::Modify, Payload::Bounds { min_size, max_size }) => {
                let (min_size, max_size) = (*min_size, *max_size);
                let pid = pool_id(state, name)?;
                let pid = pid.as_str();
                self.wait_scaling(state, name, step).await?;
                self.call(step, &write, move || {
                    api.modify_node_pool_bounds(cid, pid, min_size, max_size)
                })
                .await?;
                if let Some(status) = state.node_pool_mut(name) {
                    status.spec.min_size = min_size;
                    status.spec.max_size = max_size;
                }
                self.wait_node_pool(state, name, Goal::Present, &read, step)
                    .await
                    .map(drop)
            }
            (OperationKind::Modify, Payload::DesiredCapacity(capacity)) => {
                let capacity = *capacity;
                let pid = pool_id(state, name)?;
                let pid = pid.as_str();
                self.wait_scaling(state, name, step).await?;
                self.call(step, &write, move || {
                    api.modify_node_pool_capacity(cid, pid, capacity)
                })
                .await?;
                if let Some(status) = state.node_pool_mut(name) {
                    status.spec.desired_capacity = Some(capacity);
                }
                self.wait_node_pool(state, name, Goal::Present, &read, step)
                    .await
                    .map(drop)
            }
            (OperationKind::Delete, Payload::None) => {
                let pid = pool_id(state, name)?;
                let pid = pid.as_str();
                // Deleting while the scaling group is mid-transition leaves
                // the group behind, so the delete waits for it
                self.wait_scaling(state, name, step).await?;
                let delete = Classifier::for_delete();
                let issued = self
                    .call(step, &delete, move || api.delete_node_pool(cid, pid))
                    .await?
                    .done()
                    .is_some();
                if issued {
                    if let Some(status) = state.node_pool_mut(name) {
                        status.pool.phase = NodePoolPhase::Deleting;
                    }
                    self.wait_node_pool(state, name, Goal::Absent, &delete, step)
                        .await?;
                }
                state.node_pools.retain(|p| p.spec.name != name);
                info!(pool = %name, "Node pool deleted");
                Ok(())
            }
            _ => Err(unsupported(op)),
        }
    }

    /// Poll a serverless pool toward `goal`
    async fn wait_serverless_pool(
        &self,
        state: &mut ObservedState,
        name: &str,
        goal: Goal,
        classifier: &Classifier,
        step: &str,
    ) -> Result<PollResult<ServerlessPoolPhase>> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let pool = serverless_pool_mut(state, name)?.pool.id.clone();
        let (cid, pid) = (cluster_id.as_str(), pool.as_str());

        let result = self
            .poller(self.config.pool_budget())
            .poll(step, classifier, move || async move {
                api.describe_serverless_pool(cid, pid)
                    .await
                    .map(|r| reported::<ServerlessPoolPhase>(r, goal))
            })
            .await;

        let (phase, outcome) = match result {
            Ok(result) => (Some(result.phase.clone()), Ok(result)),
            Err(e) => (e.last_phase().cloned(), Err(e.into_error(step))),
        };
        if let Some(phase) = phase {
            serverless_pool_mut(state, name)?.pool.phase = phase;
        }
        outcome
    }

    pub(super) async fn apply_serverless_pool(
        &self,
        state: &mut ObservedState,
        name: &str,
        op: &Operation,
        step: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let cluster_id = state.cluster.id.clone();
        let cid = cluster_id.as_str();
        let write = Classifier::for_write();

        match (op.kind, &op.payload) {
            (OperationKind::Create, Payload::ServerlessPool(spec)) => {
                let id = self
                    .call(step, &write, move || api.create_serverless_pool(cid, spec))
                    .await?
                    .done()
                    .ok_or_else(|| Error::internal_with_context(step, "create returned no pool ID"))?;
                info!(pool = %name, pool_id = %id, "Serverless pool created");

                state.serverless_pools.push(ServerlessPoolStatus {
                    pool: RemoteObject::new(id, ServerlessPoolPhase::Creating),
                    spec: spec.clone(),
                });
                let classifier = self.read_after_create();
                let result = self
                    .wait_serverless_pool(state, name, Goal::Present, &classifier, step)
                    .await?;
                succeeded(step, &result)
            }
            (OperationKind::Modify, Payload::ServerlessPool(spec)) => {
                let pid = serverless_pool_mut(state, name)?.pool.id.clone();
                let pid = pid.as_str();
                self.call(step, &write, move || {
                    api.modify_serverless_pool(cid, pid, spec)
                })
                .await?;
                let status = serverless_pool_mut(state, name)?;
                status.spec = spec.clone();
                status.pool.phase = ServerlessPoolPhase::Updating;

                let result = self
                    .wait_serverless_pool(state, name, Goal::Present, &Classifier::for_read(), step)
                    .await?;
                succeeded(step, &result)
            }
            (OperationKind::Delete, Payload::None) => {
                let pid = serverless_pool_mut(state, name)?.pool.id.clone();
                let pid = pid.as_str();
                let delete = Classifier::for_delete();
                let issued = self
                    .call(step, &delete, move || api.delete_serverless_pool(cid, pid))
                    .await?
                    .done()
                    .is_some();
                if issued {
                    serverless_pool_mut(state, name)?.pool.phase = ServerlessPoolPhase::Deleting;
                    let result = self
                        .wait_serverless_pool(state, name, Goal::Absent, &delete, step)
                        .await?;
                    succeeded(step, &result)?;
                }
                state.serverless_pools.retain(|p| p.spec.name != name);
                info!(pool = %name, "Serverless pool deleted");
                Ok(())
            }
            _ => Err(unsupported(op)),
        }
    }

    /// Settle pools a previous run left mid-transition; drop deleted ones
    pub(super) async fn settle_pools(&self, state: &mut ObservedState, step: &str) -> Result<()> {
        let pending: Vec<(String, NodePoolPhase)> = state
            .node_pools
            .iter()
            .filter(|p| is_in_flight(&p.pool.phase) || is_in_flight(&p.scaling))
            .map(|p| (p.spec.name.clone(), p.pool.phase.clone()))
            .collect();
        for (name, phase) in pending {
            if is_in_flight(&phase) {
                let goal = heading(&phase, NodePoolPhase::Deleting);
                self.wait_node_pool(state, &name, goal, &self.settling(goal), step)
                    .await?;
            }
            let gone = state
                .node_pool(&name)
                .map(|p| p.pool.phase.outcome() == PhaseOutcome::Absent)
                .unwrap_or(true);
            if !gone {
                self.wait_scaling(state, &name, step).await?;
            }
        }
        state
            .node_pools
            .retain(|p| p.pool.phase.outcome() != PhaseOutcome::Absent);

        let pending: Vec<(String, ServerlessPoolPhase)> = state
            .serverless_pools
            .iter()
            .filter(|p| is_in_flight(&p.pool.phase))
            .map(|p| (p.spec.name.clone(), p.pool.phase.clone()))
            .collect();
        for (name, phase) in pending {
            let goal = heading(&phase, ServerlessPoolPhase::Deleting);
            self.wait_serverless_pool(state, &name, goal, &self.settling(goal), step)
                .await?;
        }
        state
            .serverless_pools
            .retain(|p| p.pool.phase.outcome() != PhaseOutcome::Absent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, state: &str) -> InstanceReport {
        InstanceReport {
            id: id.to_string(),
            state: state.to_string(),
            message: if state == "failed" {
                "launch failed".to_string()
            } else {
                String::new()
            },
        }
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fleet_waits_for_every_requested_instance() {
        let latest = Mutex::new(Vec::new());
        let ids = ids(&["ins-1", "ins-2"]);

        let result = fleet(&ids, vec![report("ins-1", "running")], 2, &latest);
        assert!(!result.terminal);

        let result = fleet(
            &ids,
            vec![report("ins-1", "running"), report("ins-2", "running")],
            2,
            &latest,
        );
        assert!(result.terminal && !result.failed());
        assert_eq!(latest.lock().unwrap().len(), 2);
    }

    #[test]
    fn fleet_names_failed_instances() {
        let latest = Mutex::new(Vec::new());
        let result = fleet(
            &ids(&["ins-1", "ins-2"]),
            vec![report("ins-1", "running"), report("ins-2", "failed")],
            2,
            &latest,
        );
        assert!(result.failed());
        assert_eq!(result.message, "ins-2: launch failed");
    }

    #[test]
    fn fleet_ignores_removed_instances() {
        let latest = Mutex::new(Vec::new());
        let result = fleet(
            &ids(&["ins-1", "ins-2"]),
            vec![report("ins-1", "running"), report("ins-2", "terminated")],
            2,
            &latest,
        );
        assert!(result.terminal && !result.failed());
        assert_eq!(
            latest.lock().unwrap()[1],
            ("ins-2".to_string(), InstancePhase::Removed)
        );
    }
}
