//! The observed-state document
//!
//! Same shape as the desired state plus remote identifiers and phases. The
//! engine returns one after every run, successful or not, and takes it back
//! as the pre-image of the next run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::desired::{
    AddonSpec, ClusterSpec, DesiredState, FeaturesSpec, NetworkSpec, NodePoolSpec,
    PrivateEndpointSpec, PublicEndpointSpec, ServerlessPoolSpec, WorkerGroupSpec,
};
use crate::phase::{
    AddonPhase, ClusterPhase, EndpointPhase, InstancePhase, NodePoolPhase, Phase, PhaseOutcome,
    ScalingPhase, ServerlessPoolPhase,
};
use crate::{Error, Result};

/// An object owned by the remote system: its assigned identifier and last phase.
///
/// Identifiers are only ever copied from create responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject<P> {
    /// Remote identifier
    pub id: String,
    /// Last observed phase
    pub phase: P,
}

impl<P: Phase> RemoteObject<P> {
    /// Wrap an identifier with its phase
    pub fn new(id: impl Into<String>, phase: P) -> Self {
        Self {
            id: id.into(),
            phase,
        }
    }
}

/// Last known state of one managed cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedState {
    /// The cluster object
    pub cluster: RemoteObject<ClusterPhase>,
    /// Control-plane settings last applied
    pub spec: ClusterSpec,
    /// Network settings last applied
    pub network: NetworkSpec,
    /// Instances created by count, by group name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workers: BTreeMap<String, WorkerGroupStatus>,
    /// Pre-existing instances attached by ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub existing: Vec<RemoteObject<InstancePhase>>,
    /// Node pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_pools: Vec<NodePoolStatus>,
    /// Serverless pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub serverless_pools: Vec<ServerlessPoolStatus>,
    /// Endpoints
    #[serde(default)]
    pub endpoints: EndpointsStatus,
    /// Auth, log and audit settings last applied
    #[serde(default)]
    pub features: FeaturesSpec,
    /// Add-ons, in install order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons: Vec<AddonStatus>,
    /// When a run last changed anything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Instances of one worker group
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerGroupStatus {
    /// Group settings last applied
    pub spec: WorkerGroupSpec,
    /// Instances in creation order
    #[serde(default)]
    pub instances: Vec<RemoteObject<InstancePhase>>,
}

/// One node pool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    /// The pool object; `id` is the pool ID
    pub pool: RemoteObject<NodePoolPhase>,
    /// Scaling-group sub-state
    #[serde(default)]
    pub scaling: ScalingPhase,
    /// Pool settings last applied
    pub spec: NodePoolSpec,
}

/// One serverless pool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessPoolStatus {
    /// The pool object
    pub pool: RemoteObject<ServerlessPoolPhase>,
    /// Pool settings last applied
    pub spec: ServerlessPoolSpec,
}

/// Endpoint phases and the settings they were opened with
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsStatus {
    /// Internet-facing endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<EndpointStatus<PublicEndpointSpec>>,
    /// Intranet endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<EndpointStatus<PrivateEndpointSpec>>,
}

/// One endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus<S> {
    /// Last observed phase
    pub phase: EndpointPhase,
    /// Settings last applied
    pub spec: S,
}

/// One add-on
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonStatus {
    /// The add-on object; `id` is the add-on name
    pub addon: RemoteObject<AddonPhase>,
    /// Settings last applied
    pub spec: AddonSpec,
}

impl ObservedState {
    /// Observed state for a cluster that was just created from `desired`.
    ///
    /// Only cluster-level settings are recorded; every satellite resource
    /// starts empty and is filled in as its operations are applied.
    pub fn created(cluster_id: impl Into<String>, desired: &DesiredState) -> Self {
        Self {
            cluster: RemoteObject::new(cluster_id, ClusterPhase::Creating),
            spec: desired.cluster.clone(),
            network: desired.network.clone(),
            workers: BTreeMap::new(),
            existing: Vec::new(),
            node_pools: Vec::new(),
            serverless_pools: Vec::new(),
            endpoints: EndpointsStatus::default(),
            features: FeaturesSpec::default(),
            addons: Vec::new(),
            observed_at: None,
        }
    }

    /// Parse an observed-state document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind("ObservedState", e.to_string()))
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind("ObservedState", e.to_string()))
    }

    /// Every instance the cluster knows about, worker groups first
    pub fn instances(&self) -> impl Iterator<Item = &RemoteObject<InstancePhase>> {
        self.workers
            .values()
            .flat_map(|g| g.instances.iter())
            .chain(self.existing.iter())
    }

    /// Look up a node pool by name
    pub fn node_pool(&self, name: &str) -> Option<&NodePoolStatus> {
        self.node_pools.iter().find(|p| p.spec.name == name)
    }

    /// Look up a node pool by name, mutably
    pub fn node_pool_mut(&mut self, name: &str) -> Option<&mut NodePoolStatus> {
        self.node_pools.iter_mut().find(|p| p.spec.name == name)
    }

    /// Look up an add-on by name
    pub fn addon(&self, name: &str) -> Option<&AddonStatus> {
        self.addons.iter().find(|a| a.spec.name == name)
    }

    /// Record an add-on phase, inserting or replacing its entry
    pub fn upsert_addon(&mut self, spec: AddonSpec, phase: AddonPhase) {
        let status = AddonStatus {
            addon: RemoteObject::new(spec.name.clone(), phase),
            spec,
        };
        match self.addons.iter_mut().find(|a| a.spec.name == status.spec.name) {
            Some(existing) => *existing = status,
            None => self.addons.push(status),
        }
    }

    /// Whether every observed object sits in its steady success phase.
    ///
    /// A settled state needs no polling before it can be diffed against.
    pub fn is_settled(&self) -> bool {
        let succeeded = |outcome: PhaseOutcome| outcome == PhaseOutcome::Succeeded;

        succeeded(self.cluster.phase.outcome())
            && self.instances().all(|i| succeeded(i.phase.outcome()))
            && self
                .node_pools
                .iter()
                .all(|p| succeeded(p.pool.phase.outcome()) && succeeded(p.scaling.outcome()))
            && self
                .serverless_pools
                .iter()
                .all(|p| succeeded(p.pool.phase.outcome()))
            && self
                .endpoints
                .public
                .iter()
                .all(|e| succeeded(e.phase.outcome()))
            && self
                .endpoints
                .private
                .iter()
                .all(|e| succeeded(e.phase.outcome()))
            && self.addons.iter().all(|a| succeeded(a.addon.phase.outcome()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESIRED: &str = r#"
cluster:
  name: prod
  version: "1.28.3"
network:
  vpcId: vpc-1
  mode: routed
  clusterCidr: 10.31.0.0/16
addons:
  - name: X
    version: "1.0"
"#;

    fn desired() -> DesiredState {
        DesiredState::from_yaml_str(DESIRED).unwrap()
    }

    #[test]
    fn created_state_starts_empty() {
        let observed = ObservedState::created("cls-1", &desired());
        assert_eq!(observed.cluster.id, "cls-1");
        assert_eq!(observed.cluster.phase, ClusterPhase::Creating);
        assert_eq!(observed.instances().count(), 0);
        assert!(observed.addons.is_empty());
        assert!(!observed.is_settled());
    }

    #[test]
    fn settled_requires_every_object_to_succeed() {
        let mut observed = ObservedState::created("cls-1", &desired());
        observed.cluster.phase = ClusterPhase::Running;
        assert!(observed.is_settled());

        observed.upsert_addon(desired().addons[0].clone(), AddonPhase::Installing);
        assert!(!observed.is_settled());

        observed.upsert_addon(desired().addons[0].clone(), AddonPhase::Succeed);
        assert_eq!(observed.addons.len(), 1);
        assert!(observed.is_settled());

        observed.existing.push(RemoteObject::new("ins-1", InstancePhase::Initializing));
        assert!(!observed.is_settled());
    }

    #[test]
    fn yaml_round_trip_keeps_phases_readable() {
        let mut observed = ObservedState::created("cls-1", &desired());
        observed.cluster.phase = ClusterPhase::Running;
        observed.upsert_addon(desired().addons[0].clone(), AddonPhase::Succeed);

        let yaml = observed.to_yaml().unwrap();
        assert!(yaml.contains("phase: Running"));
        assert!(yaml.contains("phase: Succeed"));

        let back = ObservedState::from_yaml_str(&yaml).unwrap();
        assert_eq!(back, observed);
    }
}
