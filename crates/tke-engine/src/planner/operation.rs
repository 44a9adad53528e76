//! Planned mutations

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use tke_common::state::{
    AddonSpec, AuditSpec, AuthSpec, ClusterSpec, EniSpec, ExistingInstancesSpec, LogSpec,
    NetworkSpec, NodePoolSpec, PrivateEndpointSpec, PublicEndpointSpec, ServerlessPoolSpec,
    WorkerGroupSpec,
};

use crate::client::EndpointKind;

/// What an operation does to its target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    /// Bring the target into existence
    Create,
    /// Change the target in place
    Modify,
    /// Remove the target
    Delete,
    /// Switch a capability of the target on
    EnableFeature,
    /// Switch a capability of the target off
    DisableFeature,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Modify => write!(f, "modify"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::EnableFeature => write!(f, "enable"),
            OperationKind::DisableFeature => write!(f, "disable"),
        }
    }
}

/// Cluster-level feature targeted by an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureKind {
    /// Service-account issuer options
    Auth,
    /// Log collection
    Log,
    /// Audit logging
    Audit,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Auth => write!(f, "auth"),
            FeatureKind::Log => write!(f, "log"),
            FeatureKind::Audit => write!(f, "audit"),
        }
    }
}

/// The remote object an operation addresses.
///
/// Identifiers are present only when the object already exists remotely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "resource")]
pub enum ResourceRef {
    /// The cluster itself
    Cluster {
        /// Cluster ID, absent before creation
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// The cluster's container network
    Network,
    /// Instances of a worker group, or attached instances when `group` is absent
    Instances {
        /// Worker group name
        #[serde(skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },
    /// A node pool
    NodePool {
        /// Pool name
        name: String,
        /// Pool ID, absent before creation
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// A serverless pool
    ServerlessPool {
        /// Pool name
        name: String,
        /// Pool ID, absent before creation
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// An API-server endpoint
    Endpoint {
        /// Which endpoint
        kind: EndpointKind,
    },
    /// A cluster-level feature
    Feature {
        /// Which feature
        feature: FeatureKind,
    },
    /// An add-on
    Addon {
        /// Add-on name
        name: String,
    },
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Cluster { id: Some(id) } => write!(f, "cluster {}", id),
            ResourceRef::Cluster { id: None } => write!(f, "cluster"),
            ResourceRef::Network => write!(f, "network"),
            ResourceRef::Instances { group: Some(g) } => write!(f, "instances of {}", g),
            ResourceRef::Instances { group: None } => write!(f, "attached instances"),
            ResourceRef::NodePool { name, .. } => write!(f, "node pool {}", name),
            ResourceRef::ServerlessPool { name, .. } => write!(f, "serverless pool {}", name),
            ResourceRef::Endpoint { kind } => write!(f, "{} endpoint", kind),
            ResourceRef::Feature { feature } => write!(f, "{}", feature),
            ResourceRef::Addon { name } => write!(f, "add-on {}", name),
        }
    }
}

/// Dependency stage of an operation; operations run in stage order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    /// Control plane
    Cluster,
    /// Container network
    Network,
    /// Worker instances
    Instances,
    /// Node pools
    NodePools,
    /// Serverless pools
    ServerlessPools,
    /// API-server endpoints
    Endpoints,
    /// Auth, log, audit
    Features,
    /// Add-ons
    Addons,
}

/// Data carried by an operation
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(
    rename_all = "camelCase",
    rename_all_fields = "camelCase",
    tag = "type",
    content = "value"
)]
pub enum Payload {
    /// Full settings of a new cluster
    NewCluster {
        /// Control-plane settings
        cluster: ClusterSpec,
        /// Network settings
        network: NetworkSpec,
    },
    /// Name, description and project
    ClusterAttributes(ClusterSpec),
    /// Complete tag set, applied in one call
    Tags(BTreeMap<String, String>),
    /// Kubernetes version change
    Version {
        /// Observed version
        from: String,
        /// Desired version
        to: String,
    },
    /// Deletion protection toggle
    DeletionProtection,
    /// ENI-direct settings to switch on
    Eni(EniSpec),
    /// ENI subnets to add
    AddEniSubnets(Vec<String>),
    /// Switch ENI-direct off
    DisableEni,
    /// Instances to create from a worker group
    WorkerGroup {
        /// Group settings
        spec: WorkerGroupSpec,
        /// How many instances to add
        count: u32,
    },
    /// Pre-existing instances to attach
    AttachInstances(ExistingInstancesSpec),
    /// Instances to remove
    RemoveInstances(Vec<String>),
    /// Full settings of a node pool
    NodePool(NodePoolSpec),
    /// Labels, taints and tags, applied in one call
    NodePoolMetadata(NodePoolSpec),
    /// Autoscaler management toggle
    AutoScaling,
    /// Scaling group bounds
    Bounds {
        /// Lower bound
        min_size: u32,
        /// Upper bound
        max_size: u32,
    },
    /// Scaling group desired capacity
    DesiredCapacity(u32),
    /// Full settings of a serverless pool
    ServerlessPool(ServerlessPoolSpec),
    /// Public endpoint settings
    PublicEndpoint(PublicEndpointSpec),
    /// Private endpoint settings
    PrivateEndpoint(PrivateEndpointSpec),
    /// Issuer options
    Auth(AuthSpec),
    /// Log target
    Log(LogSpec),
    /// Audit target
    Audit(AuditSpec),
    /// Add-on settings
    Addon(AddonSpec),
    /// Nothing beyond the target
    None,
}

/// A single planned mutation
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// What to do
    pub kind: OperationKind,
    /// What to do it to
    pub target: ResourceRef,
    /// The data to do it with
    pub payload: Payload,
}

impl Operation {
    /// Build an operation
    pub fn new(kind: OperationKind, target: ResourceRef, payload: Payload) -> Self {
        Self {
            kind,
            target,
            payload,
        }
    }

    /// The dependency stage this operation belongs to
    pub fn stage(&self) -> Stage {
        match self.target {
            ResourceRef::Cluster { .. } => Stage::Cluster,
            ResourceRef::Network => Stage::Network,
            ResourceRef::Instances { .. } => Stage::Instances,
            ResourceRef::NodePool { .. } => Stage::NodePools,
            ResourceRef::ServerlessPool { .. } => Stage::ServerlessPools,
            ResourceRef::Endpoint { .. } => Stage::Endpoints,
            ResourceRef::Feature { .. } => Stage::Features,
            ResourceRef::Addon { .. } => Stage::Addons,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target)?;
        match &self.payload {
            Payload::NewCluster { network, .. } => {
                write!(f, " ({}", network.mode)?;
                if let Some(cidr) = &network.cluster_cidr {
                    write!(f, ", cidr={}", cidr)?;
                }
                write!(f, ")")
            }
            Payload::Version { from, to } => write!(f, " ({} -> {})", from, to),
            Payload::DeletionProtection => write!(f, " deletion protection"),
            Payload::WorkerGroup { count, .. } => write!(f, " (count={})", count),
            Payload::AttachInstances(spec) => write!(f, " (count={})", spec.instance_ids.len()),
            Payload::RemoveInstances(ids) => write!(f, " ({})", ids.join(", ")),
            Payload::AddEniSubnets(ids) => write!(f, " (add subnets {})", ids.join(", ")),
            Payload::AutoScaling => write!(f, " autoscaling"),
            Payload::Bounds { min_size, max_size } => {
                write!(f, " (bounds {}..={})", min_size, max_size)
            }
            Payload::DesiredCapacity(n) => write!(f, " (capacity={})", n),
            Payload::Addon(spec) => write!(f, " (version={})", spec.version),
            _ => Ok(()),
        }
    }
}
