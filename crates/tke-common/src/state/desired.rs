//! The desired-state document
//!
//! A resolved, immutable description of what a cluster and its satellite
//! resources should look like. Defaulting happens through serde; structural
//! rules live in [`DesiredState::validate`](super::validation).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Target configuration for one managed cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    /// Control-plane settings
    pub cluster: ClusterSpec,
    /// Container network settings
    pub network: NetworkSpec,
    /// Worker instances created by count or attached by ID
    #[serde(default)]
    pub nodes: NodesSpec,
    /// Auto-scaling node pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_pools: Vec<NodePoolSpec>,
    /// Serverless (virtual node) pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub serverless_pools: Vec<ServerlessPoolSpec>,
    /// API-server access points
    #[serde(default)]
    pub endpoints: EndpointsSpec,
    /// Auth, log and audit toggles
    #[serde(default)]
    pub features: FeaturesSpec,
    /// Add-ons, installed in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons: Vec<AddonSpec>,
}

impl DesiredState {
    /// Parse a desired-state document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind("DesiredState", e.to_string()))
    }

    /// Number of nodes this document asks for, counting each pool at its
    /// desired capacity (or minimum) and each serverless pool as one node
    pub fn requested_nodes(&self) -> usize {
        let workers: usize = self.nodes.workers.iter().map(|w| w.count as usize).sum();
        let existing: usize = self
            .nodes
            .existing
            .iter()
            .map(|e| e.instance_ids.len())
            .sum();
        let pools: usize = self
            .node_pools
            .iter()
            .map(|p| p.desired_capacity.unwrap_or(p.min_size) as usize)
            .sum();
        workers + existing + pools + self.serverless_pools.len()
    }

    /// Instance IDs to attach, in document order
    pub fn existing_instance_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .existing
            .iter()
            .flat_map(|e| e.instance_ids.iter().map(String::as_str))
    }

    /// Look up an add-on by name
    pub fn addon(&self, name: &str) -> Option<&AddonSpec> {
        self.addons.iter().find(|a| a.name == name)
    }
}

/// Control-plane settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Kubernetes version, e.g. "1.28.3"
    pub version: String,
    /// Project the cluster belongs to
    #[serde(default)]
    pub project_id: u64,
    /// Whether the provider hosts the control plane
    #[serde(default)]
    pub deploy_type: DeployType,
    /// Cloud resource tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Refuse teardown while set
    #[serde(default)]
    pub deletion_protection: bool,
    /// Upgrade worker instances after the control plane
    #[serde(default)]
    pub upgrade_instances_follow_cluster: bool,
}

/// Who runs the control plane
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeployType {
    /// Provider-hosted control plane
    #[default]
    Managed,
    /// Control plane on the caller's instances
    Independent,
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployType::Managed => write!(f, "managed"),
            DeployType::Independent => write!(f, "independent"),
        }
    }
}

/// Container network settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// VPC the cluster lives in
    pub vpc_id: String,
    /// Pod networking mode
    pub mode: NetworkMode,
    /// Pod CIDR, required iff mode is routed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_cidr: Option<String>,
    /// Service CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cidr: Option<String>,
    /// ENI settings, required iff mode is ENI-direct
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eni: Option<EniSpec>,
    /// Pod slots per node
    #[serde(default = "default_max_pods")]
    pub max_pods_per_node: u32,
    /// Service slots per cluster
    #[serde(default = "default_max_services")]
    pub max_services: u32,
}

fn default_max_pods() -> u32 {
    256
}

fn default_max_services() -> u32 {
    256
}

/// Pod networking mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkMode {
    /// Pod CIDR routed by the VPC
    Routed,
    /// Overlay network inside the cluster
    Overlay,
    /// Pods get elastic network interfaces in VPC subnets
    EniDirect,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Routed => write!(f, "routed"),
            NetworkMode::Overlay => write!(f, "overlay"),
            NetworkMode::EniDirect => write!(f, "eniDirect"),
        }
    }
}

/// ENI-direct settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EniSpec {
    /// Subnets ENIs are allocated from
    pub subnet_ids: Vec<String>,
    /// ENI attachment flavour
    #[serde(default)]
    pub eni_type: EniType,
    /// Seconds an ENI IP stays claimed after its pod goes away
    #[serde(default = "default_claim_expiry")]
    pub claim_expiry_seconds: u32,
}

fn default_claim_expiry() -> u32 {
    300
}

/// ENI attachment flavour
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EniType {
    /// Shared ENI, routed to pods
    #[default]
    RouteEni,
    /// Dedicated ENI per pod
    DirectEni,
}

impl fmt::Display for EniType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EniType::RouteEni => write!(f, "routeEni"),
            EniType::DirectEni => write!(f, "directEni"),
        }
    }
}

/// Worker instances
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodesSpec {
    /// Groups of instances created by count
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<WorkerGroupSpec>,
    /// Pre-existing instances attached by ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub existing: Vec<ExistingInstancesSpec>,
}

/// Instances created by count from one launch template
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerGroupSpec {
    /// Group name, unique within the document
    pub name: String,
    /// CVM instance type
    pub instance_type: String,
    /// Subnet for the instances
    pub subnet_id: String,
    /// Number of instances
    pub count: u32,
    /// Image to boot from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// System disk size in GB
    #[serde(default = "default_system_disk")]
    pub system_disk_gb: u32,
    /// Node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn default_system_disk() -> u32 {
    50
}

/// Instances that already exist and are attached to the cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingInstancesSpec {
    /// CVM instance IDs
    pub instance_ids: Vec<String>,
    /// SSH key IDs installed on attach
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_ids: Vec<String>,
    /// Node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Auto-scaling node pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Pool name, unique within the document
    pub name: String,
    /// CVM instance type
    pub instance_type: String,
    /// Subnets the scaling group launches into
    pub subnet_ids: Vec<String>,
    /// Scaling group lower bound
    pub min_size: u32,
    /// Scaling group upper bound
    pub max_size: u32,
    /// Desired capacity; left to the autoscaler when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_capacity: Option<u32>,
    /// Whether the cluster autoscaler manages the pool
    #[serde(default = "default_true")]
    pub enable_auto_scale: bool,
    /// Node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Node taints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
    /// Cloud resource tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl NodePoolSpec {
    /// Whether labels, taints or tags differ from `other`
    pub fn metadata_differs(&self, other: &NodePoolSpec) -> bool {
        self.labels != other.labels || self.taints != other.taints || self.tags != other.tags
    }

    /// Whether min/max bounds differ from `other`
    pub fn bounds_differ(&self, other: &NodePoolSpec) -> bool {
        self.min_size != other.min_size || self.max_size != other.max_size
    }
}

/// A node taint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    /// Taint key
    pub key: String,
    /// Taint value
    #[serde(default)]
    pub value: String,
    /// Scheduling effect
    pub effect: TaintEffect,
}

/// Scheduling effect of a taint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    /// Do not schedule new pods
    NoSchedule,
    /// Avoid scheduling new pods
    PreferNoSchedule,
    /// Evict running pods
    NoExecute,
}

/// Serverless (virtual node) pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessPoolSpec {
    /// Pool name, unique within the document
    pub name: String,
    /// Subnets virtual nodes are placed in
    pub subnet_ids: Vec<String>,
    /// Security groups applied to pods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,
    /// Node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Node taints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

/// API-server access points
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsSpec {
    /// Internet-facing endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<PublicEndpointSpec>,
    /// Intranet endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<PrivateEndpointSpec>,
    /// Which endpoint is opened first
    #[serde(default)]
    pub order: EndpointOrder,
}

impl EndpointsSpec {
    /// Whether any endpoint is requested
    pub fn any(&self) -> bool {
        self.public.is_some() || self.private.is_some()
    }
}

/// Internet-facing endpoint settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicEndpointSpec {
    /// CIDRs allowed to reach the endpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_policies: Vec<String>,
}

/// Intranet endpoint settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateEndpointSpec {
    /// Subnet the endpoint's address is allocated from
    pub subnet_id: String,
}

/// Endpoint ordering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointOrder {
    /// Public endpoint first
    #[default]
    PublicFirst,
    /// Private endpoint first
    PrivateFirst,
}

/// Auth, log and audit toggles
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesSpec {
    /// Service-account issuer options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
    /// Cluster log collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogSpec>,
    /// API-server audit logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditSpec>,
}

/// Service-account issuer options
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Use the provider's default issuer and JWKS URI
    #[serde(default)]
    pub use_tke_default: bool,
    /// Custom issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Custom JWKS URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    /// Grant anonymous access to the discovery endpoints
    #[serde(default)]
    pub auto_create_discovery_anonymous_auth: bool,
}

/// Cluster log collection target
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSpec {
    /// Log set; created by the provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logset_id: Option<String>,
    /// Log topic; created by the provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

/// Audit logging target
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSpec {
    /// Log set; created by the provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logset_id: Option<String>,
    /// Log topic; created by the provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    /// Remove the log set and topic when audit is switched off
    #[serde(default)]
    pub delete_logset_and_topic_on_disable: bool,
}

/// One add-on installation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    /// Add-on name, unique within the document
    pub name: String,
    /// Chart version
    pub version: String,
    /// Raw chart values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTED: &str = r#"
cluster:
  name: prod
  version: "1.28.3"
  tags:
    team: platform
network:
  vpcId: vpc-1
  mode: routed
  clusterCidr: 10.31.0.0/16
nodes:
  workers:
    - name: default
      instanceType: S5.MEDIUM4
      subnetId: subnet-1
      count: 2
  existing:
    - instanceIds: [ins-a, ins-b]
nodePools:
  - name: burst
    instanceType: S5.LARGE8
    subnetIds: [subnet-1]
    minSize: 0
    maxSize: 5
    desiredCapacity: 1
serverlessPools:
  - name: eks
    subnetIds: [subnet-2]
addons:
  - name: X
    version: "1.0"
"#;

    #[test]
    fn parses_with_defaults() {
        let desired = DesiredState::from_yaml_str(ROUTED).unwrap();
        assert_eq!(desired.cluster.deploy_type, DeployType::Managed);
        assert!(!desired.cluster.deletion_protection);
        assert_eq!(desired.network.mode, NetworkMode::Routed);
        assert_eq!(desired.network.max_pods_per_node, 256);
        assert_eq!(desired.nodes.workers[0].system_disk_gb, 50);
        assert!(desired.node_pools[0].enable_auto_scale);
        assert_eq!(desired.endpoints.order, EndpointOrder::PublicFirst);
        assert!(!desired.endpoints.any());
        assert_eq!(desired.addon("X").map(|a| a.version.as_str()), Some("1.0"));
    }

    #[test]
    fn requested_nodes_counts_every_source() {
        let desired = DesiredState::from_yaml_str(ROUTED).unwrap();
        // 2 workers + 2 existing + 1 pool + 1 serverless
        assert_eq!(desired.requested_nodes(), 6);
        let ids: Vec<_> = desired.existing_instance_ids().collect();
        assert_eq!(ids, vec!["ins-a", "ins-b"]);
    }

    #[test]
    fn unknown_network_mode_is_a_serialization_error() {
        let yaml = ROUTED.replace("mode: routed", "mode: bridged");
        let err = DesiredState::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn node_pool_change_detection() {
        let desired = DesiredState::from_yaml_str(ROUTED).unwrap();
        let pool = desired.node_pools[0].clone();
        let mut changed = pool.clone();
        changed.labels.insert("tier".to_string(), "burst".to_string());
        assert!(changed.metadata_differs(&pool));
        assert!(!changed.bounds_differ(&pool));

        changed.max_size = 10;
        assert!(changed.bounds_differ(&pool));
    }
}
