//! The RPC collaborator
//!
//! [`TkeApi`] is the only way the engine talks to the remote control plane.
//! Implementations own request construction, signing and transport; every
//! failure is surfaced as a [`RemoteError`] so it can be classified. Describe
//! calls return the remote status strings untouched; the engine parses them
//! into phases itself.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use tke_common::state::{
    AddonSpec, AuditSpec, AuthSpec, ClusterSpec, EniSpec, ExistingInstancesSpec, LogSpec,
    NetworkSpec, NodePoolSpec, PrivateEndpointSpec, PublicEndpointSpec, ServerlessPoolSpec,
    WorkerGroupSpec,
};
use tke_common::RemoteError;

/// Status of a single remote object as reported by a describe call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Raw phase string
    pub phase: String,
    /// Reason or message attached to the phase
    pub message: String,
}

impl StatusReport {
    /// Report with no message
    pub fn phase(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            message: String::new(),
        }
    }
}

/// Node pool life state plus its scaling-group sub-state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodePoolReport {
    /// Raw life state, e.g. "normal"
    pub life_state: String,
    /// Raw scaling-group state, e.g. "enabled"
    pub autoscaling: String,
}

/// State of one CVM instance in the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceReport {
    /// Instance ID
    pub id: String,
    /// Raw instance state, e.g. "running"
    pub state: String,
    /// Reason for a failed state
    pub message: String,
}

/// Which API-server access point a call addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointKind {
    /// Internet-facing
    Public,
    /// Intranet
    Private,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Public => write!(f, "public"),
            EndpointKind::Private => write!(f, "private"),
        }
    }
}

/// Worker upgrade strategy, from most to least disruptive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpgradeType {
    /// Reinstall nodes on the new version
    Major,
    /// Replace kubelet and friends in place
    Hot,
}

impl fmt::Display for UpgradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeType::Major => write!(f, "major"),
            UpgradeType::Hot => write!(f, "hot"),
        }
    }
}

/// Everything needed to create a cluster
#[derive(Clone, Debug, PartialEq)]
pub struct CreateClusterRequest {
    /// Control-plane settings
    pub cluster: ClusterSpec,
    /// Network settings
    pub network: NetworkSpec,
}

/// Remote control-plane operations used by the engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TkeApi: Send + Sync {
    // ---- cluster ----------------------------------------------------------

    /// Create a cluster; returns the assigned cluster ID
    async fn create_cluster(&self, request: &CreateClusterRequest) -> Result<String, RemoteError>;

    /// Describe the cluster status
    async fn describe_cluster(&self, cluster_id: &str) -> Result<StatusReport, RemoteError>;

    /// Update name, description and project
    async fn modify_cluster_attributes(
        &self,
        cluster_id: &str,
        spec: &ClusterSpec,
    ) -> Result<(), RemoteError>;

    /// Replace the cluster's tags in one call
    async fn modify_cluster_tags(
        &self,
        cluster_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), RemoteError>;

    /// Toggle deletion protection
    async fn set_deletion_protection(
        &self,
        cluster_id: &str,
        enabled: bool,
    ) -> Result<(), RemoteError>;

    /// Upgrade the control plane
    async fn upgrade_cluster(&self, cluster_id: &str, version: &str) -> Result<(), RemoteError>;

    /// Instances that can be upgraded with the given strategy
    async fn upgradable_instances(
        &self,
        cluster_id: &str,
        upgrade: UpgradeType,
    ) -> Result<Vec<String>, RemoteError>;

    /// Upgrade worker instances with the given strategy
    async fn upgrade_instances(
        &self,
        cluster_id: &str,
        upgrade: UpgradeType,
        instance_ids: &[String],
    ) -> Result<(), RemoteError>;

    /// Delete the cluster and the instances it created
    async fn delete_cluster(&self, cluster_id: &str) -> Result<(), RemoteError>;

    // ---- network ----------------------------------------------------------

    /// Switch the cluster to ENI-direct networking
    async fn enable_eni(&self, cluster_id: &str, eni: &EniSpec) -> Result<(), RemoteError>;

    /// Add subnets to an ENI-direct cluster
    async fn add_eni_subnets(
        &self,
        cluster_id: &str,
        subnet_ids: &[String],
    ) -> Result<(), RemoteError>;

    /// Switch ENI-direct networking off
    async fn disable_eni(&self, cluster_id: &str) -> Result<(), RemoteError>;

    // ---- instances --------------------------------------------------------

    /// Create `count` instances from a worker group; returns their IDs
    async fn create_instances(
        &self,
        cluster_id: &str,
        group: &WorkerGroupSpec,
        count: u32,
    ) -> Result<Vec<String>, RemoteError>;

    /// Attach pre-existing instances
    async fn attach_instances(
        &self,
        cluster_id: &str,
        spec: &ExistingInstancesSpec,
    ) -> Result<(), RemoteError>;

    /// Remove instances from the cluster
    async fn remove_instances(
        &self,
        cluster_id: &str,
        instance_ids: &[String],
    ) -> Result<(), RemoteError>;

    /// Describe instances; missing IDs are omitted from the result
    async fn describe_instances(
        &self,
        cluster_id: &str,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceReport>, RemoteError>;

    // ---- node pools -------------------------------------------------------

    /// Create a node pool; returns the pool ID
    async fn create_node_pool(
        &self,
        cluster_id: &str,
        spec: &NodePoolSpec,
    ) -> Result<String, RemoteError>;

    /// Describe a node pool
    async fn describe_node_pool(
        &self,
        cluster_id: &str,
        pool_id: &str,
    ) -> Result<NodePoolReport, RemoteError>;

    /// Replace labels, taints and tags in one call
    async fn modify_node_pool_metadata(
        &self,
        cluster_id: &str,
        pool_id: &str,
        spec: &NodePoolSpec,
    ) -> Result<(), RemoteError>;

    /// Toggle cluster-autoscaler management of the pool
    async fn set_node_pool_autoscaling(
        &self,
        cluster_id: &str,
        pool_id: &str,
        enabled: bool,
    ) -> Result<(), RemoteError>;

    /// Change the scaling group bounds
    async fn modify_node_pool_bounds(
        &self,
        cluster_id: &str,
        pool_id: &str,
        min_size: u32,
        max_size: u32,
    ) -> Result<(), RemoteError>;

    /// Change the scaling group desired capacity
    async fn modify_node_pool_capacity(
        &self,
        cluster_id: &str,
        pool_id: &str,
        desired_capacity: u32,
    ) -> Result<(), RemoteError>;

    /// Delete a node pool
    async fn delete_node_pool(&self, cluster_id: &str, pool_id: &str) -> Result<(), RemoteError>;

    // ---- serverless pools -------------------------------------------------

    /// Create a serverless pool; returns the pool ID
    async fn create_serverless_pool(
        &self,
        cluster_id: &str,
        spec: &ServerlessPoolSpec,
    ) -> Result<String, RemoteError>;

    /// Describe a serverless pool
    async fn describe_serverless_pool(
        &self,
        cluster_id: &str,
        pool_id: &str,
    ) -> Result<StatusReport, RemoteError>;

    /// Replace labels and taints in one call
    async fn modify_serverless_pool(
        &self,
        cluster_id: &str,
        pool_id: &str,
        spec: &ServerlessPoolSpec,
    ) -> Result<(), RemoteError>;

    /// Delete a serverless pool
    async fn delete_serverless_pool(
        &self,
        cluster_id: &str,
        pool_id: &str,
    ) -> Result<(), RemoteError>;

    // ---- endpoints --------------------------------------------------------

    /// Open the internet-facing endpoint
    async fn create_public_endpoint(
        &self,
        cluster_id: &str,
        spec: &PublicEndpointSpec,
    ) -> Result<(), RemoteError>;

    /// Open the intranet endpoint
    async fn create_private_endpoint(
        &self,
        cluster_id: &str,
        spec: &PrivateEndpointSpec,
    ) -> Result<(), RemoteError>;

    /// Replace the public endpoint's security policies
    async fn modify_public_endpoint(
        &self,
        cluster_id: &str,
        spec: &PublicEndpointSpec,
    ) -> Result<(), RemoteError>;

    /// Close an endpoint
    async fn delete_endpoint(&self, cluster_id: &str, kind: EndpointKind)
        -> Result<(), RemoteError>;

    /// Describe an endpoint
    async fn describe_endpoint(
        &self,
        cluster_id: &str,
        kind: EndpointKind,
    ) -> Result<StatusReport, RemoteError>;

    // ---- features ---------------------------------------------------------

    /// Set service-account issuer options
    async fn modify_auth_options(&self, cluster_id: &str, auth: &AuthSpec)
        -> Result<(), RemoteError>;

    /// Turn on cluster log collection
    async fn enable_log(&self, cluster_id: &str, log: &LogSpec) -> Result<(), RemoteError>;

    /// Turn off cluster log collection
    async fn disable_log(&self, cluster_id: &str) -> Result<(), RemoteError>;

    /// Turn on audit logging
    async fn enable_audit(&self, cluster_id: &str, audit: &AuditSpec) -> Result<(), RemoteError>;

    /// Turn off audit logging
    async fn disable_audit(
        &self,
        cluster_id: &str,
        delete_logset_and_topic: bool,
    ) -> Result<(), RemoteError>;

    // ---- add-ons ----------------------------------------------------------

    /// Install an add-on
    async fn install_addon(&self, cluster_id: &str, addon: &AddonSpec) -> Result<(), RemoteError>;

    /// Change an add-on's version or values
    async fn update_addon(&self, cluster_id: &str, addon: &AddonSpec) -> Result<(), RemoteError>;

    /// Remove an add-on
    async fn delete_addon(&self, cluster_id: &str, name: &str) -> Result<(), RemoteError>;

    /// Describe an add-on
    async fn describe_addon(&self, cluster_id: &str, name: &str)
        -> Result<StatusReport, RemoteError>;
}
