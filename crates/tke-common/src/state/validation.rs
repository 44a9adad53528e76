//! Structural validation of desired-state documents
//!
//! Everything here runs before any remote call. A document that fails
//! validation never reaches the planner.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use super::desired::{DeployType, DesiredState, NetworkMode};
use crate::{Error, Result};

/// An IPv4 network segment in CIDR notation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Parse `a.b.c.d/n`; host bits must be zero
    pub fn parse(raw: &str) -> Option<Self> {
        let (addr, prefix) = raw.trim().split_once('/')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }
        let network = u32::from(addr);
        let mask = Self::mask(prefix);
        if network & !mask != 0 {
            return None;
        }
        Some(Self { network, prefix })
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    /// Number of addresses in the segment
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// Whether two segments share any address
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        let prefix = self.prefix.min(other.prefix);
        let mask = Self::mask(prefix);
        self.network & mask == other.network & mask
    }
}

impl DesiredState {
    /// Check the document's internal consistency.
    ///
    /// Returns the first violation found, with the offending field path.
    pub fn validate(&self) -> Result<()> {
        let name = self.cluster.name.as_str();
        let fail = |field: &str, msg: String| Err(Error::validation_for_field(name, field, msg));

        if name.trim().is_empty() {
            return fail("cluster.name", "cluster name must not be empty".to_string());
        }
        if self.cluster.version.trim().is_empty() {
            return fail("cluster.version", "cluster version must not be empty".to_string());
        }
        if self.network.vpc_id.trim().is_empty() {
            return fail("network.vpcId", "VPC ID must not be empty".to_string());
        }

        self.validate_network()?;

        let mut worker_names = BTreeSet::new();
        for (i, group) in self.nodes.workers.iter().enumerate() {
            if !worker_names.insert(group.name.as_str()) {
                return fail(
                    &format!("nodes.workers[{}].name", i),
                    format!("duplicate worker group name '{}'", group.name),
                );
            }
            if group.subnet_id.trim().is_empty() {
                return fail(
                    &format!("nodes.workers[{}].subnetId", i),
                    "worker group requires a subnet".to_string(),
                );
            }
        }

        let mut instance_ids = BTreeSet::new();
        for id in self.existing_instance_ids() {
            if !instance_ids.insert(id) {
                return fail(
                    "nodes.existing",
                    format!("instance '{}' is listed more than once", id),
                );
            }
        }

        let mut pool_names = BTreeSet::new();
        for (i, pool) in self.node_pools.iter().enumerate() {
            let field = |f: &str| format!("nodePools[{}].{}", i, f);
            if !pool_names.insert(pool.name.as_str()) {
                return fail(&field("name"), format!("duplicate node pool name '{}'", pool.name));
            }
            if pool.subnet_ids.is_empty() {
                return fail(&field("subnetIds"), "node pool requires at least one subnet".to_string());
            }
            if pool.min_size > pool.max_size {
                return fail(
                    &field("minSize"),
                    format!("minSize {} exceeds maxSize {}", pool.min_size, pool.max_size),
                );
            }
            if let Some(desired) = pool.desired_capacity {
                if desired < pool.min_size || desired > pool.max_size {
                    return fail(
                        &field("desiredCapacity"),
                        format!(
                            "desiredCapacity {} must be between minSize {} and maxSize {}",
                            desired, pool.min_size, pool.max_size
                        ),
                    );
                }
            }
        }

        let mut serverless_names = BTreeSet::new();
        for (i, pool) in self.serverless_pools.iter().enumerate() {
            if !serverless_names.insert(pool.name.as_str()) {
                return fail(
                    &format!("serverlessPools[{}].name", i),
                    format!("duplicate serverless pool name '{}'", pool.name),
                );
            }
            if pool.subnet_ids.is_empty() {
                return fail(
                    &format!("serverlessPools[{}].subnetIds", i),
                    "serverless pool requires at least one subnet".to_string(),
                );
            }
        }

        if let Some(private) = &self.endpoints.private {
            if private.subnet_id.trim().is_empty() {
                return fail(
                    "endpoints.private.subnetId",
                    "intranet endpoint requires a subnet".to_string(),
                );
            }
        }
        if let Some(public) = &self.endpoints.public {
            if !public.security_policies.is_empty()
                && self.cluster.deploy_type != DeployType::Managed
            {
                return fail(
                    "endpoints.public.securityPolicies",
                    "security policies are only supported for managed clusters".to_string(),
                );
            }
        }
        if self.endpoints.any() && self.requested_nodes() == 0 {
            return fail(
                "endpoints",
                "opening an endpoint requires at least one node".to_string(),
            );
        }

        if let Some(auth) = &self.features.auth {
            if !auth.use_tke_default && (auth.issuer.is_none() || auth.jwks_uri.is_none()) {
                return fail(
                    "features.auth",
                    "issuer and jwksUri are required unless useTkeDefault is set".to_string(),
                );
            }
        }

        let mut addon_names = BTreeSet::new();
        for (i, addon) in self.addons.iter().enumerate() {
            if !addon_names.insert(addon.name.as_str()) {
                return fail(
                    &format!("addons[{}].name", i),
                    format!("duplicate add-on name '{}'", addon.name),
                );
            }
            if addon.version.trim().is_empty() {
                return fail(
                    &format!("addons[{}].version", i),
                    "add-on version must not be empty".to_string(),
                );
            }
        }

        Ok(())
    }

    fn validate_network(&self) -> Result<()> {
        let name = self.cluster.name.as_str();
        let net = &self.network;
        let fail = |field: &str, msg: String| Err(Error::validation_for_field(name, field, msg));

        match net.mode {
            NetworkMode::Routed => {
                if net.cluster_cidr.is_none() {
                    return fail(
                        "network.clusterCidr",
                        "required when network mode is routed".to_string(),
                    );
                }
                if net.eni.is_some() {
                    return fail(
                        "network.eni",
                        "not allowed when network mode is routed".to_string(),
                    );
                }
            }
            NetworkMode::EniDirect => {
                if net.cluster_cidr.is_some() {
                    return fail(
                        "network.clusterCidr",
                        "not allowed when network mode is eniDirect".to_string(),
                    );
                }
                match &net.eni {
                    Some(eni) if !eni.subnet_ids.is_empty() => {}
                    _ => {
                        return fail(
                            "network.eni.subnetIds",
                            "required when network mode is eniDirect".to_string(),
                        )
                    }
                }
            }
            NetworkMode::Overlay => {
                if net.cluster_cidr.is_some() || net.eni.is_some() {
                    return fail(
                        "network",
                        "clusterCidr and eni are not allowed when network mode is overlay"
                            .to_string(),
                    );
                }
            }
        }

        if net.max_pods_per_node == 0 {
            return fail(
                "network.maxPodsPerNode",
                "must be greater than zero".to_string(),
            );
        }

        let cluster_cidr = match &net.cluster_cidr {
            Some(raw) => {
                let Some(cidr) = Ipv4Cidr::parse(raw) else {
                    return fail(
                        "network.clusterCidr",
                        format!("'{}' is not a valid network segment", raw),
                    );
                };
                if cidr.size() <= u64::from(net.max_pods_per_node) {
                    return fail(
                        "network.clusterCidr",
                        format!(
                            "'{}' is too small for {} pods per node",
                            raw, net.max_pods_per_node
                        ),
                    );
                }
                Some(cidr)
            }
            None => None,
        };

        if let Some(raw) = &net.service_cidr {
            let Some(service) = Ipv4Cidr::parse(raw) else {
                return fail(
                    "network.serviceCidr",
                    format!("'{}' is not a valid network segment", raw),
                );
            };
            if cluster_cidr.is_some_and(|c| c.overlaps(&service)) {
                return fail(
                    "network.serviceCidr",
                    format!("'{}' overlaps the cluster CIDR", raw),
                );
            }
        }

        Ok(())
    }
}
