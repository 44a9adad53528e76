//! Cluster-level and network diffs, plus the immutable-field gate

use std::cmp::Ordering;

use tke_common::state::{DesiredState, NetworkMode, ObservedState};
use tke_common::{Error, Result};

use super::operation::{Operation, OperationKind, Payload, ResourceRef};

/// Reject any change to a field that cannot change after creation.
///
/// Runs before any diff so that a rejected document produces no operations.
pub(super) fn check_immutable(desired: &DesiredState, observed: &ObservedState) -> Result<()> {
    let want = &desired.network;
    let have = &observed.network;

    if want.vpc_id != have.vpc_id {
        return Err(Error::immutable("network.vpcId", &have.vpc_id, &want.vpc_id));
    }
    if desired.cluster.deploy_type != observed.spec.deploy_type {
        return Err(Error::immutable(
            "cluster.deployType",
            observed.spec.deploy_type,
            desired.cluster.deploy_type,
        ));
    }
    if want.max_pods_per_node != have.max_pods_per_node {
        return Err(Error::immutable(
            "network.maxPodsPerNode",
            have.max_pods_per_node,
            want.max_pods_per_node,
        ));
    }
    if want.max_services != have.max_services {
        return Err(Error::immutable(
            "network.maxServices",
            have.max_services,
            want.max_services,
        ));
    }
    if want.service_cidr.is_some() && want.service_cidr != have.service_cidr {
        return Err(Error::immutable(
            "network.serviceCidr",
            display_opt(&have.service_cidr),
            display_opt(&want.service_cidr),
        ));
    }

    let overlay = |mode: NetworkMode| mode == NetworkMode::Overlay;
    if want.mode != have.mode && (overlay(want.mode) || overlay(have.mode)) {
        return Err(Error::immutable("network.mode", have.mode, want.mode));
    }

    // A routed cluster keeps its CIDR while ENI-direct is on, so going back
    // to routed must name the same one.
    if want.mode == NetworkMode::Routed && want.cluster_cidr != have.cluster_cidr {
        return Err(Error::immutable(
            "network.clusterCidr",
            display_opt(&have.cluster_cidr),
            display_opt(&want.cluster_cidr),
        ));
    }

    let version_order = compare_versions(&desired.cluster.version, &observed.spec.version);
    if version_order == Some(Ordering::Less) {
        return Err(Error::immutable(
            "cluster.version",
            &observed.spec.version,
            format!("{} (downgrade)", desired.cluster.version),
        ));
    }

    Ok(())
}

fn display_opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<none>")
}

/// Compare dotted numeric versions; suffixes after the numeric part are ignored
pub(super) fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    fn parts(v: &str) -> Option<Vec<u64>> {
        v.trim_start_matches('v')
            .split(['.', '-', '+'])
            .take(3)
            .map(|p| p.parse::<u64>().ok())
            .collect()
    }
    Some(parts(a)?.cmp(&parts(b)?))
}

pub(super) fn diff_cluster(
    desired: &DesiredState,
    observed: &ObservedState,
    ops: &mut Vec<Operation>,
) {
    let want = &desired.cluster;
    let have = &observed.spec;
    let target = || ResourceRef::Cluster {
        id: Some(observed.cluster.id.clone()),
    };

    if want.name != have.name
        || want.description != have.description
        || want.project_id != have.project_id
    {
        ops.push(Operation::new(
            OperationKind::Modify,
            target(),
            Payload::ClusterAttributes(want.clone()),
        ));
    }

    if want.tags != have.tags {
        ops.push(Operation::new(
            OperationKind::Modify,
            target(),
            Payload::Tags(want.tags.clone()),
        ));
    }

    if want.deletion_protection != have.deletion_protection {
        let kind = if want.deletion_protection {
            OperationKind::EnableFeature
        } else {
            OperationKind::DisableFeature
        };
        ops.push(Operation::new(kind, target(), Payload::DeletionProtection));
    }

    if want.version != have.version {
        ops.push(Operation::new(
            OperationKind::Modify,
            target(),
            Payload::Version {
                from: have.version.clone(),
                to: want.version.clone(),
            },
        ));
    }
}

/// Plan the ENI-direct toggle and subnet additions.
///
/// At most one network operation is planned per pass.
pub(super) fn diff_network(
    desired: &DesiredState,
    observed: &ObservedState,
    ops: &mut Vec<Operation>,
) -> Result<()> {
    let want = &desired.network;
    let have = &observed.network;

    match (have.mode, want.mode) {
        (NetworkMode::EniDirect, NetworkMode::Routed) => {
            ops.push(Operation::new(
                OperationKind::DisableFeature,
                ResourceRef::Network,
                Payload::DisableEni,
            ));
        }
        (NetworkMode::Routed, NetworkMode::EniDirect) => {
            if let Some(eni) = &want.eni {
                ops.push(Operation::new(
                    OperationKind::EnableFeature,
                    ResourceRef::Network,
                    Payload::Eni(eni.clone()),
                ));
            }
        }
        (NetworkMode::EniDirect, NetworkMode::EniDirect) => {
            let (Some(want_eni), Some(have_eni)) = (&want.eni, &have.eni) else {
                return Ok(());
            };
            if want_eni.eni_type != have_eni.eni_type {
                return Err(Error::immutable(
                    "network.eni.eniType",
                    have_eni.eni_type,
                    want_eni.eni_type,
                ));
            }
            if want_eni.claim_expiry_seconds != have_eni.claim_expiry_seconds {
                return Err(Error::immutable(
                    "network.eni.claimExpirySeconds",
                    have_eni.claim_expiry_seconds,
                    want_eni.claim_expiry_seconds,
                ));
            }
            let removed: Vec<&String> = have_eni
                .subnet_ids
                .iter()
                .filter(|s| !want_eni.subnet_ids.contains(*s))
                .collect();
            if !removed.is_empty() {
                return Err(Error::validation_for_field(
                    &desired.cluster.name,
                    "network.eni.subnetIds",
                    format!(
                        "ENI subnets can only be added; switch to routed mode to remove {:?}",
                        removed
                    ),
                ));
            }
            let added: Vec<String> = want_eni
                .subnet_ids
                .iter()
                .filter(|s| !have_eni.subnet_ids.contains(*s))
                .cloned()
                .collect();
            if !added.is_empty() {
                ops.push(Operation::new(
                    OperationKind::Modify,
                    ResourceRef::Network,
                    Payload::AddEniSubnets(added),
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        assert_eq!(compare_versions("1.28.3", "1.26.1"), Some(Ordering::Greater));
        assert_eq!(compare_versions("1.26.1", "1.28.3"), Some(Ordering::Less));
        assert_eq!(compare_versions("v1.28.3", "1.28.3"), Some(Ordering::Equal));
        assert_eq!(compare_versions("1.30.0-tke.1", "1.28.3"), Some(Ordering::Greater));
        assert_eq!(compare_versions("latest", "1.28.3"), None);
    }
}
