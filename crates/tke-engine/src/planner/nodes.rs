//! Instance, node-pool and serverless-pool diffs

use std::collections::BTreeSet;

use tke_common::state::{DesiredState, ExistingInstancesSpec, ObservedState};
use tke_common::{Error, Result};

use super::operation::{Operation, OperationKind, Payload, ResourceRef};

/// Worker groups scale by count; surplus instances are removed newest first.
/// Pre-existing instances are attached or removed by ID. Labels and images of
/// worker groups only apply to instances created after the change.
pub(super) fn diff_instances(
    desired: &DesiredState,
    observed: &ObservedState,
    ops: &mut Vec<Operation>,
) -> Result<()> {
    for group in &desired.nodes.workers {
        let target = || ResourceRef::Instances {
            group: Some(group.name.clone()),
        };
        let Some(status) = observed.workers.get(&group.name) else {
            if group.count > 0 {
                ops.push(Operation::new(
                    OperationKind::Create,
                    target(),
                    Payload::WorkerGroup {
                        spec: group.clone(),
                        count: group.count,
                    },
                ));
            }
            continue;
        };

        if group.instance_type != status.spec.instance_type {
            return Err(Error::immutable(
                format!("nodes.workers.{}.instanceType", group.name),
                &status.spec.instance_type,
                &group.instance_type,
            ));
        }
        if group.subnet_id != status.spec.subnet_id {
            return Err(Error::immutable(
                format!("nodes.workers.{}.subnetId", group.name),
                &status.spec.subnet_id,
                &group.subnet_id,
            ));
        }

        let have = status.instances.len();
        let want = group.count as usize;
        if want > have {
            ops.push(Operation::new(
                OperationKind::Create,
                target(),
                Payload::WorkerGroup {
                    spec: group.clone(),
                    count: (want - have) as u32,
                },
            ));
        } else if want < have {
            let surplus = status.instances[want..]
                .iter()
                .map(|i| i.id.clone())
                .collect();
            ops.push(Operation::new(
                OperationKind::Delete,
                target(),
                Payload::RemoveInstances(surplus),
            ));
        }
    }

    for (name, status) in &observed.workers {
        if desired.nodes.workers.iter().any(|g| &g.name == name) || status.instances.is_empty() {
            continue;
        }
        ops.push(Operation::new(
            OperationKind::Delete,
            ResourceRef::Instances {
                group: Some(name.clone()),
            },
            Payload::RemoveInstances(status.instances.iter().map(|i| i.id.clone()).collect()),
        ));
    }

    let attached: BTreeSet<&str> = observed.existing.iter().map(|i| i.id.as_str()).collect();
    for entry in &desired.nodes.existing {
        let missing: Vec<String> = entry
            .instance_ids
            .iter()
            .filter(|id| !attached.contains(id.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            continue;
        }
        ops.push(Operation::new(
            OperationKind::Create,
            ResourceRef::Instances { group: None },
            Payload::AttachInstances(ExistingInstancesSpec {
                instance_ids: missing,
                key_ids: entry.key_ids.clone(),
                labels: entry.labels.clone(),
            }),
        ));
    }

    let wanted: BTreeSet<&str> = desired.existing_instance_ids().collect();
    let detached: Vec<String> = observed
        .existing
        .iter()
        .filter(|i| !wanted.contains(i.id.as_str()))
        .map(|i| i.id.clone())
        .collect();
    if !detached.is_empty() {
        ops.push(Operation::new(
            OperationKind::Delete,
            ResourceRef::Instances { group: None },
            Payload::RemoveInstances(detached),
        ));
    }

    Ok(())
}

/// Node pools: create, delete, and for kept pools one batched metadata
/// update, the autoscaling toggle, then bounds before desired capacity.
pub(super) fn diff_node_pools(
    desired: &DesiredState,
    observed: &ObservedState,
    ops: &mut Vec<Operation>,
) -> Result<()> {
    for pool in &desired.node_pools {
        let Some(status) = observed.node_pool(&pool.name) else {
            ops.push(Operation::new(
                OperationKind::Create,
                ResourceRef::NodePool {
                    name: pool.name.clone(),
                    id: None,
                },
                Payload::NodePool(pool.clone()),
            ));
            continue;
        };

        if pool.instance_type != status.spec.instance_type {
            return Err(Error::immutable(
                format!("nodePools.{}.instanceType", pool.name),
                &status.spec.instance_type,
                &pool.instance_type,
            ));
        }
        if pool.subnet_ids != status.spec.subnet_ids {
            return Err(Error::immutable(
                format!("nodePools.{}.subnetIds", pool.name),
                status.spec.subnet_ids.join(","),
                pool.subnet_ids.join(","),
            ));
        }

        let target = || ResourceRef::NodePool {
            name: pool.name.clone(),
            id: Some(status.pool.id.clone()),
        };

        if pool.metadata_differs(&status.spec) {
            ops.push(Operation::new(
                OperationKind::Modify,
                target(),
                Payload::NodePoolMetadata(pool.clone()),
            ));
        }

        if pool.enable_auto_scale != status.spec.enable_auto_scale {
            let kind = if pool.enable_auto_scale {
                OperationKind::EnableFeature
            } else {
                OperationKind::DisableFeature
            };
            ops.push(Operation::new(kind, target(), Payload::AutoScaling));
        }

        // The remote side rejects a capacity that transiently violates the
        // bounds, so bounds always land first.
        if pool.bounds_differ(&status.spec) {
            ops.push(Operation::new(
                OperationKind::Modify,
                target(),
                Payload::Bounds {
                    min_size: pool.min_size,
                    max_size: pool.max_size,
                },
            ));
        }
        if let Some(capacity) = pool.desired_capacity {
            if Some(capacity) != status.spec.desired_capacity {
                ops.push(Operation::new(
                    OperationKind::Modify,
                    target(),
                    Payload::DesiredCapacity(capacity),
                ));
            }
        }
    }

    for status in &observed.node_pools {
        if desired.node_pools.iter().any(|p| p.name == status.spec.name) {
            continue;
        }
        ops.push(Operation::new(
            OperationKind::Delete,
            ResourceRef::NodePool {
                name: status.spec.name.clone(),
                id: Some(status.pool.id.clone()),
            },
            Payload::None,
        ));
    }

    Ok(())
}

pub(super) fn diff_serverless_pools(
    desired: &DesiredState,
    observed: &ObservedState,
    ops: &mut Vec<Operation>,
) -> Result<()> {
    for pool in &desired.serverless_pools {
        let existing = observed
            .serverless_pools
            .iter()
            .find(|s| s.spec.name == pool.name);
        let Some(status) = existing else {
            ops.push(Operation::new(
                OperationKind::Create,
                ResourceRef::ServerlessPool {
                    name: pool.name.clone(),
                    id: None,
                },
                Payload::ServerlessPool(pool.clone()),
            ));
            continue;
        };

        if pool.subnet_ids != status.spec.subnet_ids {
            return Err(Error::immutable(
                format!("serverlessPools.{}.subnetIds", pool.name),
                status.spec.subnet_ids.join(","),
                pool.subnet_ids.join(","),
            ));
        }
        if pool != &status.spec {
            ops.push(Operation::new(
                OperationKind::Modify,
                ResourceRef::ServerlessPool {
                    name: pool.name.clone(),
                    id: Some(status.pool.id.clone()),
                },
                Payload::ServerlessPool(pool.clone()),
            ));
        }
    }

    for status in &observed.serverless_pools {
        if desired
            .serverless_pools
            .iter()
            .any(|p| p.name == status.spec.name)
        {
            continue;
        }
        ops.push(Operation::new(
            OperationKind::Delete,
            ResourceRef::ServerlessPool {
                name: status.spec.name.clone(),
                id: Some(status.pool.id.clone()),
            },
            Payload::None,
        ));
    }

    Ok(())
}
