//! Mutation planning
//!
//! [`plan`] diffs a desired-state document against the last observed state
//! and returns the ordered list of mutations that would close the gap. It is a
//! pure function: it never talks to the remote side, so a plan can be shown
//! to an operator before anything is applied.
//!
//! Operations come out sorted by [`Stage`]. Within a stage they keep the
//! order the diff produced them in, which is where per-resource ordering
//! rules (bounds before capacity, disable before enable, endpoint order,
//! add-on document order) are expressed.

mod cluster;
mod nodes;
mod operation;
mod satellites;

pub use operation::{FeatureKind, Operation, OperationKind, Payload, ResourceRef, Stage};

use tke_common::state::{DesiredState, ObservedState};
use tke_common::Result;
use tracing::debug;

/// Plan the mutations that take `observed` to `desired`.
///
/// With no observed state the cluster does not exist yet: the plan starts
/// with its creation and every satellite resource is planned from scratch.
/// A document that fails validation or changes an immutable field produces
/// an error and no operations.
pub fn plan(desired: &DesiredState, observed: Option<&ObservedState>) -> Result<Vec<Operation>> {
    desired.validate()?;

    let mut ops = Vec::new();
    let baseline;
    let observed = match observed {
        Some(observed) => {
            cluster::check_immutable(desired, observed)?;
            cluster::diff_cluster(desired, observed, &mut ops);
            cluster::diff_network(desired, observed, &mut ops)?;
            observed
        }
        None => {
            ops.push(Operation::new(
                OperationKind::Create,
                ResourceRef::Cluster { id: None },
                Payload::NewCluster {
                    cluster: desired.cluster.clone(),
                    network: desired.network.clone(),
                },
            ));
            baseline = ObservedState::created(String::new(), desired);
            &baseline
        }
    };

    nodes::diff_instances(desired, observed, &mut ops)?;
    nodes::diff_node_pools(desired, observed, &mut ops)?;
    nodes::diff_serverless_pools(desired, observed, &mut ops)?;
    satellites::diff_endpoints(desired, observed, &mut ops)?;
    satellites::diff_features(desired, observed, &mut ops);
    satellites::diff_addons(desired, observed, &mut ops);

    ops.sort_by_key(Operation::stage);
    debug!(cluster = %desired.cluster.name, operations = ops.len(), "planned");
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EndpointKind;
    use tke_common::phase::{
        AddonPhase, ClusterPhase, EndpointPhase, InstancePhase, NodePoolPhase, ScalingPhase,
    };
    use tke_common::state::{
        EndpointOrder, EndpointStatus, NetworkMode, NodePoolStatus, PrivateEndpointSpec,
        RemoteObject, WorkerGroupStatus,
    };
    use tke_common::Error;

    const ROUTED: &str = r#"
cluster:
  name: prod
  version: "1.28.3"
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
endpoints:
  public: {}
addons:
  - name: X
    version: "1.0"
"#;

    fn desired() -> DesiredState {
        DesiredState::from_yaml_str(ROUTED).unwrap()
    }

    /// Observed state matching `desired` exactly, everything settled
    fn converged(desired: &DesiredState) -> ObservedState {
        let mut observed = ObservedState::created("cls-1", desired);
        observed.cluster.phase = ClusterPhase::Running;
        for group in &desired.nodes.workers {
            observed.workers.insert(
                group.name.clone(),
                WorkerGroupStatus {
                    spec: group.clone(),
                    instances: (0..group.count)
                        .map(|i| RemoteObject::new(format!("ins-{i}"), InstancePhase::Running))
                        .collect(),
                },
            );
        }
        for pool in &desired.node_pools {
            observed.node_pools.push(NodePoolStatus {
                pool: RemoteObject::new(format!("np-{}", pool.name), NodePoolPhase::Normal),
                scaling: ScalingPhase::settled(pool.enable_auto_scale),
                spec: pool.clone(),
            });
        }
        if let Some(public) = &desired.endpoints.public {
            observed.endpoints.public = Some(EndpointStatus {
                phase: EndpointPhase::Created,
                spec: public.clone(),
            });
        }
        observed.features = desired.features.clone();
        for addon in &desired.addons {
            observed.upsert_addon(addon.clone(), AddonPhase::Succeed);
        }
        observed
    }

    fn stages(ops: &[Operation]) -> Vec<Stage> {
        ops.iter().map(Operation::stage).collect()
    }

    // ==========================================================================
    // Story Tests: fresh clusters
    // ==========================================================================

    /// Story: a new routed cluster is created, then its nodes, endpoint and add-on
    #[test]
    fn story_fresh_cluster_plans_everything_in_dependency_order() {
        let ops = plan(&desired(), None).unwrap();

        assert_eq!(
            stages(&ops),
            vec![Stage::Cluster, Stage::Instances, Stage::Endpoints, Stage::Addons]
        );
        assert_eq!(
            ops[0].to_string(),
            "create cluster (routed, cidr=10.31.0.0/16)"
        );
        assert!(matches!(
            ops[1].payload,
            Payload::WorkerGroup { count: 2, .. }
        ));
        assert_eq!(ops[2].target, ResourceRef::Endpoint { kind: EndpointKind::Public });
        assert_eq!(ops[3].to_string(), "create add-on X (version=1.0)");
        assert!(ops.iter().all(|op| op.kind == OperationKind::Create));
    }

    #[test]
    fn invalid_document_plans_nothing() {
        let mut desired = desired();
        desired.network.cluster_cidr = None;
        let err = plan(&desired, None).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn private_endpoint_follows_configured_order() {
        let mut desired = desired();
        desired.endpoints.private = Some(PrivateEndpointSpec {
            subnet_id: "subnet-1".to_string(),
        });
        desired.endpoints.order = EndpointOrder::PrivateFirst;

        let ops = plan(&desired, None).unwrap();
        let endpoints: Vec<&ResourceRef> = ops
            .iter()
            .filter(|op| op.stage() == Stage::Endpoints)
            .map(|op| &op.target)
            .collect();
        assert_eq!(
            endpoints,
            vec![
                &ResourceRef::Endpoint { kind: EndpointKind::Private },
                &ResourceRef::Endpoint { kind: EndpointKind::Public },
            ]
        );
    }

    // ==========================================================================
    // Story Tests: existing clusters
    // ==========================================================================

    /// Story: a second run against its own output plans nothing
    #[test]
    fn story_converged_state_plans_no_operations() {
        let desired = desired();
        let ops = plan(&desired, Some(&converged(&desired))).unwrap();
        assert!(ops.is_empty(), "unexpected operations: {ops:?}");
    }

    /// Story: changing the pod CIDR of a routed cluster is rejected outright
    #[test]
    fn story_cidr_change_is_immutable() {
        let desired = desired();
        let mut observed = converged(&desired);
        observed.network.cluster_cidr = Some("10.32.0.0/16".to_string());

        match plan(&desired, Some(&observed)).unwrap_err() {
            Error::Immutable {
                field,
                observed,
                desired,
            } => {
                assert_eq!(field, "network.clusterCidr");
                assert_eq!(observed, "10.32.0.0/16");
                assert_eq!(desired, "10.31.0.0/16");
            }
            other => panic!("expected immutable error, got {other:?}"),
        }
    }

    #[test]
    fn downgrade_is_rejected() {
        let desired = desired();
        let mut observed = converged(&desired);
        observed.spec.version = "1.30.0".to_string();
        let err = plan(&desired, Some(&observed)).unwrap_err();
        assert!(matches!(err, Error::Immutable { ref field, .. } if field == "cluster.version"));
    }

    #[test]
    fn upgrade_is_a_single_cluster_modify() {
        let desired = desired();
        let mut observed = converged(&desired);
        observed.spec.version = "1.26.1".to_string();

        let ops = plan(&desired, Some(&observed)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].to_string(), "modify cluster cls-1 (1.26.1 -> 1.28.3)");
    }

    #[test]
    fn tags_and_attributes_are_batched() {
        let mut desired = desired();
        desired.cluster.tags.insert("team".into(), "infra".into());
        desired.cluster.tags.insert("env".into(), "prod".into());
        desired.cluster.description = "production".into();
        let observed = converged(&self::desired());

        let ops = plan(&desired, Some(&observed)).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0].payload, Payload::ClusterAttributes(_)));
        assert!(matches!(&ops[1].payload, Payload::Tags(tags) if tags.len() == 2));
    }

    #[test]
    fn scale_down_removes_newest_instances() {
        let mut desired = desired();
        let observed = converged(&desired);
        desired.nodes.workers[0].count = 1;

        let ops = plan(&desired, Some(&observed)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Delete);
        assert_eq!(ops[0].payload, Payload::RemoveInstances(vec!["ins-1".into()]));
    }

    #[test]
    fn failed_addon_is_updated_again() {
        let desired = desired();
        let mut observed = converged(&desired);
        observed.upsert_addon(desired.addons[0].clone(), AddonPhase::Failed);

        let ops = plan(&desired, Some(&observed)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Modify);
    }

    #[test]
    fn removed_addon_is_deleted_after_new_ones() {
        let mut desired = desired();
        let observed = converged(&desired);
        desired.addons[0].name = "Y".into();

        let ops = plan(&desired, Some(&observed)).unwrap();
        let described: Vec<String> = ops.iter().map(ToString::to_string).collect();
        assert_eq!(
            described,
            vec!["create add-on Y (version=1.0)", "delete add-on X"]
        );
    }

    // ==========================================================================
    // Story Tests: node pools
    // ==========================================================================

    fn with_pool() -> DesiredState {
        let yaml = format!(
            "{ROUTED}nodePools:\n  - name: pool-a\n    instanceType: S5.LARGE8\n    subnetIds: [subnet-1]\n    minSize: 1\n    maxSize: 3\n    desiredCapacity: 2\n"
        );
        DesiredState::from_yaml_str(&yaml).unwrap()
    }

    /// Story: raising the bounds and capacity together changes bounds first
    #[test]
    fn story_bounds_land_before_capacity() {
        let observed = converged(&with_pool());
        let mut desired = with_pool();
        desired.node_pools[0].max_size = 10;
        desired.node_pools[0].desired_capacity = Some(8);

        let ops = plan(&desired, Some(&observed)).unwrap();
        let payloads: Vec<&Payload> = ops.iter().map(|op| &op.payload).collect();
        assert_eq!(
            payloads,
            vec![
                &Payload::Bounds {
                    min_size: 1,
                    max_size: 10
                },
                &Payload::DesiredCapacity(8),
            ]
        );
    }

    #[test]
    fn pool_metadata_changes_are_one_operation() {
        let observed = converged(&with_pool());
        let mut desired = with_pool();
        let pool = &mut desired.node_pools[0];
        pool.labels.insert("tier".into(), "web".into());
        pool.tags.insert("team".into(), "infra".into());

        let ops = plan(&desired, Some(&observed)).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].payload, Payload::NodePoolMetadata(_)));
    }

    #[test]
    fn pool_instance_type_is_immutable() {
        let observed = converged(&with_pool());
        let mut desired = with_pool();
        desired.node_pools[0].instance_type = "S5.XLARGE16".into();
        let err = plan(&desired, Some(&observed)).unwrap_err();
        assert!(err.is_planning_error());
    }

    // ==========================================================================
    // Story Tests: ENI-direct networking
    // ==========================================================================

    fn eni_direct() -> DesiredState {
        let yaml = ROUTED.replace(
            "  mode: routed\n  clusterCidr: 10.31.0.0/16\n",
            "  mode: eniDirect\n  eni:\n    subnetIds: [subnet-2]\n",
        );
        DesiredState::from_yaml_str(&yaml).unwrap()
    }

    /// Story: a routed cluster is switched to ENI-direct in one network step
    #[test]
    fn story_enable_eni_on_routed_cluster() {
        let observed = converged(&desired());
        let ops = plan(&eni_direct(), Some(&observed)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::EnableFeature);
        assert_eq!(ops[0].target, ResourceRef::Network);
    }

    #[test]
    fn eni_subnets_can_only_be_added() {
        let observed = converged(&eni_direct());
        assert_eq!(observed.network.mode, NetworkMode::EniDirect);

        let mut grown = eni_direct();
        if let Some(eni) = grown.network.eni.as_mut() {
            eni.subnet_ids.push("subnet-3".into());
        }
        let ops = plan(&grown, Some(&observed)).unwrap();
        assert_eq!(ops[0].payload, Payload::AddEniSubnets(vec!["subnet-3".into()]));

        let mut shrunk = eni_direct();
        if let Some(eni) = shrunk.network.eni.as_mut() {
            eni.subnet_ids = vec!["subnet-3".into()];
        }
        let err = plan(&shrunk, Some(&observed)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn leaving_eni_direct_disables_it() {
        // A routed cluster switched to ENI-direct keeps its pod CIDR
        let mut observed = converged(&eni_direct());
        observed.network.cluster_cidr = Some("10.31.0.0/16".to_string());
        let ops = plan(&desired(), Some(&observed)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].payload, Payload::DisableEni);
    }

    #[test]
    fn failed_endpoint_is_created_again() {
        let desired = desired();
        let mut observed = converged(&desired);
        if let Some(public) = observed.endpoints.public.as_mut() {
            public.phase = EndpointPhase::CreateFailed;
        }
        let ops = plan(&desired, Some(&observed)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Create);
    }
}
