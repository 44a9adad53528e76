//! In-memory control plane for scenario tests.
//!
//! Every object walks through a short script of phases, one per describe
//! call, and then stays in its last phase. Scripts ending in [`GONE`] make the
//! object disappear once reached. Every call is logged so tests can assert on
//! ordering and on the absence of mutations.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use tke_common::state::{
    AddonSpec, AuditSpec, AuthSpec, ClusterSpec, EniSpec, ExistingInstancesSpec, LogSpec,
    NodePoolSpec, PrivateEndpointSpec, PublicEndpointSpec, ServerlessPoolSpec, WorkerGroupSpec,
};
use tke_common::RemoteError;

use crate::client::{
    CreateClusterRequest, EndpointKind, InstanceReport, NodePoolReport, StatusReport, TkeApi,
    UpgradeType,
};

/// Script step after which the object no longer exists
pub(crate) const GONE: &str = "<gone>";

#[derive(Clone, Debug)]
struct Scripted {
    script: VecDeque<String>,
    settled: String,
}

impl Scripted {
    fn new(steps: &[&str]) -> Self {
        let mut script: VecDeque<String> = steps.iter().map(|s| s.to_string()).collect();
        let settled = script.pop_back().unwrap_or_default();
        Self { script, settled }
    }

    fn next(&mut self) -> String {
        self.script
            .pop_front()
            .unwrap_or_else(|| self.settled.clone())
    }
}

#[derive(Default)]
struct Remote {
    calls: Vec<String>,
    next_id: u32,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,

    cluster: Option<Scripted>,
    instances: BTreeMap<String, Scripted>,
    node_pools: BTreeMap<String, (Scripted, Scripted)>,
    serverless_pools: BTreeMap<String, Scripted>,
    endpoints: HashMap<EndpointKind, Scripted>,
    addons: BTreeMap<String, Scripted>,

    cluster_script: Option<Vec<&'static str>>,
    instance_script: Option<Vec<&'static str>>,
    endpoint_script: Option<Vec<&'static str>>,
    addon_scripts: BTreeMap<String, Vec<&'static str>>,
    upgradable_major: Vec<String>,
    upgradable_hot: Vec<String>,
    instant_delete: bool,
}

impl Remote {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn call(&mut self, method: &'static str, detail: &str) -> Result<(), RemoteError> {
        if detail.is_empty() {
            self.calls.push(method.to_string());
        } else {
            self.calls.push(format!("{}:{}", method, detail));
        }
        match self.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Script a deleted object follows
    fn deletion(&self, deleting: &str) -> Scripted {
        if self.instant_delete {
            Scripted::new(&[GONE])
        } else {
            Scripted::new(&[deleting, GONE])
        }
    }

    fn instance_script(&self) -> Scripted {
        Scripted::new(
            self.instance_script
                .as_deref()
                .unwrap_or(&["initializing", "running"]),
        )
    }
}

fn observe(object: Option<&mut Scripted>) -> Option<String> {
    let object = object?;
    let phase = object.next();
    (phase != GONE).then_some(phase)
}

/// Stateful fake of the remote control plane
#[derive(Default)]
pub(crate) struct FakeTke {
    remote: Mutex<Remote>,
}

impl FakeTke {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Remote) -> T) -> T {
        f(&mut self.remote.lock().unwrap())
    }

    /// Every call so far, oldest first
    pub(crate) fn calls(&self) -> Vec<String> {
        self.with(|r| r.calls.clone())
    }

    /// Calls that change something remotely
    pub(crate) fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("describe_") && !c.starts_with("upgradable_"))
            .collect()
    }

    /// Fail the next call to `method` with `err`
    pub(crate) fn fail_next(&self, method: &'static str, err: RemoteError) {
        self.with(|r| r.failures.entry(method).or_default().push_back(err));
    }

    /// Phases a newly created cluster reports
    pub(crate) fn script_cluster(&self, steps: &[&'static str]) {
        self.with(|r| r.cluster_script = Some(steps.to_vec()));
    }

    /// Phases new or attached instances report
    pub(crate) fn script_instances(&self, steps: &[&'static str]) {
        self.with(|r| r.instance_script = Some(steps.to_vec()));
    }

    /// Phases a new endpoint reports
    pub(crate) fn script_endpoints(&self, steps: &[&'static str]) {
        self.with(|r| r.endpoint_script = Some(steps.to_vec()));
    }

    /// Phases add-on `name` reports after its next install or update
    pub(crate) fn script_addon(&self, name: &str, steps: &[&'static str]) {
        self.with(|r| r.addon_scripts.insert(name.to_string(), steps.to_vec()));
    }

    /// Phases the scaling group of pool `id` reports from now on
    pub(crate) fn script_scaling(&self, id: &str, steps: &[&str]) {
        self.with(|r| {
            if let Some((_, scaling)) = r.node_pools.get_mut(id) {
                *scaling = Scripted::new(steps);
            }
        });
    }

    /// Deleted objects vanish before the first describe
    pub(crate) fn delete_instantly(&self) {
        self.with(|r| r.instant_delete = true);
    }

    /// Instances eligible for an upgrade strategy
    pub(crate) fn set_upgradable(&self, upgrade: UpgradeType, ids: &[&str]) {
        let ids = ids.iter().map(|s| s.to_string()).collect();
        self.with(|r| match upgrade {
            UpgradeType::Major => r.upgradable_major = ids,
            UpgradeType::Hot => r.upgradable_hot = ids,
        });
    }
}

fn not_found(code: &str) -> RemoteError {
    RemoteError::new(code, "resource not found")
}

#[async_trait]
impl TkeApi for FakeTke {
    async fn create_cluster(&self, request: &CreateClusterRequest) -> Result<String, RemoteError> {
        self.with(|r| {
            r.call("create_cluster", &request.network.mode.to_string())?;
            let steps = r
                .cluster_script
                .clone()
                .unwrap_or_else(|| vec!["Creating", "Running"]);
            r.cluster = Some(Scripted::new(&steps));
            Ok(r.id("cls"))
        })
    }

    async fn describe_cluster(&self, _cluster_id: &str) -> Result<StatusReport, RemoteError> {
        self.with(|r| {
            r.call("describe_cluster", "")?;
            match observe(r.cluster.as_mut()) {
                Some(phase) => Ok(StatusReport::phase(phase)),
                None => {
                    r.cluster = None;
                    Err(not_found("InternalError.ClusterNotFound"))
                }
            }
        })
    }

    async fn modify_cluster_attributes(
        &self,
        _cluster_id: &str,
        spec: &ClusterSpec,
    ) -> Result<(), RemoteError> {
        self.with(|r| r.call("modify_cluster_attributes", &spec.name))
    }

    async fn modify_cluster_tags(
        &self,
        _cluster_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), RemoteError> {
        self.with(|r| r.call("modify_cluster_tags", &tags.len().to_string()))
    }

    async fn set_deletion_protection(
        &self,
        _cluster_id: &str,
        enabled: bool,
    ) -> Result<(), RemoteError> {
        self.with(|r| r.call("set_deletion_protection", &enabled.to_string()))
    }

    async fn upgrade_cluster(&self, _cluster_id: &str, version: &str) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("upgrade_cluster", version)?;
            r.cluster = Some(Scripted::new(&["Upgrading", "Running"]));
            Ok(())
        })
    }

    async fn upgradable_instances(
        &self,
        _cluster_id: &str,
        upgrade: UpgradeType,
    ) -> Result<Vec<String>, RemoteError> {
        self.with(|r| {
            r.call("upgradable_instances", &upgrade.to_string())?;
            Ok(match upgrade {
                UpgradeType::Major => r.upgradable_major.clone(),
                UpgradeType::Hot => r.upgradable_hot.clone(),
            })
        })
    }

    async fn upgrade_instances(
        &self,
        _cluster_id: &str,
        upgrade: UpgradeType,
        instance_ids: &[String],
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call(
                "upgrade_instances",
                &format!("{}:{}", upgrade, instance_ids.join(",")),
            )?;
            r.upgradable_major.clear();
            r.upgradable_hot.clear();
            r.cluster = Some(Scripted::new(&["Upgrading", "Running"]));
            Ok(())
        })
    }

    async fn delete_cluster(&self, _cluster_id: &str) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("delete_cluster", "")?;
            match r.cluster.as_mut() {
                Some(cluster) => {
                    *cluster = Scripted::new(&["Deleting", GONE]);
                    Ok(())
                }
                None => Err(not_found("InternalError.ClusterNotFound")),
            }
        })
    }

    async fn enable_eni(&self, _cluster_id: &str, eni: &EniSpec) -> Result<(), RemoteError> {
        self.with(|r| r.call("enable_eni", &eni.subnet_ids.join(",")))
    }

    async fn add_eni_subnets(
        &self,
        _cluster_id: &str,
        subnet_ids: &[String],
    ) -> Result<(), RemoteError> {
        self.with(|r| r.call("add_eni_subnets", &subnet_ids.join(",")))
    }

    async fn disable_eni(&self, _cluster_id: &str) -> Result<(), RemoteError> {
        self.with(|r| r.call("disable_eni", ""))
    }

    async fn create_instances(
        &self,
        _cluster_id: &str,
        group: &WorkerGroupSpec,
        count: u32,
    ) -> Result<Vec<String>, RemoteError> {
        self.with(|r| {
            r.call("create_instances", &format!("{}:{}", group.name, count))?;
            let mut ids = Vec::new();
            for _ in 0..count {
                let id = r.id("ins");
                let script = r.instance_script();
                r.instances.insert(id.clone(), script);
                ids.push(id);
            }
            Ok(ids)
        })
    }

    async fn attach_instances(
        &self,
        _cluster_id: &str,
        spec: &ExistingInstancesSpec,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("attach_instances", &spec.instance_ids.join(","))?;
            for id in &spec.instance_ids {
                let script = r.instance_script();
                r.instances.insert(id.clone(), script);
            }
            Ok(())
        })
    }

    async fn remove_instances(
        &self,
        _cluster_id: &str,
        instance_ids: &[String],
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("remove_instances", &instance_ids.join(","))?;
            for id in instance_ids {
                r.instances.remove(id);
            }
            Ok(())
        })
    }

    async fn describe_instances(
        &self,
        _cluster_id: &str,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceReport>, RemoteError> {
        self.with(|r| {
            r.call("describe_instances", "")?;
            Ok(instance_ids
                .iter()
                .filter_map(|id| {
                    let state = r.instances.get_mut(id)?.next();
                    let message = if state == "failed" {
                        "instance failed to initialize".to_string()
                    } else {
                        String::new()
                    };
                    Some(InstanceReport {
                        id: id.clone(),
                        state,
                        message,
                    })
                })
                .collect())
        })
    }

    async fn create_node_pool(
        &self,
        _cluster_id: &str,
        spec: &NodePoolSpec,
    ) -> Result<String, RemoteError> {
        self.with(|r| {
            r.call("create_node_pool", &spec.name)?;
            let id = r.id("np");
            let scaling = if spec.enable_auto_scale {
                Scripted::new(&["enabling", "enabled"])
            } else {
                Scripted::new(&["disabled"])
            };
            r.node_pools
                .insert(id.clone(), (Scripted::new(&["creating", "normal"]), scaling));
            Ok(id)
        })
    }

    async fn describe_node_pool(
        &self,
        _cluster_id: &str,
        pool_id: &str,
    ) -> Result<NodePoolReport, RemoteError> {
        self.with(|r| {
            r.call("describe_node_pool", pool_id)?;
            let gone = || RemoteError::new("InternalError.Param", "Not Found");
            let (life, scaling) = r.node_pools.get_mut(pool_id).ok_or_else(gone)?;
            let life_state = life.next();
            if life_state == GONE {
                r.node_pools.remove(pool_id);
                return Err(gone());
            }
            Ok(NodePoolReport {
                life_state,
                autoscaling: scaling.next(),
            })
        })
    }

    async fn modify_node_pool_metadata(
        &self,
        _cluster_id: &str,
        pool_id: &str,
        _spec: &NodePoolSpec,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("modify_node_pool_metadata", pool_id)?;
            if let Some((life, _)) = r.node_pools.get_mut(pool_id) {
                *life = Scripted::new(&["updating", "normal"]);
            }
            Ok(())
        })
    }

    async fn set_node_pool_autoscaling(
        &self,
        _cluster_id: &str,
        pool_id: &str,
        enabled: bool,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("set_node_pool_autoscaling", &enabled.to_string())?;
            if let Some((_, scaling)) = r.node_pools.get_mut(pool_id) {
                *scaling = if enabled {
                    Scripted::new(&["enabling", "enabled"])
                } else {
                    Scripted::new(&["disabling", "disabled"])
                };
            }
            Ok(())
        })
    }

    async fn modify_node_pool_bounds(
        &self,
        _cluster_id: &str,
        pool_id: &str,
        min_size: u32,
        max_size: u32,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("modify_node_pool_bounds", &format!("{}..={}", min_size, max_size))?;
            if let Some((life, _)) = r.node_pools.get_mut(pool_id) {
                *life = Scripted::new(&["updating", "normal"]);
            }
            Ok(())
        })
    }

    async fn modify_node_pool_capacity(
        &self,
        _cluster_id: &str,
        pool_id: &str,
        desired_capacity: u32,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("modify_node_pool_capacity", &desired_capacity.to_string())?;
            if let Some((life, _)) = r.node_pools.get_mut(pool_id) {
                *life = Scripted::new(&["updating", "normal"]);
            }
            Ok(())
        })
    }

    async fn delete_node_pool(&self, _cluster_id: &str, pool_id: &str) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("delete_node_pool", pool_id)?;
            let deletion = r.deletion("deleting");
            match r.node_pools.get_mut(pool_id) {
                Some((life, _)) => {
                    *life = deletion;
                    Ok(())
                }
                None => Err(RemoteError::new("InternalError.Param", "Not Found")),
            }
        })
    }

    async fn create_serverless_pool(
        &self,
        _cluster_id: &str,
        spec: &ServerlessPoolSpec,
    ) -> Result<String, RemoteError> {
        self.with(|r| {
            r.call("create_serverless_pool", &spec.name)?;
            let id = r.id("np");
            r.serverless_pools
                .insert(id.clone(), Scripted::new(&["creating", "normal"]));
            Ok(id)
        })
    }

    async fn describe_serverless_pool(
        &self,
        _cluster_id: &str,
        pool_id: &str,
    ) -> Result<StatusReport, RemoteError> {
        self.with(|r| {
            r.call("describe_serverless_pool", pool_id)?;
            match observe(r.serverless_pools.get_mut(pool_id)) {
                Some(phase) => Ok(StatusReport::phase(phase)),
                None => {
                    r.serverless_pools.remove(pool_id);
                    Err(not_found("ResourceNotFound"))
                }
            }
        })
    }

    async fn modify_serverless_pool(
        &self,
        _cluster_id: &str,
        pool_id: &str,
        _spec: &ServerlessPoolSpec,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("modify_serverless_pool", pool_id)?;
            r.serverless_pools
                .insert(pool_id.to_string(), Scripted::new(&["updating", "normal"]));
            Ok(())
        })
    }

    async fn delete_serverless_pool(
        &self,
        _cluster_id: &str,
        pool_id: &str,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("delete_serverless_pool", pool_id)?;
            let deletion = r.deletion("deleting");
            r.serverless_pools.insert(pool_id.to_string(), deletion);
            Ok(())
        })
    }

    async fn create_public_endpoint(
        &self,
        _cluster_id: &str,
        _spec: &PublicEndpointSpec,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("create_public_endpoint", "")?;
            let steps = r
                .endpoint_script
                .clone()
                .unwrap_or_else(|| vec!["Creating", "Created"]);
            r.endpoints.insert(EndpointKind::Public, Scripted::new(&steps));
            Ok(())
        })
    }

    async fn create_private_endpoint(
        &self,
        _cluster_id: &str,
        spec: &PrivateEndpointSpec,
    ) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("create_private_endpoint", &spec.subnet_id)?;
            let steps = r
                .endpoint_script
                .clone()
                .unwrap_or_else(|| vec!["Creating", "Created"]);
            r.endpoints.insert(EndpointKind::Private, Scripted::new(&steps));
            Ok(())
        })
    }

    async fn modify_public_endpoint(
        &self,
        _cluster_id: &str,
        spec: &PublicEndpointSpec,
    ) -> Result<(), RemoteError> {
        self.with(|r| r.call("modify_public_endpoint", &spec.security_policies.join(",")))
    }

    async fn delete_endpoint(&self, _cluster_id: &str, kind: EndpointKind) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("delete_endpoint", &kind.to_string())?;
            if r.instant_delete {
                r.endpoints.remove(&kind);
            } else {
                r.endpoints.insert(kind, Scripted::new(&["Deleting", "Deleted"]));
            }
            Ok(())
        })
    }

    async fn describe_endpoint(
        &self,
        _cluster_id: &str,
        kind: EndpointKind,
    ) -> Result<StatusReport, RemoteError> {
        self.with(|r| {
            r.call("describe_endpoint", &kind.to_string())?;
            let phase = r
                .endpoints
                .get_mut(&kind)
                .map(Scripted::next)
                .unwrap_or_else(|| "NotFound".to_string());
            Ok(StatusReport::phase(phase))
        })
    }

    async fn modify_auth_options(
        &self,
        _cluster_id: &str,
        _auth: &AuthSpec,
    ) -> Result<(), RemoteError> {
        self.with(|r| r.call("modify_auth_options", ""))
    }

    async fn enable_log(&self, _cluster_id: &str, log: &LogSpec) -> Result<(), RemoteError> {
        self.with(|r| r.call("enable_log", log.topic_id.as_deref().unwrap_or_default()))
    }

    async fn disable_log(&self, _cluster_id: &str) -> Result<(), RemoteError> {
        self.with(|r| r.call("disable_log", ""))
    }

    async fn enable_audit(&self, _cluster_id: &str, audit: &AuditSpec) -> Result<(), RemoteError> {
        self.with(|r| r.call("enable_audit", audit.topic_id.as_deref().unwrap_or_default()))
    }

    async fn disable_audit(
        &self,
        _cluster_id: &str,
        delete_logset_and_topic: bool,
    ) -> Result<(), RemoteError> {
        self.with(|r| r.call("disable_audit", &delete_logset_and_topic.to_string()))
    }

    async fn install_addon(&self, _cluster_id: &str, addon: &AddonSpec) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("install_addon", &addon.name)?;
            let steps = r
                .addon_scripts
                .remove(&addon.name)
                .unwrap_or_else(|| vec!["Installing", "Succeed"]);
            r.addons.insert(addon.name.clone(), Scripted::new(&steps));
            Ok(())
        })
    }

    async fn update_addon(&self, _cluster_id: &str, addon: &AddonSpec) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("update_addon", &addon.name)?;
            let steps = r
                .addon_scripts
                .remove(&addon.name)
                .unwrap_or_else(|| vec!["Upgrading", "Succeed"]);
            r.addons.insert(addon.name.clone(), Scripted::new(&steps));
            Ok(())
        })
    }

    async fn delete_addon(&self, _cluster_id: &str, name: &str) -> Result<(), RemoteError> {
        self.with(|r| {
            r.call("delete_addon", name)?;
            let deletion = r.deletion("Deleting");
            match r.addons.get_mut(name) {
                Some(addon) => {
                    *addon = deletion;
                    Ok(())
                }
                None => Err(not_found("ResourceNotFound")),
            }
        })
    }

    async fn describe_addon(&self, _cluster_id: &str, name: &str) -> Result<StatusReport, RemoteError> {
        self.with(|r| {
            r.call("describe_addon", name)?;
            match observe(r.addons.get_mut(name)) {
                Some(phase) => Ok(StatusReport::phase(phase)),
                None => {
                    r.addons.remove(name);
                    Err(not_found("ResourceNotFound"))
                }
            }
        })
    }
}
