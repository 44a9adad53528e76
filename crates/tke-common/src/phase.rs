//! Lifecycle phases of remote objects
//!
//! Every remote resource kind has a closed set of phases with an explicit
//! terminal set. Phases arrive from the remote system as free-form strings;
//! [`Phase::parse`] maps them onto the closed set and keeps anything it does
//! not recognise as `Unknown`, which is never terminal. A poller that sees an
//! unknown phase keeps polling until its budget runs out.
//!
//! No phase machine retries on its own. A terminal failure is reported to the
//! caller, which decides whether to compensate or retry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a phase should be read by whoever is waiting on it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Work is still in flight
    InProgress,
    /// The object reached its desired steady state
    Succeeded,
    /// The object reached a state it will not leave without a new mutation
    Failed,
    /// The object does not exist
    Absent,
}

/// A lifecycle state machine for one remote resource kind
pub trait Phase: Clone + fmt::Debug + fmt::Display + PartialEq + Send + Sync + 'static {
    /// Resource kind name used in logs and errors
    const KIND: &'static str;

    /// Map a remote status string onto the phase set
    fn parse(raw: &str) -> Self;

    /// The phase representing "no such object"
    fn absent() -> Self;

    /// Classify this phase
    fn outcome(&self) -> PhaseOutcome;

    /// Whether the remote system is expected to move from `self` to `next`
    fn can_transition_to(&self, next: &Self) -> bool;

    /// Whether no further progress is expected without a new mutation
    fn is_terminal(&self) -> bool {
        self.outcome() != PhaseOutcome::InProgress
    }
}

/// Derive string-based serde for a phase enum from its `Display`/`parse` pair,
/// so observed-state documents store phases the way the remote system spells them.
macro_rules! phase_serde_as_string {
    ($ty:ty) => {
        impl From<$ty> for String {
            fn from(phase: $ty) -> String {
                phase.to_string()
            }
        }

        impl From<String> for $ty {
            fn from(raw: String) -> Self {
                <$ty as Phase>::parse(&raw)
            }
        }
    };
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-' && *c != ' ')
        .flat_map(char::to_lowercase)
        .collect()
}

// =============================================================================
// Cluster
// =============================================================================

/// Phases of the managed cluster object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ClusterPhase {
    /// Control plane is being provisioned
    #[default]
    Creating,
    /// Control plane is serving
    Running,
    /// Provisioning failed
    CreateFailed,
    /// Control plane version upgrade in flight
    Upgrading,
    /// Upgrade failed
    UpgradeFailed,
    /// Remote system reports the cluster unhealthy
    Abnormal,
    /// Teardown in flight
    Deleting,
    /// Teardown completed
    Deleted,
    /// The cluster could not be found at all
    AlreadyGone,
    /// A status this engine does not know
    Unknown(String),
}

impl Phase for ClusterPhase {
    const KIND: &'static str = "cluster";

    fn parse(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "creating" | "initializing" => Self::Creating,
            "running" => Self::Running,
            "createfailed" => Self::CreateFailed,
            "upgrading" | "updating" => Self::Upgrading,
            "upgradefailed" => Self::UpgradeFailed,
            "abnormal" => Self::Abnormal,
            "deleting" => Self::Deleting,
            "deleted" => Self::Deleted,
            "alreadygone" | "notfound" => Self::AlreadyGone,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    fn absent() -> Self {
        Self::AlreadyGone
    }

    fn outcome(&self) -> PhaseOutcome {
        match self {
            Self::Running => PhaseOutcome::Succeeded,
            Self::CreateFailed | Self::UpgradeFailed | Self::Abnormal => PhaseOutcome::Failed,
            Self::Deleted | Self::AlreadyGone => PhaseOutcome::Absent,
            Self::Creating | Self::Upgrading | Self::Deleting | Self::Unknown(_) => {
                PhaseOutcome::InProgress
            }
        }
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use ClusterPhase::*;
        if self == next || matches!(self, Unknown(_)) || matches!(next, Unknown(_) | AlreadyGone) {
            return true;
        }
        match self {
            Creating => matches!(next, Running | CreateFailed),
            Running => matches!(next, Upgrading | Deleting | Abnormal),
            Upgrading => matches!(next, Running | UpgradeFailed),
            Abnormal => matches!(next, Running | Deleting),
            CreateFailed | UpgradeFailed => matches!(next, Deleting | Upgrading | Running),
            Deleting => matches!(next, Deleted),
            Deleted | AlreadyGone => matches!(next, Creating),
            Unknown(_) => true,
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "Creating"),
            Self::Running => write!(f, "Running"),
            Self::CreateFailed => write!(f, "CreateFailed"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::UpgradeFailed => write!(f, "UpgradeFailed"),
            Self::Abnormal => write!(f, "Abnormal"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Deleted => write!(f, "Deleted"),
            Self::AlreadyGone => write!(f, "AlreadyGone"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

phase_serde_as_string!(ClusterPhase);

// =============================================================================
// Network endpoint
// =============================================================================

/// Phases of a public or private API-server access point
///
/// `NotFound` and `Deleted` both mean "absent" and must be treated the same.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EndpointPhase {
    /// No endpoint exists
    #[default]
    NotFound,
    /// Endpoint is being opened
    Creating,
    /// Endpoint is reachable
    Created,
    /// Opening failed
    CreateFailed,
    /// Endpoint is being closed
    Deleting,
    /// Endpoint was closed
    Deleted,
    /// Closing failed
    DeletedFailed,
    /// A status this engine does not know
    Unknown(String),
}

impl Phase for EndpointPhase {
    const KIND: &'static str = "endpoint";

    fn parse(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "notfound" => Self::NotFound,
            "creating" => Self::Creating,
            "created" => Self::Created,
            "createfailed" => Self::CreateFailed,
            "deleting" => Self::Deleting,
            "deleted" => Self::Deleted,
            "deletedfailed" | "deletefailed" => Self::DeletedFailed,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    fn absent() -> Self {
        Self::NotFound
    }

    fn outcome(&self) -> PhaseOutcome {
        match self {
            Self::Created => PhaseOutcome::Succeeded,
            Self::CreateFailed | Self::DeletedFailed => PhaseOutcome::Failed,
            Self::NotFound | Self::Deleted => PhaseOutcome::Absent,
            Self::Creating | Self::Deleting | Self::Unknown(_) => PhaseOutcome::InProgress,
        }
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use EndpointPhase::*;
        if self == next || matches!(self, Unknown(_)) || matches!(next, Unknown(_)) {
            return true;
        }
        match self {
            NotFound | Deleted => matches!(next, Creating | Created | CreateFailed | NotFound | Deleted),
            Creating => matches!(next, Created | CreateFailed),
            Created => matches!(next, Deleting | Deleted | NotFound),
            CreateFailed => matches!(next, Creating | Deleting | NotFound),
            Deleting => matches!(next, Deleted | NotFound | DeletedFailed),
            DeletedFailed => matches!(next, Deleting | Created),
            Unknown(_) => true,
        }
    }
}

impl fmt::Display for EndpointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NotFound"),
            Self::Creating => write!(f, "Creating"),
            Self::Created => write!(f, "Created"),
            Self::CreateFailed => write!(f, "CreateFailed"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Deleted => write!(f, "Deleted"),
            Self::DeletedFailed => write!(f, "DeletedFailed"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

phase_serde_as_string!(EndpointPhase);

// =============================================================================
// Add-on
// =============================================================================

/// Phases of an add-on installation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AddonPhase {
    /// Add-on is not installed
    #[default]
    NotInstalled,
    /// Chart is being installed
    Installing,
    /// A new version or new values are being rolled out
    Upgrading,
    /// Installation or upgrade completed
    Succeed,
    /// Chart could not be fetched
    ChartFetchFailed,
    /// Release failed
    Failed,
    /// Release failed and could not be rolled back
    RollbackFailed,
    /// Release could not be synced to the cluster
    SyncFailed,
    /// Add-on is being removed
    Deleting,
    /// A status this engine does not know
    Unknown(String),
}

impl AddonPhase {
    /// Whether this phase is one of the failure phases of an installation
    pub fn is_failure(&self) -> bool {
        self.outcome() == PhaseOutcome::Failed
    }
}

impl Phase for AddonPhase {
    const KIND: &'static str = "addon";

    fn parse(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "notinstalled" | "notfound" => Self::NotInstalled,
            "installing" | "pending" => Self::Installing,
            "upgrading" | "updating" => Self::Upgrading,
            "succeed" | "succeeded" => Self::Succeed,
            "chartfetchfailed" => Self::ChartFetchFailed,
            "failed" => Self::Failed,
            "rollbackfailed" => Self::RollbackFailed,
            "syncfailed" => Self::SyncFailed,
            "deleting" => Self::Deleting,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    fn absent() -> Self {
        Self::NotInstalled
    }

    fn outcome(&self) -> PhaseOutcome {
        match self {
            Self::Succeed => PhaseOutcome::Succeeded,
            Self::ChartFetchFailed | Self::Failed | Self::RollbackFailed | Self::SyncFailed => {
                PhaseOutcome::Failed
            }
            Self::NotInstalled => PhaseOutcome::Absent,
            Self::Installing | Self::Upgrading | Self::Deleting | Self::Unknown(_) => {
                PhaseOutcome::InProgress
            }
        }
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use AddonPhase::*;
        if self == next || matches!(self, Unknown(_)) || matches!(next, Unknown(_) | NotInstalled) {
            return true;
        }
        match self {
            NotInstalled => matches!(next, Installing | Succeed),
            Installing | Upgrading => {
                matches!(next, Succeed | ChartFetchFailed | Failed | RollbackFailed | SyncFailed)
            }
            Succeed => matches!(next, Upgrading | Deleting),
            ChartFetchFailed | Failed | RollbackFailed | SyncFailed => {
                matches!(next, Deleting | Upgrading | Installing)
            }
            Deleting => false,
            Unknown(_) => true,
        }
    }
}

impl fmt::Display for AddonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "NotInstalled"),
            Self::Installing => write!(f, "Installing"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::Succeed => write!(f, "Succeed"),
            Self::ChartFetchFailed => write!(f, "ChartFetchFailed"),
            Self::Failed => write!(f, "Failed"),
            Self::RollbackFailed => write!(f, "RollbackFailed"),
            Self::SyncFailed => write!(f, "SyncFailed"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

phase_serde_as_string!(AddonPhase);

// =============================================================================
// Node pool
// =============================================================================

/// Life state of a node pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum NodePoolPhase {
    /// Pool and its scaling group are being created
    #[default]
    Creating,
    /// Pool is ready for mutations
    Normal,
    /// Pool is applying a modification
    Updating,
    /// Pool is being removed
    Deleting,
    /// Pool no longer exists
    Deleted,
    /// A status this engine does not know
    Unknown(String),
}

impl Phase for NodePoolPhase {
    const KIND: &'static str = "node pool";

    fn parse(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "creating" => Self::Creating,
            "normal" | "running" => Self::Normal,
            "updating" => Self::Updating,
            "deleting" => Self::Deleting,
            "deleted" | "notfound" => Self::Deleted,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    fn absent() -> Self {
        Self::Deleted
    }

    fn outcome(&self) -> PhaseOutcome {
        match self {
            Self::Normal => PhaseOutcome::Succeeded,
            Self::Deleted => PhaseOutcome::Absent,
            Self::Creating | Self::Updating | Self::Deleting | Self::Unknown(_) => {
                PhaseOutcome::InProgress
            }
        }
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use NodePoolPhase::*;
        if self == next || matches!(self, Unknown(_)) || matches!(next, Unknown(_)) {
            return true;
        }
        match self {
            Creating => matches!(next, Normal | Deleting | Deleted),
            Normal => matches!(next, Updating | Deleting),
            Updating => matches!(next, Normal | Deleting),
            Deleting => matches!(next, Deleted),
            Deleted => matches!(next, Creating),
            Unknown(_) => true,
        }
    }
}

impl fmt::Display for NodePoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Normal => write!(f, "normal"),
            Self::Updating => write!(f, "updating"),
            Self::Deleting => write!(f, "deleting"),
            Self::Deleted => write!(f, "deleted"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

phase_serde_as_string!(NodePoolPhase);

/// Scaling-group sub-state of a node pool
///
/// Desired capacity must not be mutated while this is `Enabling` or
/// `Disabling`; the remote system leaves that case undefined.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ScalingPhase {
    /// Autoscaling is being switched on
    Enabling,
    /// Autoscaling is on
    Enabled,
    /// Autoscaling is being switched off
    Disabling,
    /// Autoscaling is off
    #[default]
    Disabled,
    /// A status this engine does not know
    Unknown(String),
}

impl ScalingPhase {
    /// The settled phase for an autoscaling flag
    pub fn settled(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

impl Phase for ScalingPhase {
    const KIND: &'static str = "scaling group";

    fn parse(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "enabling" => Self::Enabling,
            "enabled" => Self::Enabled,
            "disabling" => Self::Disabling,
            "disabled" => Self::Disabled,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    /// A pool without a scaling group cannot scale on its own.
    fn absent() -> Self {
        Self::Disabled
    }

    fn outcome(&self) -> PhaseOutcome {
        match self {
            Self::Enabled | Self::Disabled => PhaseOutcome::Succeeded,
            Self::Enabling | Self::Disabling | Self::Unknown(_) => PhaseOutcome::InProgress,
        }
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use ScalingPhase::*;
        if self == next || matches!(self, Unknown(_)) || matches!(next, Unknown(_)) {
            return true;
        }
        match self {
            Disabled => matches!(next, Enabling | Enabled),
            Enabling => matches!(next, Enabled | Disabled),
            Enabled => matches!(next, Disabling | Disabled),
            Disabling => matches!(next, Disabled | Enabled),
            Unknown(_) => true,
        }
    }
}

impl fmt::Display for ScalingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabling => write!(f, "enabling"),
            Self::Enabled => write!(f, "enabled"),
            Self::Disabling => write!(f, "disabling"),
            Self::Disabled => write!(f, "disabled"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

phase_serde_as_string!(ScalingPhase);

// =============================================================================
// Serverless pool
// =============================================================================

/// Life state of a serverless (virtual node) pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ServerlessPoolPhase {
    /// Pool is being created
    #[default]
    Creating,
    /// Pool is ready
    Normal,
    /// Pool is applying a modification
    Updating,
    /// Remote system reports the pool unhealthy
    Abnormal,
    /// Pool is being removed
    Deleting,
    /// Pool no longer exists
    Deleted,
    /// A status this engine does not know
    Unknown(String),
}

impl Phase for ServerlessPoolPhase {
    const KIND: &'static str = "serverless pool";

    fn parse(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "creating" => Self::Creating,
            "normal" | "running" => Self::Normal,
            "updating" => Self::Updating,
            "abnormal" | "createfailed" => Self::Abnormal,
            "deleting" => Self::Deleting,
            "deleted" | "notfound" => Self::Deleted,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    fn absent() -> Self {
        Self::Deleted
    }

    fn outcome(&self) -> PhaseOutcome {
        match self {
            Self::Normal => PhaseOutcome::Succeeded,
            Self::Abnormal => PhaseOutcome::Failed,
            Self::Deleted => PhaseOutcome::Absent,
            Self::Creating | Self::Updating | Self::Deleting | Self::Unknown(_) => {
                PhaseOutcome::InProgress
            }
        }
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use ServerlessPoolPhase::*;
        if self == next || matches!(self, Unknown(_)) || matches!(next, Unknown(_)) {
            return true;
        }
        match self {
            Creating => matches!(next, Normal | Abnormal),
            Normal => matches!(next, Updating | Deleting | Abnormal),
            Updating => matches!(next, Normal | Abnormal),
            Abnormal => matches!(next, Normal | Deleting),
            Deleting => matches!(next, Deleted),
            Deleted => matches!(next, Creating),
            Unknown(_) => true,
        }
    }
}

impl fmt::Display for ServerlessPoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Normal => write!(f, "normal"),
            Self::Updating => write!(f, "updating"),
            Self::Abnormal => write!(f, "abnormal"),
            Self::Deleting => write!(f, "deleting"),
            Self::Deleted => write!(f, "deleted"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

phase_serde_as_string!(ServerlessPoolPhase);

// =============================================================================
// Instance
// =============================================================================

/// State of a CVM instance inside the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum InstancePhase {
    /// Instance is booting or joining the cluster
    #[default]
    Initializing,
    /// Node is Ready
    Running,
    /// Instance failed to join
    Failed,
    /// Instance is no longer part of the cluster
    Removed,
    /// A status this engine does not know
    Unknown(String),
}

impl InstancePhase {
    /// Reduce a fleet of instance phases to one phase.
    ///
    /// `Running` once at least `min_ready` instances run; `Failed` once failed
    /// instances make `min_ready` unreachable; `Initializing` otherwise.
    pub fn aggregate(phases: &[InstancePhase], min_ready: usize) -> InstancePhase {
        let running = phases.iter().filter(|p| **p == Self::Running).count();
        if running >= min_ready {
            return Self::Running;
        }
        let failed = phases.iter().filter(|p| **p == Self::Failed).count();
        if failed > 0 && phases.len() - failed < min_ready {
            return Self::Failed;
        }
        Self::Initializing
    }
}

impl Phase for InstancePhase {
    const KIND: &'static str = "instance";

    fn parse(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "initializing" | "pending" | "launching" | "creating" | "starting" => {
                Self::Initializing
            }
            "running" | "ready" => Self::Running,
            "failed" | "launchfailed" => Self::Failed,
            "removed" | "notfound" | "terminated" => Self::Removed,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    fn absent() -> Self {
        Self::Removed
    }

    fn outcome(&self) -> PhaseOutcome {
        match self {
            Self::Running => PhaseOutcome::Succeeded,
            Self::Failed => PhaseOutcome::Failed,
            Self::Removed => PhaseOutcome::Absent,
            Self::Initializing | Self::Unknown(_) => PhaseOutcome::InProgress,
        }
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use InstancePhase::*;
        if self == next || matches!(self, Unknown(_)) || matches!(next, Unknown(_) | Removed) {
            return true;
        }
        match self {
            Initializing => matches!(next, Running | Failed),
            Running => matches!(next, Failed),
            Failed => matches!(next, Initializing),
            Removed => matches!(next, Initializing),
            Unknown(_) => true,
        }
    }
}

impl fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::Removed => write!(f, "removed"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

phase_serde_as_string!(InstancePhase);

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: reading remote status strings
    // ==========================================================================

    /// Story: the remote spells phases loosely, the engine reads them strictly
    #[test]
    fn story_remote_status_strings_map_onto_closed_sets() {
        assert_eq!(ClusterPhase::parse("Running"), ClusterPhase::Running);
        assert_eq!(ClusterPhase::parse("running"), ClusterPhase::Running);
        assert_eq!(EndpointPhase::parse("DeletedFailed"), EndpointPhase::DeletedFailed);
        assert_eq!(AddonPhase::parse("Succeeded"), AddonPhase::Succeed);
        assert_eq!(NodePoolPhase::parse("normal"), NodePoolPhase::Normal);
        assert_eq!(ScalingPhase::parse("enabling"), ScalingPhase::Enabling);
        assert_eq!(InstancePhase::parse("running"), InstancePhase::Running);
    }

    /// Story: a phase the engine has never seen keeps the poller waiting
    #[test]
    fn story_unknown_phases_are_never_terminal() {
        let phase = ClusterPhase::parse("Recovering");
        assert_eq!(phase, ClusterPhase::Unknown("Recovering".to_string()));
        assert!(!phase.is_terminal());
        assert_eq!(phase.to_string(), "Recovering");

        assert!(!AddonPhase::parse("Rollbacking").is_terminal());
        assert!(!EndpointPhase::parse("Pending").is_terminal());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for phase in [
            ClusterPhase::Creating,
            ClusterPhase::Running,
            ClusterPhase::CreateFailed,
            ClusterPhase::Upgrading,
            ClusterPhase::UpgradeFailed,
            ClusterPhase::Abnormal,
            ClusterPhase::Deleting,
            ClusterPhase::Deleted,
            ClusterPhase::AlreadyGone,
        ] {
            assert_eq!(ClusterPhase::parse(&phase.to_string()), phase);
        }
        for phase in [
            AddonPhase::NotInstalled,
            AddonPhase::Installing,
            AddonPhase::Succeed,
            AddonPhase::ChartFetchFailed,
            AddonPhase::RollbackFailed,
            AddonPhase::SyncFailed,
        ] {
            assert_eq!(AddonPhase::parse(&phase.to_string()), phase);
        }
    }

    #[test]
    fn cluster_terminal_sets() {
        assert_eq!(ClusterPhase::Running.outcome(), PhaseOutcome::Succeeded);
        assert_eq!(ClusterPhase::CreateFailed.outcome(), PhaseOutcome::Failed);
        assert_eq!(ClusterPhase::UpgradeFailed.outcome(), PhaseOutcome::Failed);
        assert_eq!(ClusterPhase::Deleted.outcome(), PhaseOutcome::Absent);
        assert_eq!(ClusterPhase::AlreadyGone.outcome(), PhaseOutcome::Absent);
        assert!(!ClusterPhase::Creating.is_terminal());
        assert!(!ClusterPhase::Upgrading.is_terminal());
        assert!(!ClusterPhase::Deleting.is_terminal());
    }

    #[test]
    fn cluster_transitions_follow_lifecycle() {
        assert!(ClusterPhase::Creating.can_transition_to(&ClusterPhase::Running));
        assert!(ClusterPhase::Running.can_transition_to(&ClusterPhase::Upgrading));
        assert!(ClusterPhase::Upgrading.can_transition_to(&ClusterPhase::UpgradeFailed));
        assert!(ClusterPhase::Deleting.can_transition_to(&ClusterPhase::AlreadyGone));
        assert!(!ClusterPhase::Creating.can_transition_to(&ClusterPhase::Upgrading));
        assert!(!ClusterPhase::Deleting.can_transition_to(&ClusterPhase::Running));
    }

    /// Story: "not found" and "deleted" endpoints mean the same thing
    #[test]
    fn story_endpoint_absence_is_uniform() {
        assert_eq!(EndpointPhase::NotFound.outcome(), PhaseOutcome::Absent);
        assert_eq!(EndpointPhase::Deleted.outcome(), PhaseOutcome::Absent);
        assert_eq!(EndpointPhase::absent(), EndpointPhase::NotFound);
        assert_eq!(EndpointPhase::DeletedFailed.outcome(), PhaseOutcome::Failed);
    }

    #[test]
    fn every_addon_failure_phase_is_fatal() {
        for phase in [
            AddonPhase::ChartFetchFailed,
            AddonPhase::Failed,
            AddonPhase::RollbackFailed,
            AddonPhase::SyncFailed,
        ] {
            assert!(phase.is_failure(), "{} should be a failure", phase);
            assert!(phase.is_terminal());
        }
        assert!(!AddonPhase::Installing.is_failure());
    }

    #[test]
    fn scaling_transitions_are_in_progress() {
        assert!(!ScalingPhase::Enabling.is_terminal());
        assert!(!ScalingPhase::Disabling.is_terminal());
        assert!(ScalingPhase::Enabled.is_terminal());
        assert_eq!(ScalingPhase::settled(true), ScalingPhase::Enabled);
        assert_eq!(ScalingPhase::settled(false), ScalingPhase::Disabled);
    }

    #[test]
    fn instance_aggregate_waits_for_quorum() {
        use InstancePhase::*;
        assert_eq!(InstancePhase::aggregate(&[Initializing, Running], 1), Running);
        assert_eq!(InstancePhase::aggregate(&[Initializing, Initializing], 1), Initializing);
        assert_eq!(InstancePhase::aggregate(&[], 1), Initializing);
        assert_eq!(InstancePhase::aggregate(&[], 0), Running);
    }

    #[test]
    fn instance_aggregate_fails_when_quorum_is_unreachable() {
        use InstancePhase::*;
        assert_eq!(InstancePhase::aggregate(&[Running, Failed], 2), Failed);
        assert_eq!(InstancePhase::aggregate(&[Failed, Initializing], 1), Initializing);
        assert_eq!(InstancePhase::aggregate(&[Failed], 1), Failed);
    }

    #[test]
    fn phases_serialize_as_remote_strings() {
        let json = serde_json::to_string(&ClusterPhase::Running).unwrap();
        assert_eq!(json, "\"Running\"");
        let back: ClusterPhase = serde_json::from_str("\"Recovering\"").unwrap();
        assert_eq!(back, ClusterPhase::Unknown("Recovering".to_string()));
        let pool: NodePoolPhase = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(pool, NodePoolPhase::Normal);
    }
}
