//! Endpoint, feature and add-on diffs

use tke_common::phase::{Phase, PhaseOutcome};
use tke_common::state::{DesiredState, EndpointOrder, ObservedState};
use tke_common::{Error, Result};

use super::operation::{FeatureKind, Operation, OperationKind, Payload, ResourceRef};
use crate::client::EndpointKind;

/// Endpoints in the configured order. An endpoint left in a failed or absent
/// phase by an earlier run is created again.
pub(super) fn diff_endpoints(
    desired: &DesiredState,
    observed: &ObservedState,
    ops: &mut Vec<Operation>,
) -> Result<()> {
    let order = match desired.endpoints.order {
        EndpointOrder::PublicFirst => [EndpointKind::Public, EndpointKind::Private],
        EndpointOrder::PrivateFirst => [EndpointKind::Private, EndpointKind::Public],
    };

    for kind in order {
        let target = ResourceRef::Endpoint { kind };
        match kind {
            EndpointKind::Public => {
                let want = desired.endpoints.public.as_ref();
                let have = observed.endpoints.public.as_ref();
                match (want, have) {
                    (Some(w), Some(h)) if usable(h.phase.outcome()) => {
                        if *w != h.spec {
                            ops.push(Operation::new(
                                OperationKind::Modify,
                                target,
                                Payload::PublicEndpoint(w.clone()),
                            ));
                        }
                    }
                    (Some(w), _) => ops.push(Operation::new(
                        OperationKind::Create,
                        target,
                        Payload::PublicEndpoint(w.clone()),
                    )),
                    (None, Some(h)) if h.phase.outcome() != PhaseOutcome::Absent => {
                        ops.push(Operation::new(OperationKind::Delete, target, Payload::None))
                    }
                    (None, _) => {}
                }
            }
            EndpointKind::Private => {
                let want = desired.endpoints.private.as_ref();
                let have = observed.endpoints.private.as_ref();
                match (want, have) {
                    (Some(w), Some(h)) if usable(h.phase.outcome()) => {
                        if w.subnet_id != h.spec.subnet_id {
                            return Err(Error::immutable(
                                "endpoints.private.subnetId",
                                &h.spec.subnet_id,
                                &w.subnet_id,
                            ));
                        }
                    }
                    (Some(w), _) => ops.push(Operation::new(
                        OperationKind::Create,
                        target,
                        Payload::PrivateEndpoint(w.clone()),
                    )),
                    (None, Some(h)) if h.phase.outcome() != PhaseOutcome::Absent => {
                        ops.push(Operation::new(OperationKind::Delete, target, Payload::None))
                    }
                    (None, _) => {}
                }
            }
        }
    }
    Ok(())
}

fn usable(outcome: PhaseOutcome) -> bool {
    matches!(outcome, PhaseOutcome::Succeeded | PhaseOutcome::InProgress)
}

/// Auth options are modified in place; log and audit are toggled, and a
/// changed target is switched off and on again.
pub(super) fn diff_features(
    desired: &DesiredState,
    observed: &ObservedState,
    ops: &mut Vec<Operation>,
) {
    let want = &desired.features;
    let have = &observed.features;

    if let Some(auth) = &want.auth {
        if Some(auth) != have.auth.as_ref() {
            ops.push(Operation::new(
                OperationKind::Modify,
                ResourceRef::Feature {
                    feature: FeatureKind::Auth,
                },
                Payload::Auth(auth.clone()),
            ));
        }
    }

    toggle(
        FeatureKind::Log,
        want.log.as_ref(),
        have.log.as_ref(),
        |spec| Payload::Log(spec.clone()),
        |_| Payload::None,
        ops,
    );
    toggle(
        FeatureKind::Audit,
        want.audit.as_ref(),
        have.audit.as_ref(),
        |spec| Payload::Audit(spec.clone()),
        |spec| Payload::Audit(spec.clone()),
        ops,
    );
}

fn toggle<T: PartialEq>(
    feature: FeatureKind,
    want: Option<&T>,
    have: Option<&T>,
    enable: impl Fn(&T) -> Payload,
    disable: impl Fn(&T) -> Payload,
    ops: &mut Vec<Operation>,
) {
    let target = || ResourceRef::Feature { feature };
    if let Some(h) = have {
        if want != Some(h) {
            ops.push(Operation::new(
                OperationKind::DisableFeature,
                target(),
                disable(h),
            ));
        }
    }
    if let Some(w) = want {
        if have != Some(w) {
            ops.push(Operation::new(
                OperationKind::EnableFeature,
                target(),
                enable(w),
            ));
        }
    }
}

/// Add-ons are installed or updated in document order, then removed ones
/// are deleted. An add-on stuck in a failure phase is updated again.
pub(super) fn diff_addons(
    desired: &DesiredState,
    observed: &ObservedState,
    ops: &mut Vec<Operation>,
) {
    for addon in &desired.addons {
        let target = ResourceRef::Addon {
            name: addon.name.clone(),
        };
        match observed.addon(&addon.name) {
            Some(status) if status.addon.phase.outcome() != PhaseOutcome::Absent => {
                if status.spec != *addon || status.addon.phase.is_failure() {
                    ops.push(Operation::new(
                        OperationKind::Modify,
                        target,
                        Payload::Addon(addon.clone()),
                    ));
                }
            }
            _ => ops.push(Operation::new(
                OperationKind::Create,
                target,
                Payload::Addon(addon.clone()),
            )),
        }
    }

    for status in &observed.addons {
        if desired.addon(&status.spec.name).is_some()
            || status.addon.phase.outcome() == PhaseOutcome::Absent
        {
            continue;
        }
        ops.push(Operation::new(
            OperationKind::Delete,
            ResourceRef::Addon {
                name: status.spec.name.clone(),
            },
            Payload::None,
        ));
    }
}
