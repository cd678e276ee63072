//! Provisioning state machine
//!
//! An explicit table maps each `ProvisioningState` to its handler and to the
//! state that follows a `Complete` outcome. `reconcile_state` is the single
//! epilogue for every handler: it applies the transition and bumps
//! `lastUpdated` only when something observable changed.

use crate::device::action::ActionResult;
use crate::device::DeviceService;
use crate::error::ControllerError;
use crds::{HivelocityMachine, HivelocityMachineStatus, ProvisioningState};
use futures::future::BoxFuture;
use tracing::{debug, info};

type Handler = for<'a> fn(&'a mut DeviceService) -> BoxFuture<'a, ActionResult>;

/// One row of the transition table
#[derive(Clone, Copy)]
struct StateTransition {
    state: ProvisioningState,
    handler: Handler,
    next_state: ProvisioningState,
}

fn associate(s: &mut DeviceService) -> BoxFuture<'_, ActionResult> {
    Box::pin(s.associate_device())
}

fn verify(s: &mut DeviceService) -> BoxFuture<'_, ActionResult> {
    Box::pin(s.verify_associate())
}

fn provision(s: &mut DeviceService) -> BoxFuture<'_, ActionResult> {
    Box::pin(s.provision_device())
}

fn provisioned(s: &mut DeviceService) -> BoxFuture<'_, ActionResult> {
    Box::pin(s.device_provisioned())
}

fn deprovision(s: &mut DeviceService) -> BoxFuture<'_, ActionResult> {
    Box::pin(s.delete_deprovision())
}

fn dissociate(s: &mut DeviceService) -> BoxFuture<'_, ActionResult> {
    Box::pin(s.delete_dissociate())
}

fn delete(s: &mut DeviceService) -> BoxFuture<'_, ActionResult> {
    Box::pin(s.delete_device())
}

const TRANSITIONS: [StateTransition; 7] = [
    StateTransition {
        state: ProvisioningState::AssociateDevice,
        handler: associate,
        next_state: ProvisioningState::VerifyAssociate,
    },
    StateTransition {
        state: ProvisioningState::VerifyAssociate,
        handler: verify,
        next_state: ProvisioningState::ProvisionDevice,
    },
    StateTransition {
        state: ProvisioningState::ProvisionDevice,
        handler: provision,
        next_state: ProvisioningState::DeviceProvisioned,
    },
    StateTransition {
        state: ProvisioningState::DeviceProvisioned,
        handler: provisioned,
        next_state: ProvisioningState::DeviceProvisioned,
    },
    StateTransition {
        state: ProvisioningState::DeleteDeviceDeProvision,
        handler: deprovision,
        next_state: ProvisioningState::DeleteDevice,
    },
    StateTransition {
        state: ProvisioningState::DeleteDeviceDissociate,
        handler: dissociate,
        next_state: ProvisioningState::DeleteDevice,
    },
    StateTransition {
        state: ProvisioningState::DeleteDevice,
        handler: delete,
        next_state: ProvisioningState::DeleteDevice,
    },
];

/// Where teardown starts for a machine deleted in `state`.
///
/// A device that may have been reprovisioned is shut down and wiped first;
/// a device that was only claimed just loses the claim.
pub fn deletion_entry(state: ProvisioningState) -> ProvisioningState {
    match state {
        ProvisioningState::None | ProvisioningState::AssociateDevice | ProvisioningState::VerifyAssociate => {
            ProvisioningState::DeleteDeviceDissociate
        }
        ProvisioningState::ProvisionDevice | ProvisioningState::DeviceProvisioned => {
            ProvisioningState::DeleteDeviceDeProvision
        }
        deleting => deleting,
    }
}

/// The parts of a machine whose change counts as progress
#[derive(PartialEq)]
struct Observed {
    provider_id: Option<String>,
    state: ProvisioningState,
    status: Option<HivelocityMachineStatus>,
}

impl Observed {
    fn of(machine: &HivelocityMachine) -> Self {
        Self {
            provider_id: machine.spec.provider_id.clone(),
            state: machine.provisioning_state(),
            status: machine.status.clone(),
        }
    }
}

/// Run the handler of the machine's current state and apply its outcome
pub async fn reconcile_state(service: &mut DeviceService) -> ActionResult {
    let before = Observed::of(&service.scope.machine);
    let old_state = before.state;

    let mut state = old_state;
    if state == ProvisioningState::None {
        state = ProvisioningState::AssociateDevice;
    }
    if service.scope.machine.is_being_deleted() {
        state = deletion_entry(state);
    }
    service.scope.machine.set_provisioning_state(state);

    let Some(transition) = TRANSITIONS.iter().find(|t| t.state == state).copied() else {
        return ControllerError::NoHandler(state).into();
    };

    debug!(machine = %service.scope.name(), state = %state, "Running state handler");
    let result = (transition.handler)(service).await;

    match &result {
        ActionResult::Complete => service.scope.machine.set_provisioning_state(transition.next_state),
        ActionResult::GoBack(target) => service.scope.machine.set_provisioning_state(*target),
        ActionResult::Continue(_) | ActionResult::Error(_) | ActionResult::Failed => {}
    }

    let after = Observed::of(&service.scope.machine);
    if after != before {
        let now = service.scope.now;
        service.scope.machine.spec.status.last_updated = Some(now);
    }
    if after.state != old_state {
        info!(
            machine = %service.scope.name(),
            old = %old_state,
            new = %after.state,
            "Provisioning state changed"
        );
    }

    result
}
