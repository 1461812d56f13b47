//! Claim event filter
//!
//! Claims are classified into a small state machine and only the transitions
//! the reconciler acts on are let through.

use api_types::finalizer_name;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;

use crate::platform::k8s::claims;

/// Lifecycle state of a claim as seen by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimState {
    /// No config label or no finalizer of the labeled config.
    Unmanaged,
    ManagedActive { phase: String },
    ManagedDeleting,
}

impl ClaimState {
    pub fn of(claim: &PersistentVolumeClaim) -> Self {
        let Some(config) = claims::config_name(claim) else {
            return Self::Unmanaged;
        };
        if !claims::has_finalizer(claim, &finalizer_name(config)) {
            return Self::Unmanaged;
        }

        if claims::is_deleting(claim) {
            Self::ManagedDeleting
        } else {
            Self::ManagedActive {
                phase: claims::phase(claim),
            }
        }
    }

    pub fn is_managed(&self) -> bool {
        !matches!(self, Self::Unmanaged)
    }
}

/// Change between two observed states of the same claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    FinalizerAdded,
    DeletionStarted,
    PhaseChanged { from: String, to: String },
    Released,
    Unchanged,
}

impl Transition {
    pub fn between(old: &ClaimState, new: &ClaimState) -> Self {
        match (old, new) {
            (ClaimState::Unmanaged, ClaimState::Unmanaged) => Self::Unchanged,
            (ClaimState::Unmanaged, _) => Self::FinalizerAdded,
            (_, ClaimState::Unmanaged) => Self::Released,
            (ClaimState::ManagedActive { .. }, ClaimState::ManagedDeleting) => {
                Self::DeletionStarted
            }
            (ClaimState::ManagedActive { phase: from }, ClaimState::ManagedActive { phase: to })
                if from != to =>
            {
                Self::PhaseChanged {
                    from: from.clone(),
                    to: to.clone(),
                }
            }
            _ => Self::Unchanged,
        }
    }
}

/// Watch event on a claim, reduced to the states the filter needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimEvent {
    Created(ClaimState),
    Updated { old: ClaimState, new: ClaimState },
    Deleted,
    Generic,
}

/// Whether the event should enqueue a reconcile.
pub fn admits(event: &ClaimEvent) -> bool {
    match event {
        ClaimEvent::Created(state) => state.is_managed(),
        ClaimEvent::Updated { old, new } => {
            if !new.is_managed() {
                return false;
            }
            if *new == ClaimState::ManagedDeleting {
                return true;
            }
            matches!(
                Transition::between(old, new),
                Transition::FinalizerAdded
                    | Transition::DeletionStarted
                    | Transition::PhaseChanged { .. }
            )
        }
        ClaimEvent::Deleted | ClaimEvent::Generic => false,
    }
}
