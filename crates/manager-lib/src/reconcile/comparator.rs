//! Desired-vs-observed comparison
//!
//! Fields are checked in a fixed order and every mismatch is collected.
//! Environment variables are not compared: the engine injects variables of
//! its own (PATH and friends) and there is no way to tell those apart from a
//! variable the operator removed, so diffing them would recreate forever.

use crate::models::{DesiredContainerSpec, MismatchedField, ObservedContainer, ReconciliationDecision};

/// Every field on which `observed` differs from `desired`, in comparison order
pub fn mismatched_fields(
    desired: &DesiredContainerSpec,
    observed: &ObservedContainer,
) -> Vec<MismatchedField> {
    let mut fields = Vec::new();

    if desired.exposed_ports != observed.exposed_ports {
        fields.push(MismatchedField::ExposedPorts);
    }
    if desired.port_bindings != observed.port_bindings {
        fields.push(MismatchedField::PortBindings);
    }
    if desired.image != observed.image {
        fields.push(MismatchedField::Image);
    }
    // An unset command means "whatever the image defaults to"
    if !desired.cmd.is_empty() && desired.cmd != observed.cmd {
        fields.push(MismatchedField::Cmd);
    }

    fields
}

pub fn compare(desired: &DesiredContainerSpec, observed: &ObservedContainer) -> ReconciliationDecision {
    let fields = mismatched_fields(desired, observed);
    if fields.is_empty() {
        ReconciliationDecision::NoOp
    } else {
        ReconciliationDecision::Recreate(fields)
    }
}

/// Decision for one name, given what is declared and what is running
pub fn decide(
    desired: Option<&DesiredContainerSpec>,
    observed: Option<&ObservedContainer>,
) -> ReconciliationDecision {
    match (desired, observed) {
        (Some(_), None) => ReconciliationDecision::Create,
        (Some(desired), Some(observed)) => compare(desired, observed),
        (None, Some(_)) => ReconciliationDecision::RemovePruned,
        (None, None) => ReconciliationDecision::NoOp,
    }
}
