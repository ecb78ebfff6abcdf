//! Status classification for conditional writes
//!
//! A precondition failure on a conditional write is an expected result, not an
//! error. The rules live in one table so they can be read and tested alone.

use crate::api::request::{Conditional, OperationKind};

/// Value surfaced in place of an error when a write was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipValue {
    False,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    SoftSkip(SkipValue),
    Propagate,
}

const SUCCESS_STATUSES: &[u16] = &[200, 201, 204, 206, 304];

/// `(operation kind, conditional header, status) -> value` for skipped writes
const SOFT_SKIPS: &[(OperationKind, Conditional, u16, SkipValue)] = &[
    // If-Match failed: the record changed (or is gone), nothing was written
    (OperationKind::Update, Conditional::IfMatch, 412, SkipValue::False),
    (OperationKind::UpdateSingleProperty, Conditional::IfMatch, 412, SkipValue::False),
    (OperationKind::Delete, Conditional::IfMatch, 412, SkipValue::False),
    // If-None-Match: * failed: the record exists, update prevented
    (OperationKind::Upsert, Conditional::IfNoneMatch, 412, SkipValue::Empty),
    // If-Match: * failed: the record does not exist, create prevented
    (OperationKind::Upsert, Conditional::IfMatch, 404, SkipValue::Empty),
];

pub fn classify(kind: OperationKind, conditional: Conditional, status: u16) -> Outcome {
    if SUCCESS_STATUSES.contains(&status) {
        return Outcome::Success;
    }

    SOFT_SKIPS
        .iter()
        .find(|(k, c, s, _)| *k == kind && *c == conditional && *s == status)
        .map(|(_, _, _, value)| Outcome::SoftSkip(*value))
        .unwrap_or(Outcome::Propagate)
}
