//! Visibility evaluation: current statuses against per-authority thresholds.
//!
//! `is_public` and `is_locked` are independent predicates over the same
//! current set. A state that clears the public threshold normally clears the
//! locked one as well, but nothing here relies on that.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use chrono::NaiveDate;

use crate::error::RegistryError;
use crate::temporal::current_statuses;
use crate::types::{
    Authority, AuthorityId, OwnershipMode, PublicationRecord, Status, VisibilityFlags, Workgroup,
};

/// Authorities whose statuses count for an item in `workgroup`.
///
/// `None` means "any authority" (registry mode, or no workgroup at all).
pub fn candidate_authorities(workgroup: Option<&Workgroup>) -> Option<BTreeSet<AuthorityId>> {
    match workgroup {
        Some(wg) if wg.ownership == OwnershipMode::Authority => Some(wg.authorities.clone()),
        _ => None,
    }
}

/// Compute the flags for one item at `when`.
///
/// `statuses` is the item's full history; `authorities` must contain every
/// authority a counted status references, otherwise the store is
/// inconsistent and evaluation fails.
pub fn evaluate(
    workgroup: Option<&Workgroup>,
    statuses: &[Status],
    authorities: &BTreeMap<AuthorityId, Authority>,
    publication: Option<&PublicationRecord>,
    when: NaiveDate,
) -> Result<VisibilityFlags, RegistryError> {
    let candidates = candidate_authorities(workgroup);
    let current = current_statuses(statuses, candidates.as_ref(), when);

    let mut flags = VisibilityFlags::default();
    for status in current {
        let authority = authorities.get(&status.authority).ok_or_else(|| {
            RegistryError::Internal(anyhow!(
                "status {} references missing authority {}",
                status.id,
                status.authority
            ))
        })?;
        if status.state >= authority.public_state {
            flags.is_public = true;
        }
        if status.state >= authority.locked_state {
            flags.is_locked = true;
        }
    }

    if publication.is_some_and(|record| record.is_public_on(when)) {
        flags.is_public = true;
    }

    Ok(flags)
}
