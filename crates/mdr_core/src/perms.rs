//! Per-item permission predicates.
//!
//! Every check is a pure function over an [`Actor`] and the preloaded
//! [`ItemFacts`] of one item. The bulk filters in [`crate::queryset`] call
//! the same functions, so single-item and bulk answers cannot diverge.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::principal::Principal;
use crate::types::{
    Authority, AuthorityId, Item, PublicationRecord, ReviewRequest, Status, Workgroup,
    WorkgroupRole,
};

/// The acting principal plus the authorities they register for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub principal: Principal,
    pub registrar_of: BTreeSet<AuthorityId>,
}

impl Actor {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            registrar_of: BTreeSet::new(),
        }
    }

    /// Resolve registrar memberships from the full authority list.
    pub fn resolve<'a>(principal: Principal, authorities: impl IntoIterator<Item = &'a Authority>) -> Self {
        let registrar_of = match principal.active_user() {
            Some(user) => authorities
                .into_iter()
                .filter(|a| a.is_registrar(user))
                .map(|a| a.id)
                .collect(),
            None => BTreeSet::new(),
        };
        Self {
            principal,
            registrar_of,
        }
    }

    pub fn is_registrar(&self) -> bool {
        !self.registrar_of.is_empty()
    }

    pub fn is_registrar_of(&self, authority: AuthorityId) -> bool {
        self.principal.is_effective_superuser() || self.registrar_of.contains(&authority)
    }

    fn registers_any(&self, authorities: &BTreeSet<AuthorityId>) -> bool {
        !self.registrar_of.is_disjoint(authorities)
    }
}

/// What the predicates need to know about one item, loaded up front.
#[derive(Debug, Clone)]
pub struct ItemFacts {
    pub item: Item,
    pub workgroup: Option<Workgroup>,
    /// Authorities holding a current status for the item today, regardless
    /// of ownership mode.
    pub current_authorities: BTreeSet<AuthorityId>,
    /// Authorities targeted by open review requests that include the item.
    pub review_authorities: BTreeSet<AuthorityId>,
    pub publication: Option<PublicationRecord>,
}

impl ItemFacts {
    pub fn assemble(
        item: Item,
        workgroup: Option<Workgroup>,
        statuses: &[Status],
        reviews: &[ReviewRequest],
        publication: Option<PublicationRecord>,
        today: NaiveDate,
    ) -> Self {
        let current_authorities = crate::temporal::current_statuses(statuses, None, today)
            .into_iter()
            .map(|s| s.authority)
            .collect();
        let review_authorities = reviews
            .iter()
            .filter(|r| r.is_open() && r.items.contains(&item.id))
            .map(|r| r.authority)
            .collect();
        Self {
            item,
            workgroup,
            current_authorities,
            review_authorities,
            publication,
        }
    }

    fn has_workgroup_role(&self, role: WorkgroupRole, principal: &Principal) -> bool {
        match (self.workgroup.as_ref(), principal.active_user()) {
            (Some(wg), Some(user)) => wg.has_role(role, user),
            _ => false,
        }
    }
}

/// Which decision a cached permission entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    View,
    Edit,
    ChangeStatus,
}

impl PermissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::ChangeStatus => "change_status",
        }
    }
}

// ── Predicates ────────────────────────────────────────────────

pub fn can_view(actor: &Actor, facts: &ItemFacts, today: NaiveDate) -> bool {
    if actor.principal.is_effective_superuser() || facts.item.is_public() {
        return true;
    }
    let Some(user) = actor.principal.active_user() else {
        return false;
    };
    if facts.item.submitter == Some(user) {
        return true;
    }
    if facts.workgroup.as_ref().is_some_and(|wg| wg.is_member(user)) {
        return true;
    }
    if actor.is_registrar()
        && (facts.item.ready_to_review
            || actor.registers_any(&facts.current_authorities)
            || actor.registers_any(&facts.review_authorities))
    {
        return true;
    }
    facts
        .publication
        .as_ref()
        .is_some_and(|p| p.is_visible_to_active_on(today))
}

/// Edit implies view.
pub fn can_edit(actor: &Actor, facts: &ItemFacts, today: NaiveDate) -> bool {
    if actor.principal.is_effective_superuser() {
        return true;
    }
    let Some(user) = actor.principal.active_user() else {
        return false;
    };
    if !can_view(actor, facts, today) {
        return false;
    }
    if facts.has_workgroup_role(WorkgroupRole::Steward, &actor.principal) {
        return true;
    }
    !facts.item.is_locked()
        && (facts.has_workgroup_role(WorkgroupRole::Submitter, &actor.principal)
            || facts.item.submitter == Some(user))
}

pub fn can_change_status(actor: &Actor, facts: &ItemFacts, today: NaiveDate) -> bool {
    if actor.principal.is_effective_superuser() {
        return true;
    }
    if !actor.is_registrar() || !can_view(actor, facts, today) {
        return false;
    }
    facts.item.ready_to_review
        || actor.registers_any(&facts.review_authorities)
        || facts.item.is_public()
}

/// True while the permission cache must be bypassed for the item.
pub fn modified_very_recently(item: &Item, now: DateTime<Utc>, window: Duration) -> bool {
    item.was_modified_within(now, window)
}

pub fn can_manage_authority(principal: &Principal, authority: &Authority) -> bool {
    principal.is_effective_superuser()
        || principal
            .active_user()
            .is_some_and(|user| authority.is_manager(user))
}

pub fn can_manage_workgroup(principal: &Principal, workgroup: &Workgroup) -> bool {
    principal.is_effective_superuser()
        || principal
            .active_user()
            .is_some_and(|user| workgroup.has_role(WorkgroupRole::Manager, user))
}
