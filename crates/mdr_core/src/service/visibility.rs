//! Visibility cache maintenance and the configuration changes that
//! invalidate it.
//!
//! Status writes and publication records recache the single item in the same
//! unit of work. Threshold and workgroup ownership changes touch every item
//! of an authority or workgroup; those are never recached automatically and
//! log a critical warning until an operator runs the matching batch job.

use chrono::NaiveDate;

use super::{RegistryService, Result};
use crate::error::RegistryError;
use crate::events::RegistryEvent;
use crate::perms::{self, PermissionKind};
use crate::principal::Principal;
use crate::store::UnitOfWork;
use crate::types::*;
use crate::visibility::evaluate;

impl RegistryService {
    /// Recompute and persist the cached flags of one item.
    ///
    /// On failure nothing is written and the previous flags stay in place.
    pub async fn recache(&self, item: ItemId) -> Result<VisibilityFlags> {
        let mut uow = self.store.begin().await?;
        let flags = self.recache_in(uow.as_mut(), item).await?;
        self.commit(uow).await?;
        self.permissions.invalidate_item(item).await;
        Ok(flags)
    }

    pub(super) async fn recache_in(
        &self,
        uow: &mut dyn UnitOfWork,
        item_id: ItemId,
    ) -> Result<VisibilityFlags> {
        let item = uow
            .lock_item(item_id)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item_id))?;
        let workgroup = match item.workgroup {
            Some(id) => Some(self.load_workgroup(uow, id).await?),
            None => None,
        };
        let statuses = uow.statuses_for_item(item_id).await?;
        let authorities = self.authorities_for(uow, &statuses).await?;
        let publication = uow.load_publication(item_id).await?;

        let flags = evaluate(
            workgroup.as_ref(),
            &statuses,
            &authorities,
            publication.as_ref(),
            self.clock.today(),
        )?;

        if flags != item.visibility {
            uow.update_visibility(item_id, flags).await?;
            self.emit(
                uow,
                RegistryEvent::VisibilityUpdated {
                    item: item_id,
                    before: item.visibility,
                    after: flags,
                },
            )
            .await?;
            tracing::debug!(
                item = %item_id,
                is_public = flags.is_public,
                is_locked = flags.is_locked,
                "visibility changed"
            );
        }
        Ok(flags)
    }

    // ── Batch jobs ────────────────────────────────────────────

    /// Recache every item that has ever been registered by `authority`.
    pub async fn recache_authority(&self, authority: AuthorityId) -> Result<RecacheReport> {
        let mut uow = self.store.begin().await?;
        self.load_authority(uow.as_mut(), authority).await?;
        let items = uow.items_registered_by(authority).await?;
        uow.rollback().await?;

        tracing::info!(authority = %authority, items = items.len(), "recaching items registered by authority");
        let report = self.recache_each(items).await?;
        tracing::info!(
            authority = %authority,
            scanned = report.scanned,
            changed = report.changed,
            failed = report.failed.len(),
            "authority recache complete"
        );
        Ok(report)
    }

    /// Recache every item in `workgroup`.
    pub async fn recache_workgroup(&self, workgroup: WorkgroupId) -> Result<RecacheReport> {
        let mut uow = self.store.begin().await?;
        self.load_workgroup(uow.as_mut(), workgroup).await?;
        let items = uow.items_in_workgroup(workgroup).await?;
        uow.rollback().await?;

        tracing::info!(workgroup = %workgroup, items = items.len(), "recaching items in workgroup");
        let report = self.recache_each(items).await?;
        tracing::info!(
            workgroup = %workgroup,
            scanned = report.scanned,
            changed = report.changed,
            failed = report.failed.len(),
            "workgroup recache complete"
        );
        Ok(report)
    }

    /// One unit of work per item, so an interrupted run keeps its progress
    /// and a re-run only redoes what is left. An item that fails is logged,
    /// listed in the report and skipped.
    async fn recache_each(&self, items: Vec<ItemId>) -> Result<RecacheReport> {
        let mut report = RecacheReport::default();
        for id in items {
            match self.recache_one(id).await {
                Ok(None) => {}
                Ok(Some(changed)) => {
                    report.scanned += 1;
                    if changed {
                        report.changed += 1;
                        self.permissions.invalidate_item(id).await;
                    }
                }
                Err(e) => {
                    tracing::error!(item = %id, error = %e, "recache failed; item keeps its previous flags");
                    report.scanned += 1;
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// None when the item was deleted since the scan.
    async fn recache_one(&self, id: ItemId) -> Result<Option<bool>> {
        let mut uow = self.store.begin().await?;
        let Some(before) = uow.load_item(id).await?.map(|item| item.visibility) else {
            uow.rollback().await?;
            return Ok(None);
        };
        // Dropping the unit of work on error discards it.
        let after = self.recache_in(uow.as_mut(), id).await?;
        self.commit(uow).await?;
        Ok(Some(after != before))
    }

    // ── Configuration changes (bulk triggers) ─────────────────

    pub async fn update_thresholds(
        &self,
        principal: &Principal,
        authority: AuthorityId,
        locked_state: State,
        public_state: State,
    ) -> Result<Authority> {
        Authority::validate_thresholds(locked_state, public_state)?;
        let mut uow = self.store.begin().await?;
        let mut ra = self.load_authority(uow.as_mut(), authority).await?;
        if !perms::can_manage_authority(principal, &ra) {
            return Err(RegistryError::PermissionDenied(format!(
                "{principal} does not manage registration authority {authority}"
            )));
        }
        if ra.locked_state == locked_state && ra.public_state == public_state {
            return Ok(ra);
        }

        ra.locked_state = locked_state;
        ra.public_state = public_state;
        uow.save_authority(&ra).await?;
        self.emit(
            uow.as_mut(),
            RegistryEvent::ThresholdsChanged {
                authority,
                locked_state,
                public_state,
            },
        )
        .await?;
        self.commit(uow).await?;

        tracing::error!(
            critical = true,
            authority = %authority,
            locked_state = %locked_state,
            public_state = %public_state,
            "registration authority changed its public or locked threshold; items it registered \
             may have stale visibility until recache-authority is run"
        );
        Ok(ra)
    }

    pub async fn set_workgroup_ownership(
        &self,
        principal: &Principal,
        workgroup: WorkgroupId,
        ownership: OwnershipMode,
    ) -> Result<Workgroup> {
        self.change_workgroup(principal, workgroup, |wg| {
            let changed = wg.ownership != ownership;
            wg.ownership = ownership;
            Ok(changed)
        })
        .await
    }

    pub async fn associate_authority(
        &self,
        principal: &Principal,
        workgroup: WorkgroupId,
        authority: AuthorityId,
    ) -> Result<Workgroup> {
        {
            let mut uow = self.store.begin().await?;
            self.load_authority(uow.as_mut(), authority).await?;
            uow.rollback().await?;
        }
        self.change_workgroup(principal, workgroup, |wg| Ok(wg.authorities.insert(authority)))
            .await
    }

    pub async fn dissociate_authority(
        &self,
        principal: &Principal,
        workgroup: WorkgroupId,
        authority: AuthorityId,
    ) -> Result<Workgroup> {
        self.change_workgroup(principal, workgroup, |wg| Ok(wg.authorities.remove(&authority)))
            .await
    }

    async fn change_workgroup(
        &self,
        principal: &Principal,
        workgroup: WorkgroupId,
        apply: impl FnOnce(&mut Workgroup) -> Result<bool>,
    ) -> Result<Workgroup> {
        let mut uow = self.store.begin().await?;
        let mut wg = self.load_workgroup(uow.as_mut(), workgroup).await?;
        if !perms::can_manage_workgroup(principal, &wg) {
            return Err(RegistryError::PermissionDenied(format!(
                "{principal} does not manage workgroup {workgroup}"
            )));
        }
        if !apply(&mut wg)? {
            return Ok(wg);
        }
        uow.save_workgroup(&wg).await?;
        self.emit(
            uow.as_mut(),
            RegistryEvent::WorkgroupOwnershipChanged { workgroup },
        )
        .await?;
        self.commit(uow).await?;

        tracing::error!(
            critical = true,
            workgroup = %workgroup,
            ownership = wg.ownership.as_str(),
            authorities = wg.authorities.len(),
            "workgroup ownership changed; its items may have stale visibility until \
             recache-workgroup is run"
        );
        Ok(wg)
    }

    // ── Publication records (single-item trigger) ─────────────

    pub async fn publish(
        &self,
        principal: &Principal,
        item: ItemId,
        visibility: PublicationVisibility,
        publication_date: Option<NaiveDate>,
        note: Option<String>,
    ) -> Result<PublicationRecord> {
        let publisher = principal.require_user()?;
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let target = uow
            .lock_item(item)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item))?;
        self.require(uow.as_mut(), &actor, &target, PermissionKind::Edit)
            .await?;

        let record = PublicationRecord {
            item,
            publisher,
            visibility,
            publication_date: publication_date.unwrap_or_else(|| self.clock.today()),
            note,
            created: self.clock.now(),
        };
        uow.save_publication(&record).await?;
        self.recache_in(uow.as_mut(), item).await?;
        self.audit(
            uow.as_mut(),
            principal,
            "publish",
            visibility.as_str(),
            vec![item],
        )
        .await?;
        self.commit(uow).await?;
        self.permissions.invalidate_item(item).await;
        tracing::info!(item = %item, visibility = visibility.as_str(), "published item");
        Ok(record)
    }

    /// Returns false when the item had no publication record.
    pub async fn unpublish(&self, principal: &Principal, item: ItemId) -> Result<bool> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let target = uow
            .lock_item(item)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item))?;
        self.require(uow.as_mut(), &actor, &target, PermissionKind::Edit)
            .await?;

        if !uow.delete_publication(item).await? {
            uow.rollback().await?;
            return Ok(false);
        }
        self.recache_in(uow.as_mut(), item).await?;
        self.audit(uow.as_mut(), principal, "unpublish", "", vec![item])
            .await?;
        self.commit(uow).await?;
        self.permissions.invalidate_item(item).await;
        Ok(true)
    }
}
