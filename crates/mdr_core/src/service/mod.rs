//! RegistryService, the registration and visibility service.
//!
//! Holds the storage port as `Arc<dyn RegistryStore>` so the same logic runs
//! against Postgres or the in-memory store. Every command opens exactly one
//! unit of work; status writes, recached flags, audit entries and outbox
//! events for that command commit together.
//!
//! All methods take `&Principal` explicitly. There is no implicit identity.

mod items;
mod registration;
mod reviews;
mod visibility;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::anyhow;

use crate::clock::{Clock, SystemClock};
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::events::{OutboxEvent, RegistryEvent};
use crate::perm_cache::PermissionCache;
use crate::perms::{self, Actor, ItemFacts, PermissionKind};
use crate::principal::Principal;
use crate::store::{RegistryStore, UnitOfWork};
use crate::types::*;

pub use items::ItemQuery;
pub use registration::StatusAmendment;
pub use reviews::NewReviewRequest;

pub type Result<T> = std::result::Result<T, RegistryError>;

pub struct RegistryService {
    store: Arc<dyn RegistryStore>,
    permissions: PermissionCache,
    clock: Arc<dyn Clock>,
    config: Arc<RegistryConfig>,
}

impl RegistryService {
    pub fn new(store: Arc<dyn RegistryStore>, config: Arc<RegistryConfig>) -> Self {
        Self {
            store,
            permissions: PermissionCache::from_config(&config),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the time source (builder pattern).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn permission_cache(&self) -> &PermissionCache {
        &self.permissions
    }

    // ── Permission checks ─────────────────────────────────────

    pub async fn can_view(&self, principal: &Principal, item: ItemId) -> Result<bool> {
        self.check_permission(principal, item, PermissionKind::View).await
    }

    pub async fn can_edit(&self, principal: &Principal, item: ItemId) -> Result<bool> {
        self.check_permission(principal, item, PermissionKind::Edit).await
    }

    pub async fn can_change_status(&self, principal: &Principal, item: ItemId) -> Result<bool> {
        self.check_permission(principal, item, PermissionKind::ChangeStatus)
            .await
    }

    async fn check_permission(
        &self,
        principal: &Principal,
        item_id: ItemId,
        kind: PermissionKind,
    ) -> Result<bool> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let item = uow
            .load_item(item_id)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item_id))?;
        let allowed = self.permitted(uow.as_mut(), &actor, &item, kind).await?;
        uow.rollback().await?;
        Ok(allowed)
    }

    /// Cached permission decision. Items modified inside the very-recent
    /// window are always evaluated fresh.
    async fn permitted(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        item: &Item,
        kind: PermissionKind,
    ) -> Result<bool> {
        let now = self.clock.now();
        let bypass =
            perms::modified_very_recently(item, now, self.config.very_recent_window());
        if !bypass {
            if let Some(hit) = self.permissions.get(&actor.principal, item.id, kind).await {
                return Ok(hit);
            }
        }

        let facts = self.item_facts(uow, item.clone()).await?;
        let today = now.date_naive();
        let allowed = match kind {
            PermissionKind::View => perms::can_view(actor, &facts, today),
            PermissionKind::Edit => perms::can_edit(actor, &facts, today),
            PermissionKind::ChangeStatus => perms::can_change_status(actor, &facts, today),
        };
        self.permissions
            .insert(&actor.principal, item.id, kind, allowed)
            .await;
        Ok(allowed)
    }

    async fn require(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        item: &Item,
        kind: PermissionKind,
    ) -> Result<()> {
        if self.permitted(uow, actor, item, kind).await? {
            Ok(())
        } else {
            Err(RegistryError::PermissionDenied(format!(
                "{} may not {} item {}",
                actor.principal,
                kind.as_str(),
                item.id
            )))
        }
    }

    // ── Shared helpers ────────────────────────────────────────

    async fn actor(&self, uow: &mut dyn UnitOfWork, principal: &Principal) -> Result<Actor> {
        if principal.active_user().is_none() {
            return Ok(Actor::new(*principal));
        }
        let authorities = uow.list_authorities().await?;
        Ok(Actor::resolve(*principal, authorities.iter()))
    }

    async fn item_facts(&self, uow: &mut dyn UnitOfWork, item: Item) -> Result<ItemFacts> {
        let workgroup = match item.workgroup {
            Some(id) => uow.load_workgroup(id).await?,
            None => None,
        };
        let statuses = uow.statuses_for_item(item.id).await?;
        let reviews = uow.reviews_for_item(item.id).await?;
        let publication = uow.load_publication(item.id).await?;
        Ok(ItemFacts::assemble(
            item,
            workgroup,
            &statuses,
            &reviews,
            publication,
            self.clock.today(),
        ))
    }

    /// Facts for a whole listing with one query per table instead of one
    /// round of queries per item.
    async fn bulk_item_facts(
        &self,
        uow: &mut dyn UnitOfWork,
        items: Vec<Item>,
    ) -> Result<Vec<ItemFacts>> {
        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        let mut workgroup_ids: Vec<WorkgroupId> = items.iter().filter_map(|i| i.workgroup).collect();
        workgroup_ids.sort();
        workgroup_ids.dedup();

        let workgroups: HashMap<WorkgroupId, Workgroup> = uow
            .load_workgroups(&workgroup_ids)
            .await?
            .into_iter()
            .map(|wg| (wg.id, wg))
            .collect();
        let mut statuses: HashMap<ItemId, Vec<Status>> = HashMap::new();
        for status in uow.statuses_for_items(&ids).await? {
            statuses.entry(status.item).or_default().push(status);
        }
        let mut reviews: HashMap<ItemId, Vec<ReviewRequest>> = HashMap::new();
        for review in uow.open_reviews_for_items(&ids).await? {
            for id in &review.items {
                reviews.entry(*id).or_default().push(review.clone());
            }
        }
        let mut publications: HashMap<ItemId, PublicationRecord> = uow
            .publications_for_items(&ids)
            .await?
            .into_iter()
            .map(|p| (p.item, p))
            .collect();

        let today = self.clock.today();
        Ok(items
            .into_iter()
            .map(|item| {
                let workgroup = item.workgroup.and_then(|id| workgroups.get(&id).cloned());
                let statuses = statuses.remove(&item.id).unwrap_or_default();
                let reviews = reviews.remove(&item.id).unwrap_or_default();
                let publication = publications.remove(&item.id);
                ItemFacts::assemble(item, workgroup, &statuses, &reviews, publication, today)
            })
            .collect())
    }

    async fn load_authority(
        &self,
        uow: &mut dyn UnitOfWork,
        id: AuthorityId,
    ) -> Result<Authority> {
        uow.load_authority(id)
            .await?
            .ok_or_else(|| RegistryError::not_found("registration authority", id))
    }

    async fn load_workgroup(
        &self,
        uow: &mut dyn UnitOfWork,
        id: WorkgroupId,
    ) -> Result<Workgroup> {
        uow.load_workgroup(id)
            .await?
            .ok_or_else(|| RegistryError::not_found("workgroup", id))
    }

    /// Authorities referenced by `statuses`. Missing ones are left out and
    /// surface as an evaluation error if they would have counted.
    async fn authorities_for(
        &self,
        uow: &mut dyn UnitOfWork,
        statuses: &[Status],
    ) -> Result<BTreeMap<AuthorityId, Authority>> {
        let mut map = BTreeMap::new();
        for status in statuses {
            if map.contains_key(&status.authority) {
                continue;
            }
            if let Some(authority) = uow.load_authority(status.authority).await? {
                map.insert(authority.id, authority);
            }
        }
        Ok(map)
    }

    async fn audit(
        &self,
        uow: &mut dyn UnitOfWork,
        principal: &Principal,
        action: &str,
        comment: &str,
        items: Vec<ItemId>,
    ) -> Result<()> {
        let entry = AuditEntry {
            id: AuditId::new(),
            actor: principal.user_id,
            action: action.to_string(),
            comment: comment.to_string(),
            items,
            at: self.clock.now(),
        };
        uow.append_audit(&entry).await?;
        Ok(())
    }

    async fn emit(&self, uow: &mut dyn UnitOfWork, event: RegistryEvent) -> Result<()> {
        uow.enqueue_event(&event, self.clock.now()).await?;
        Ok(())
    }

    async fn commit(&self, uow: Box<dyn UnitOfWork>) -> Result<()> {
        uow.commit()
            .await
            .map_err(|e| RegistryError::Internal(anyhow!("commit failed: {e}")))
    }

    // ── Superuser setup ───────────────────────────────────────

    pub async fn create_authority(
        &self,
        principal: &Principal,
        authority: Authority,
    ) -> Result<Authority> {
        require_superuser(principal)?;
        Authority::validate_thresholds(authority.locked_state, authority.public_state)?;
        let mut uow = self.store.begin().await?;
        if uow.load_authority(authority.id).await?.is_some() {
            return Err(RegistryError::Conflict(format!(
                "registration authority {} already exists",
                authority.id
            )));
        }
        uow.save_authority(&authority).await?;
        self.commit(uow).await?;
        tracing::info!(authority = %authority.id, name = %authority.name, "created registration authority");
        Ok(authority)
    }

    pub async fn create_workgroup(
        &self,
        principal: &Principal,
        workgroup: Workgroup,
    ) -> Result<Workgroup> {
        require_superuser(principal)?;
        let mut uow = self.store.begin().await?;
        if uow.load_workgroup(workgroup.id).await?.is_some() {
            return Err(RegistryError::Conflict(format!(
                "workgroup {} already exists",
                workgroup.id
            )));
        }
        for authority in &workgroup.authorities {
            self.load_authority(uow.as_mut(), *authority).await?;
        }
        uow.save_workgroup(&workgroup).await?;
        self.commit(uow).await?;
        tracing::info!(workgroup = %workgroup.id, name = %workgroup.name, "created workgroup");
        Ok(workgroup)
    }

    // ── Outbox ────────────────────────────────────────────────

    /// Hand pending events to a consumer. Events are removed once returned.
    pub async fn drain_events(&self, max: usize) -> Result<Vec<OutboxEvent>> {
        let mut uow = self.store.begin().await?;
        let events = uow.drain_events(max).await?;
        self.commit(uow).await?;
        Ok(events)
    }
}

fn require_superuser(principal: &Principal) -> Result<()> {
    if principal.is_effective_superuser() {
        Ok(())
    } else {
        Err(RegistryError::PermissionDenied(format!(
            "{principal} is not a superuser"
        )))
    }
}

fn validate_window(registration_date: chrono::NaiveDate, until_date: Option<chrono::NaiveDate>) -> Result<()> {
    match until_date {
        Some(until) if until < registration_date => Err(RegistryError::InvalidInput(format!(
            "until date {until} is before registration date {registration_date}"
        ))),
        _ => Ok(()),
    }
}
