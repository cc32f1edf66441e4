//! Item content: creation, optimistic-concurrency edits, deletion, and the
//! visibility-filtered listings.

use chrono::NaiveDate;

use super::{RegistryService, Result};
use crate::error::RegistryError;
use crate::events::RegistryEvent;
use crate::kinds;
use crate::perms::PermissionKind;
use crate::principal::Principal;
use crate::queryset::ConceptQuerySet;
use crate::store::UnitOfWork;
use crate::temporal;
use crate::types::*;

/// Which bulk filter to apply in [`RegistryService::list_items`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemQuery {
    Visible,
    Editable,
    Public,
}

impl RegistryService {
    pub async fn create_item(&self, principal: &Principal, new: NewItem) -> Result<Item> {
        let submitter = principal.require_user()?;
        let mut uow = self.store.begin().await?;

        if let Some(wg_id) = new.workgroup {
            let wg = self.load_workgroup(uow.as_mut(), wg_id).await?;
            if wg.archived {
                return Err(RegistryError::Conflict(format!(
                    "workgroup {wg_id} is archived"
                )));
            }
            let may_submit = principal.is_effective_superuser()
                || wg.has_role(WorkgroupRole::Submitter, submitter)
                || wg.has_role(WorkgroupRole::Steward, submitter)
                || wg.has_role(WorkgroupRole::Manager, submitter);
            if !may_submit {
                return Err(RegistryError::PermissionDenied(format!(
                    "{principal} may not submit to workgroup {wg_id}"
                )));
            }
        }

        let mut item = Item::new(new.kind, new.name, self.clock.now()).submitted_by(submitter);
        item.definition = new.definition;
        item.workgroup = new.workgroup;
        item.links = new.links;
        item.extension = new.extension;
        self.check_links(uow.as_mut(), &item).await?;

        uow.insert_item(&item).await?;
        self.emit(
            uow.as_mut(),
            RegistryEvent::ItemCreated {
                item: item.id,
                kind: item.kind,
            },
        )
        .await?;
        self.audit(uow.as_mut(), principal, "create_item", &item.name, vec![item.id])
            .await?;
        self.commit(uow).await?;
        tracing::debug!(item = %item.id, kind = %item.kind, "created item");
        Ok(item)
    }

    /// Apply a content edit. Rejected with `StaleEdit` when the item changed
    /// after `edit.last_fetched`.
    pub async fn edit_item(&self, principal: &Principal, edit: ItemEdit) -> Result<Item> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let mut item = uow
            .lock_item(edit.item)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", edit.item))?;
        self.require(uow.as_mut(), &actor, &item, PermissionKind::Edit)
            .await?;

        if item.modified > edit.last_fetched {
            return Err(RegistryError::StaleEdit {
                item: item.id,
                modified: item.modified,
                last_fetched: edit.last_fetched,
            });
        }

        let fields = edit.changed_fields();
        if fields.is_empty() {
            return Ok(item);
        }
        if let Some(name) = edit.name {
            item.name = name;
        }
        if let Some(definition) = edit.definition {
            item.definition = definition;
        }
        if let Some(ready) = edit.ready_to_review {
            item.ready_to_review = ready;
        }
        if let Some(links) = edit.links {
            item.links = links;
            self.check_links(uow.as_mut(), &item).await?;
        }
        item.modified = self.clock.now();

        uow.update_item(&item).await?;
        self.emit(
            uow.as_mut(),
            RegistryEvent::ItemEdited {
                item: item.id,
                fields: fields.iter().map(|f| f.to_string()).collect(),
            },
        )
        .await?;
        self.audit(
            uow.as_mut(),
            principal,
            "edit_item",
            &fields.join(","),
            vec![item.id],
        )
        .await?;
        self.commit(uow).await?;
        self.permissions.invalidate_item(item.id).await;
        Ok(item)
    }

    /// Registered items cannot be deleted.
    pub async fn delete_item(&self, principal: &Principal, item_id: ItemId) -> Result<()> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let item = uow
            .lock_item(item_id)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item_id))?;
        self.require(uow.as_mut(), &actor, &item, PermissionKind::Edit)
            .await?;

        let statuses = uow.statuses_for_item(item_id).await?;
        if temporal::is_registered(&statuses) {
            return Err(RegistryError::Conflict(format!(
                "item {item_id} has {} registration status record(s)",
                statuses.len()
            )));
        }

        uow.delete_item(item_id).await?;
        self.emit(uow.as_mut(), RegistryEvent::ItemDeleted { item: item_id })
            .await?;
        self.audit(uow.as_mut(), principal, "delete_item", &item.name, vec![item_id])
            .await?;
        self.commit(uow).await?;
        self.permissions.invalidate_item(item_id).await;
        Ok(())
    }

    async fn check_links(&self, uow: &mut dyn UnitOfWork, item: &Item) -> Result<()> {
        kinds::validate_links(item)?;
        for link in &item.links {
            let target = uow.load_item(link.target).await?.ok_or_else(|| {
                RegistryError::InvalidInput(format!(
                    "{} link points at missing item {}",
                    link.role.as_str(),
                    link.target
                ))
            })?;
            if kinds::expected_target_kind(item.kind, link.role) != Some(target.kind) {
                return Err(RegistryError::InvalidInput(format!(
                    "{} link must point at a {}, not a {}",
                    link.role.as_str(),
                    kinds::expected_target_kind(item.kind, link.role)
                        .map(|k| k.as_str())
                        .unwrap_or("nothing"),
                    target.kind
                )));
            }
        }
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────

    /// One item, if the principal may view it.
    pub async fn get_item(&self, principal: &Principal, item_id: ItemId) -> Result<Item> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let item = uow
            .load_item(item_id)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item_id))?;
        self.require(uow.as_mut(), &actor, &item, PermissionKind::View)
            .await?;
        uow.rollback().await?;
        Ok(item)
    }

    /// Current status per authority at `when` (default today), for history
    /// display. All authorities are listed regardless of ownership mode.
    pub async fn current_statuses(
        &self,
        principal: &Principal,
        item_id: ItemId,
        when: Option<NaiveDate>,
    ) -> Result<Vec<Status>> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let item = uow
            .load_item(item_id)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item_id))?;
        self.require(uow.as_mut(), &actor, &item, PermissionKind::View)
            .await?;
        let statuses = uow.statuses_for_item(item_id).await?;
        uow.rollback().await?;
        let when = when.unwrap_or_else(|| self.clock.today());
        Ok(temporal::current_statuses(&statuses, None, when)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Anonymous and inactive principals, and the public listing, read the
    /// cached flag directly. Superusers get every item. Everyone else is
    /// filtered over facts loaded in bulk.
    pub async fn list_items(&self, principal: &Principal, query: ItemQuery) -> Result<Vec<Item>> {
        let superuser = principal.is_effective_superuser();
        let signed_out = !superuser && principal.active_user().is_none();
        let mut uow = self.store.begin().await?;
        let items = match query {
            ItemQuery::Public => uow.public_items().await?,
            ItemQuery::Visible if signed_out => uow.public_items().await?,
            ItemQuery::Editable if signed_out => Vec::new(),
            _ if superuser => uow.list_items().await?,
            _ => {
                let actor = self.actor(uow.as_mut(), principal).await?;
                let all = uow.list_items().await?;
                let facts = self.bulk_item_facts(uow.as_mut(), all).await?;
                let qs = ConceptQuerySet::new(&facts, self.clock.today());
                let selected = match query {
                    ItemQuery::Editable => qs.editable(&actor),
                    _ => qs.visible(&actor),
                };
                selected.into_iter().cloned().collect()
            }
        };
        uow.rollback().await?;
        Ok(items)
    }

    pub async fn visible_items(&self, principal: &Principal) -> Result<Vec<Item>> {
        self.list_items(principal, ItemQuery::Visible).await
    }

    pub async fn editable_items(&self, principal: &Principal) -> Result<Vec<Item>> {
        self.list_items(principal, ItemQuery::Editable).await
    }

    pub async fn public_items(&self) -> Result<Vec<Item>> {
        self.list_items(&Principal::anonymous(), ItemQuery::Public)
            .await
    }

    pub async fn audit_trail(&self, principal: &Principal, item_id: ItemId) -> Result<Vec<AuditEntry>> {
        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let item = uow
            .load_item(item_id)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item_id))?;
        self.require(uow.as_mut(), &actor, &item, PermissionKind::View)
            .await?;
        let entries = uow.audit_for_item(item_id).await?;
        uow.rollback().await?;
        Ok(entries)
    }
}
