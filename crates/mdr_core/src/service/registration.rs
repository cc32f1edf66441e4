//! Registration: appending status rows, single and cascaded.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{validate_window, RegistryService, Result};
use crate::error::RegistryError;
use crate::events::RegistryEvent;
use crate::kinds;
use crate::perms::{self, Actor, PermissionKind};
use crate::principal::Principal;
use crate::store::UnitOfWork;
use crate::types::*;

/// Correction to an existing status row. Only authority managers amend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusAmendment {
    pub state: Option<State>,
    pub registration_date: Option<chrono::NaiveDate>,
    /// `Some(None)` reopens the window.
    pub until_date: Option<Option<chrono::NaiveDate>>,
    pub change_details: Option<String>,
}

impl RegistryService {
    /// Register `item` with `authority` at `state`.
    ///
    /// Returns `Ok(false)` when the acting user lacks permission so that bulk
    /// callers can carry on. Missing entities and storage failures are
    /// errors.
    pub async fn register(
        &self,
        principal: &Principal,
        authority: AuthorityId,
        item: ItemId,
        state: State,
        request: RegistrationRequest,
    ) -> Result<bool> {
        Ok(self
            .register_single(principal, authority, item, state, request)
            .await?
            .is_some())
    }

    /// Like [`register`](Self::register) but returns the new row, or
    /// `PermissionDenied`.
    pub async fn register_item(
        &self,
        principal: &Principal,
        authority: AuthorityId,
        item: ItemId,
        state: State,
        request: RegistrationRequest,
    ) -> Result<Status> {
        self.register_single(principal, authority, item, state, request)
            .await?
            .ok_or_else(|| {
                RegistryError::PermissionDenied(format!(
                    "{principal} may not change the status of item {item}"
                ))
            })
    }

    async fn register_single(
        &self,
        principal: &Principal,
        authority_id: AuthorityId,
        item: ItemId,
        state: State,
        request: RegistrationRequest,
    ) -> Result<Option<Status>> {
        let registration_date = request.registration_date.unwrap_or_else(|| self.clock.today());
        validate_window(registration_date, request.until_date)?;

        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let authority = self.load_authority(uow.as_mut(), authority_id).await?;

        let Some(status) = self
            .register_in(uow.as_mut(), &actor, &authority, item, state, registration_date, &request)
            .await?
        else {
            uow.rollback().await?;
            return Ok(None);
        };

        self.audit(
            uow.as_mut(),
            principal,
            "register",
            &request.change_details,
            vec![item],
        )
        .await?;
        self.commit(uow).await?;
        self.permissions.invalidate_item(item).await;

        tracing::info!(
            item = %item,
            authority = %authority.id,
            state = %state,
            "registered item"
        );
        Ok(Some(status))
    }

    /// Register one item inside an open unit of work. `Ok(None)` means the
    /// actor lacks permission and nothing was written.
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn register_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        authority: &Authority,
        item_id: ItemId,
        state: State,
        registration_date: chrono::NaiveDate,
        request: &RegistrationRequest,
    ) -> Result<Option<Status>> {
        let item = uow
            .lock_item(item_id)
            .await?
            .ok_or_else(|| RegistryError::not_found("item", item_id))?;

        if !actor.is_registrar_of(authority.id)
            || !self
                .permitted(uow, actor, &item, PermissionKind::ChangeStatus)
                .await?
        {
            tracing::warn!(
                item = %item_id,
                authority = %authority.id,
                user = %actor.principal,
                "registration denied"
            );
            return Ok(None);
        }

        let status = Status {
            id: StatusId::new(),
            item: item_id,
            authority: authority.id,
            state,
            registration_date,
            until_date: request.until_date,
            change_details: request.change_details.clone(),
            created: self.clock.now(),
        };
        uow.insert_status(&status).await?;
        self.recache_in(uow, item_id).await?;
        self.emit(
            uow,
            RegistryEvent::StatusChanged {
                item: item_id,
                authority: authority.id,
                status: status.id,
                state,
                registration_date,
            },
        )
        .await?;
        Ok(Some(status))
    }

    /// Register `root` and its declared dependents in one unit of work.
    ///
    /// Items the actor may not register land in `failed`; a storage error
    /// aborts the whole cascade and nothing is written.
    pub async fn cascaded_register(
        &self,
        principal: &Principal,
        authority: AuthorityId,
        root: ItemId,
        state: State,
        request: RegistrationRequest,
    ) -> Result<CascadeOutcome> {
        let registration_date = request.registration_date.unwrap_or_else(|| self.clock.today());
        validate_window(registration_date, request.until_date)?;

        let mut uow = self.store.begin().await?;
        let actor = self.actor(uow.as_mut(), principal).await?;
        let authority = self.load_authority(uow.as_mut(), authority).await?;

        let outcome = self
            .cascade_in(uow.as_mut(), &actor, &authority, root, state, registration_date, &request)
            .await?;

        self.audit(
            uow.as_mut(),
            principal,
            "cascaded_register",
            &request.change_details,
            outcome.success.clone(),
        )
        .await?;
        self.commit(uow).await?;
        for id in &outcome.success {
            self.permissions.invalidate_item(*id).await;
        }

        tracing::info!(
            root = %root,
            authority = %authority.id,
            state = %state,
            total = outcome.total(),
            failed = outcome.failed.len(),
            "cascaded registration complete"
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) async fn cascade_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        authority: &Authority,
        root: ItemId,
        state: State,
        registration_date: chrono::NaiveDate,
        request: &RegistrationRequest,
    ) -> Result<CascadeOutcome> {
        let members = self.registration_set(uow, &[root], true).await?;
        self.register_members(
            uow,
            actor,
            authority,
            &members,
            &[root],
            state,
            registration_date,
            request,
        )
        .await
    }

    /// Register each member once. Items the actor may not register land in
    /// `failed`, as do members other than `roots` that have disappeared.
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn register_members(
        &self,
        uow: &mut dyn UnitOfWork,
        actor: &Actor,
        authority: &Authority,
        members: &[ItemId],
        roots: &[ItemId],
        state: State,
        registration_date: chrono::NaiveDate,
        request: &RegistrationRequest,
    ) -> Result<CascadeOutcome> {
        let mut outcome = CascadeOutcome::default();
        for &id in members {
            match self
                .register_in(uow, actor, authority, id, state, registration_date, request)
                .await
            {
                Ok(Some(_)) => outcome.success.push(id),
                Ok(None) => outcome.failed.push(id),
                // A dangling link is that member's failure, not the batch's.
                Err(RegistryError::NotFound(msg)) if !roots.contains(&id) => {
                    tracing::warn!(item = %id, %msg, "cascade member missing");
                    outcome.failed.push(id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Every item to register for `roots`, each listed once. With `cascade`
    /// each root is followed by its dependents depth-first in declaration
    /// order.
    pub(super) async fn registration_set(
        &self,
        uow: &mut dyn UnitOfWork,
        roots: &[ItemId],
        cascade: bool,
    ) -> Result<Vec<ItemId>> {
        let mut members = Vec::new();
        let mut seen = HashSet::new();
        for &root in roots {
            if !cascade {
                if seen.insert(root) {
                    members.push(root);
                }
                continue;
            }
            if uow.load_item(root).await?.is_none() {
                return Err(RegistryError::not_found("item", root));
            }
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                members.push(id);
                if let Some(item) = uow.load_item(id).await? {
                    stack.extend(kinds::direct_dependents(&item).into_iter().rev());
                }
            }
        }
        Ok(members)
    }

    // ── Status corrections ────────────────────────────────────

    pub async fn delete_status(&self, principal: &Principal, status: StatusId) -> Result<()> {
        let mut uow = self.store.begin().await?;
        let existing = uow
            .load_status(status)
            .await?
            .ok_or_else(|| RegistryError::not_found("status", status))?;
        let authority = self.load_authority(uow.as_mut(), existing.authority).await?;
        require_manager(principal, &authority)?;

        uow.lock_item(existing.item).await?;
        uow.delete_status(status).await?;
        self.recache_in(uow.as_mut(), existing.item).await?;
        self.emit(
            uow.as_mut(),
            RegistryEvent::StatusRemoved {
                item: existing.item,
                authority: existing.authority,
                status,
            },
        )
        .await?;
        self.audit(
            uow.as_mut(),
            principal,
            "delete_status",
            &format!("removed {} status", existing.state),
            vec![existing.item],
        )
        .await?;
        self.commit(uow).await?;
        self.permissions.invalidate_item(existing.item).await;
        Ok(())
    }

    pub async fn amend_status(
        &self,
        principal: &Principal,
        status: StatusId,
        amendment: StatusAmendment,
    ) -> Result<Status> {
        let mut uow = self.store.begin().await?;
        let mut row = uow
            .load_status(status)
            .await?
            .ok_or_else(|| RegistryError::not_found("status", status))?;
        let authority = self.load_authority(uow.as_mut(), row.authority).await?;
        require_manager(principal, &authority)?;

        if let Some(state) = amendment.state {
            row.state = state;
        }
        if let Some(date) = amendment.registration_date {
            row.registration_date = date;
        }
        if let Some(until) = amendment.until_date {
            row.until_date = until;
        }
        if let Some(details) = amendment.change_details {
            row.change_details = details;
        }
        validate_window(row.registration_date, row.until_date)?;

        uow.lock_item(row.item).await?;
        uow.update_status(&row).await?;
        self.recache_in(uow.as_mut(), row.item).await?;
        self.emit(
            uow.as_mut(),
            RegistryEvent::StatusChanged {
                item: row.item,
                authority: row.authority,
                status: row.id,
                state: row.state,
                registration_date: row.registration_date,
            },
        )
        .await?;
        self.audit(
            uow.as_mut(),
            principal,
            "amend_status",
            &row.change_details,
            vec![row.item],
        )
        .await?;
        self.commit(uow).await?;
        self.permissions.invalidate_item(row.item).await;
        Ok(row)
    }
}

fn require_manager(principal: &Principal, authority: &Authority) -> Result<()> {
    if perms::can_manage_authority(principal, authority) {
        Ok(())
    } else {
        Err(RegistryError::PermissionDenied(format!(
            "{principal} does not manage registration authority {}",
            authority.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::RegistryConfig;
    use crate::memory::MemoryStore;
    use crate::store::RegistryStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    struct Fixture {
        service: RegistryService,
        store: MemoryStore,
        admin: Principal,
        registrar: Principal,
        authority: Authority,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        let service = RegistryService::new(Arc::new(store.clone()), Arc::new(RegistryConfig::default()))
            .with_clock(clock);
        let admin = Principal::superuser(UserId::new());
        let registrar_id = UserId::new();
        let mut authority = Authority::new("RA");
        authority.registrars.insert(registrar_id);
        let authority = service.create_authority(&admin, authority).await.unwrap();
        Fixture {
            service,
            store,
            admin,
            registrar: Principal::user(registrar_id),
            authority,
        }
    }

    async fn new_item(f: &Fixture, kind: ItemKind, links: Vec<ItemLink>) -> Item {
        f.service
            .create_item(
                &f.admin,
                NewItem {
                    kind,
                    name: kind.as_str().into(),
                    definition: String::new(),
                    workgroup: None,
                    links,
                    extension: serde_json::Value::Null,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_appends_and_recaches() {
        let f = fixture().await;
        let item = new_item(&f, ItemKind::ObjectClass, vec![]).await;
        let ok = f
            .service
            .register(&f.admin, f.authority.id, item.id, State::Recorded, RegistrationRequest::default())
            .await
            .unwrap();
        assert!(ok);
        let state = f.store.snapshot().await;
        assert_eq!(state.statuses.len(), 1);
        assert!(state.items[&item.id].is_public());
        assert!(state.items[&item.id].is_locked());
    }

    #[tokio::test]
    async fn denied_register_returns_false_and_writes_nothing() {
        let f = fixture().await;
        let item = new_item(&f, ItemKind::ObjectClass, vec![]).await;
        // Not ready for review and not visible to the registrar.
        let ok = f
            .service
            .register(&f.registrar, f.authority.id, item.id, State::Candidate, RegistrationRequest::default())
            .await
            .unwrap();
        assert!(!ok);
        assert!(f.store.snapshot().await.statuses.is_empty());

        let err = f
            .service
            .register_item(&f.registrar, f.authority.id, item.id, State::Candidate, RegistrationRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn register_missing_entities_are_errors() {
        let f = fixture().await;
        let err = f
            .service
            .register(&f.admin, f.authority.id, ItemId::new(), State::Candidate, RegistrationRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let item = new_item(&f, ItemKind::ObjectClass, vec![]).await;
        let err = f
            .service
            .register(&f.admin, AuthorityId::new(), item.id, State::Candidate, RegistrationRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn inverted_window_is_invalid_input() {
        let f = fixture().await;
        let item = new_item(&f, ItemKind::ObjectClass, vec![]).await;
        let request = RegistrationRequest::default()
            .effective_from(NaiveDate::from_ymd_opt(2020, 2, 1).unwrap())
            .until(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        let err = f
            .service
            .register(&f.admin, f.authority.id, item.id, State::Candidate, request)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn cascade_set_is_depth_first_and_deduplicated() {
        let f = fixture().await;
        let oc = new_item(&f, ItemKind::ObjectClass, vec![]).await;
        let prop = new_item(&f, ItemKind::Property, vec![]).await;
        let vd = new_item(&f, ItemKind::ValueDomain, vec![]).await;
        let dec = new_item(
            &f,
            ItemKind::DataElementConcept,
            vec![
                ItemLink { role: LinkRole::ObjectClass, target: oc.id },
                ItemLink { role: LinkRole::Property, target: prop.id },
            ],
        )
        .await;
        let de = new_item(
            &f,
            ItemKind::DataElement,
            vec![
                ItemLink { role: LinkRole::DataElementConcept, target: dec.id },
                ItemLink { role: LinkRole::ValueDomain, target: vd.id },
            ],
        )
        .await;

        let mut uow = f.store.begin().await.unwrap();
        let set = f.service.registration_set(uow.as_mut(), &[de.id], true).await.unwrap();
        assert_eq!(set, vec![de.id, vd.id, dec.id, oc.id, prop.id]);
    }

    #[tokio::test]
    async fn amend_and_delete_status_recache() {
        let f = fixture().await;
        let item = new_item(&f, ItemKind::ObjectClass, vec![]).await;
        let status = f
            .service
            .register_item(&f.admin, f.authority.id, item.id, State::Standard, RegistrationRequest::default())
            .await
            .unwrap();
        assert!(f.store.snapshot().await.items[&item.id].is_public());

        // Registrars cannot amend; managers (here: superuser) can.
        let err = f
            .service
            .amend_status(&f.registrar, status.id, StatusAmendment::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403);

        let amended = f
            .service
            .amend_status(
                &f.admin,
                status.id,
                StatusAmendment {
                    state: Some(State::Candidate),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(amended.state, State::Candidate);
        let snap = f.store.snapshot().await;
        assert!(!snap.items[&item.id].is_public());
        assert!(snap.items[&item.id].is_locked());

        f.service.delete_status(&f.admin, status.id).await.unwrap();
        let snap = f.store.snapshot().await;
        assert!(snap.statuses.is_empty());
        assert_eq!(snap.items[&item.id].visibility, VisibilityFlags::default());
    }
}
