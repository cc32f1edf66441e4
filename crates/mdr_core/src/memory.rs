//! In-memory [`RegistryStore`].
//!
//! Units of work are serialized by one `tokio::sync::Mutex`: a unit of work
//! holds the lock from `begin` until commit, rollback or drop, and edits a
//! private copy of the state that is written back only on commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::events::{OutboxEvent, RegistryEvent};
use crate::store::{RegistryStore, UnitOfWork};
use crate::types::*;

/// Complete registry state.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    pub items: BTreeMap<ItemId, Item>,
    pub statuses: BTreeMap<StatusId, Status>,
    pub authorities: BTreeMap<AuthorityId, Authority>,
    pub workgroups: BTreeMap<WorkgroupId, Workgroup>,
    pub publications: HashMap<ItemId, PublicationRecord>,
    pub reviews: BTreeMap<ReviewRequestId, ReviewRequest>,
    pub audit: Vec<AuditEntry>,
    pub outbox: Vec<OutboxEvent>,
    pub next_seq: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<RegistryState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> RegistryState {
        self.state.lock().await.clone()
    }

    /// Make the next commit fail as a storage error would, discarding the
    /// unit of work.
    pub fn inject_commit_failure(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            fail_commit: self.fail_next_commit.clone(),
        }))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<RegistryState>,
    working: RegistryState,
    fail_commit: Arc<AtomicBool>,
}

impl MemoryUnitOfWork {
    fn item_mut(&mut self, id: ItemId) -> Result<&mut Item> {
        self.working
            .items
            .get_mut(&id)
            .ok_or_else(|| anyhow!("item {id} does not exist"))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    // ── Items ──

    async fn load_item(&mut self, id: ItemId) -> Result<Option<Item>> {
        Ok(self.working.items.get(&id).cloned())
    }

    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>> {
        // The whole state is already exclusively held.
        self.load_item(id).await
    }

    async fn insert_item(&mut self, item: &Item) -> Result<()> {
        if self.working.items.contains_key(&item.id) {
            bail!("item {} already exists", item.id);
        }
        self.working.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> Result<()> {
        let stored = self.item_mut(item.id)?;
        let visibility = stored.visibility;
        *stored = Item {
            visibility,
            ..item.clone()
        };
        Ok(())
    }

    async fn update_visibility(&mut self, id: ItemId, flags: VisibilityFlags) -> Result<()> {
        self.item_mut(id)?.visibility = flags;
        Ok(())
    }

    async fn delete_item(&mut self, id: ItemId) -> Result<()> {
        self.working.items.remove(&id);
        self.working.publications.remove(&id);
        Ok(())
    }

    async fn list_items(&mut self) -> Result<Vec<Item>> {
        Ok(self.working.items.values().cloned().collect())
    }

    async fn public_items(&mut self) -> Result<Vec<Item>> {
        Ok(self
            .working
            .items
            .values()
            .filter(|i| i.is_public())
            .cloned()
            .collect())
    }

    async fn items_in_workgroup(&mut self, workgroup: WorkgroupId) -> Result<Vec<ItemId>> {
        Ok(self
            .working
            .items
            .values()
            .filter(|i| i.workgroup == Some(workgroup))
            .map(|i| i.id)
            .collect())
    }

    async fn items_registered_by(&mut self, authority: AuthorityId) -> Result<Vec<ItemId>> {
        let mut ids: Vec<ItemId> = self
            .working
            .statuses
            .values()
            .filter(|s| s.authority == authority)
            .map(|s| s.item)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    // ── Statuses ──

    async fn statuses_for_item(&mut self, item: ItemId) -> Result<Vec<Status>> {
        Ok(self
            .working
            .statuses
            .values()
            .filter(|s| s.item == item)
            .cloned()
            .collect())
    }

    async fn statuses_for_items(&mut self, items: &[ItemId]) -> Result<Vec<Status>> {
        let wanted: HashSet<ItemId> = items.iter().copied().collect();
        Ok(self
            .working
            .statuses
            .values()
            .filter(|s| wanted.contains(&s.item))
            .cloned()
            .collect())
    }

    async fn load_status(&mut self, id: StatusId) -> Result<Option<Status>> {
        Ok(self.working.statuses.get(&id).cloned())
    }

    async fn insert_status(&mut self, status: &Status) -> Result<()> {
        if !self.working.items.contains_key(&status.item) {
            bail!("status {} references missing item {}", status.id, status.item);
        }
        if self.working.statuses.contains_key(&status.id) {
            bail!("status {} already exists", status.id);
        }
        self.working.statuses.insert(status.id, status.clone());
        Ok(())
    }

    async fn update_status(&mut self, status: &Status) -> Result<()> {
        match self.working.statuses.get_mut(&status.id) {
            Some(stored) => {
                *stored = status.clone();
                Ok(())
            }
            None => bail!("status {} does not exist", status.id),
        }
    }

    async fn delete_status(&mut self, id: StatusId) -> Result<()> {
        self.working.statuses.remove(&id);
        Ok(())
    }

    // ── Authorities & workgroups ──

    async fn load_authority(&mut self, id: AuthorityId) -> Result<Option<Authority>> {
        Ok(self.working.authorities.get(&id).cloned())
    }

    async fn list_authorities(&mut self) -> Result<Vec<Authority>> {
        Ok(self.working.authorities.values().cloned().collect())
    }

    async fn save_authority(&mut self, authority: &Authority) -> Result<()> {
        self.working
            .authorities
            .insert(authority.id, authority.clone());
        Ok(())
    }

    async fn load_workgroup(&mut self, id: WorkgroupId) -> Result<Option<Workgroup>> {
        Ok(self.working.workgroups.get(&id).cloned())
    }

    async fn load_workgroups(&mut self, ids: &[WorkgroupId]) -> Result<Vec<Workgroup>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.workgroups.get(id))
            .cloned()
            .collect())
    }

    async fn save_workgroup(&mut self, workgroup: &Workgroup) -> Result<()> {
        self.working
            .workgroups
            .insert(workgroup.id, workgroup.clone());
        Ok(())
    }

    // ── Publication records ──

    async fn load_publication(&mut self, item: ItemId) -> Result<Option<PublicationRecord>> {
        Ok(self.working.publications.get(&item).cloned())
    }

    async fn publications_for_items(&mut self, items: &[ItemId]) -> Result<Vec<PublicationRecord>> {
        Ok(items
            .iter()
            .filter_map(|id| self.working.publications.get(id))
            .cloned()
            .collect())
    }

    async fn save_publication(&mut self, record: &PublicationRecord) -> Result<()> {
        self.working.publications.insert(record.item, record.clone());
        Ok(())
    }

    async fn delete_publication(&mut self, item: ItemId) -> Result<bool> {
        Ok(self.working.publications.remove(&item).is_some())
    }

    // ── Review requests ──

    async fn load_review(&mut self, id: ReviewRequestId) -> Result<Option<ReviewRequest>> {
        Ok(self.working.reviews.get(&id).cloned())
    }

    async fn save_review(&mut self, review: &ReviewRequest) -> Result<()> {
        self.working.reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn reviews_for_item(&mut self, item: ItemId) -> Result<Vec<ReviewRequest>> {
        Ok(self
            .working
            .reviews
            .values()
            .filter(|r| r.items.contains(&item))
            .cloned()
            .collect())
    }

    async fn open_reviews_for_items(&mut self, items: &[ItemId]) -> Result<Vec<ReviewRequest>> {
        let wanted: HashSet<ItemId> = items.iter().copied().collect();
        Ok(self
            .working
            .reviews
            .values()
            .filter(|r| r.is_open() && r.items.iter().any(|id| wanted.contains(id)))
            .cloned()
            .collect())
    }

    // ── Audit & outbox ──

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        self.working.audit.push(entry.clone());
        Ok(())
    }

    async fn audit_for_item(&mut self, item: ItemId) -> Result<Vec<AuditEntry>> {
        Ok(self
            .working
            .audit
            .iter()
            .filter(|e| e.items.contains(&item))
            .cloned()
            .collect())
    }

    async fn enqueue_event(&mut self, event: &RegistryEvent, at: DateTime<Utc>) -> Result<i64> {
        self.working.next_seq += 1;
        let seq = self.working.next_seq;
        self.working.outbox.push(OutboxEvent {
            seq,
            event: event.clone(),
            created: at,
        });
        Ok(seq)
    }

    async fn drain_events(&mut self, max: usize) -> Result<Vec<OutboxEvent>> {
        let take = max.min(self.working.outbox.len());
        Ok(self.working.outbox.drain(..take).collect())
    }

    // ── Completion ──

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork {
            mut guard,
            working,
            fail_commit,
        } = *self;
        if fail_commit.swap(false, Ordering::SeqCst) {
            bail!("injected commit failure");
        }
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uncommitted_work_is_discarded() {
        let store = MemoryStore::new();
        let item = Item::new(ItemKind::ObjectClass, "Person", Utc::now());

        let mut uow = store.begin().await.unwrap();
        uow.insert_item(&item).await.unwrap();
        drop(uow);
        assert!(store.snapshot().await.items.is_empty());

        let mut uow = store.begin().await.unwrap();
        uow.insert_item(&item).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.snapshot().await.items.len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_discards_commit() {
        let store = MemoryStore::new();
        store.inject_commit_failure();
        let mut uow = store.begin().await.unwrap();
        uow.save_authority(&Authority::new("RA")).await.unwrap();
        assert!(uow.commit().await.is_err());
        assert!(store.snapshot().await.authorities.is_empty());

        // One-shot.
        let mut uow = store.begin().await.unwrap();
        uow.save_authority(&Authority::new("RA")).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.snapshot().await.authorities.len(), 1);
    }

    #[tokio::test]
    async fn update_item_keeps_cached_flags() {
        let store = MemoryStore::new();
        let mut item = Item::new(ItemKind::Property, "Age", Utc::now());
        let mut uow = store.begin().await.unwrap();
        uow.insert_item(&item).await.unwrap();
        uow.update_visibility(
            item.id,
            VisibilityFlags {
                is_public: true,
                is_locked: true,
            },
        )
        .await
        .unwrap();
        item.name = "Age in years".into();
        uow.update_item(&item).await.unwrap();
        let stored = uow.load_item(item.id).await.unwrap().unwrap();
        assert!(stored.is_public());
        assert_eq!(stored.name, "Age in years");
    }

    #[tokio::test]
    async fn public_items_follow_the_cached_flag() {
        let store = MemoryStore::new();
        let hidden = Item::new(ItemKind::Property, "Height", Utc::now());
        let mut shown = Item::new(ItemKind::Property, "Age", Utc::now());
        shown.visibility.is_public = true;
        let mut uow = store.begin().await.unwrap();
        uow.insert_item(&hidden).await.unwrap();
        uow.insert_item(&shown).await.unwrap();

        let public = uow.public_items().await.unwrap();
        assert_eq!(public, vec![shown.clone()]);

        uow.update_visibility(hidden.id, VisibilityFlags { is_public: true, is_locked: false })
            .await
            .unwrap();
        assert_eq!(uow.public_items().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bulk_loaders_only_return_requested_items() {
        let store = MemoryStore::new();
        let a = Item::new(ItemKind::Property, "Age", Utc::now());
        let b = Item::new(ItemKind::Property, "Height", Utc::now());
        let ra = AuthorityId::new();
        let mut uow = store.begin().await.unwrap();
        for item in [&a, &b] {
            uow.insert_item(item).await.unwrap();
            uow.insert_status(&Status {
                id: StatusId::new(),
                item: item.id,
                authority: ra,
                state: State::Candidate,
                registration_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                until_date: None,
                change_details: String::new(),
                created: Utc::now(),
            })
            .await
            .unwrap();
        }

        let statuses = uow.statuses_for_items(&[b.id]).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].item, b.id);
        assert!(uow.statuses_for_items(&[]).await.unwrap().is_empty());
        assert!(uow.publications_for_items(&[a.id, b.id]).await.unwrap().is_empty());
        assert!(uow.load_workgroups(&[WorkgroupId::new()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outbox_drains_in_order() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let a = ItemId::new();
        let b = ItemId::new();
        uow.enqueue_event(&RegistryEvent::ItemDeleted { item: a }, Utc::now())
            .await
            .unwrap();
        uow.enqueue_event(&RegistryEvent::ItemDeleted { item: b }, Utc::now())
            .await
            .unwrap();
        let first = uow.drain_events(1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].seq, 1);
        let rest = uow.drain_events(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].event, RegistryEvent::ItemDeleted { item: b });
    }

    #[tokio::test]
    async fn items_registered_by_is_distinct() {
        let store = MemoryStore::new();
        let ra = Authority::new("RA");
        let item = Item::new(ItemKind::Property, "Age", Utc::now());
        let mut uow = store.begin().await.unwrap();
        uow.insert_item(&item).await.unwrap();
        for state in [State::Candidate, State::Standard] {
            uow.insert_status(&Status {
                id: StatusId::new(),
                item: item.id,
                authority: ra.id,
                state,
                registration_date: Utc::now().date_naive(),
                until_date: None,
                change_details: String::new(),
                created: Utc::now(),
            })
            .await
            .unwrap();
        }
        assert_eq!(uow.items_registered_by(ra.id).await.unwrap(), vec![item.id]);
    }
}
