use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::events::{OutboxEvent, RegistryEvent};
use crate::types::*;

/// Entry point for persistence: hands out units of work.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// One ACID transaction over all registry state.
///
/// Everything the service writes for one command goes through a single unit
/// of work, so a status row, the recached flags, the audit entry and the
/// outbox events land together or not at all. Dropping a unit of work
/// without committing discards it.
#[async_trait]
pub trait UnitOfWork: Send {
    // ── Items ──

    async fn load_item(&mut self, id: ItemId) -> Result<Option<Item>>;
    /// Load and hold a row lock until commit/rollback.
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>>;
    async fn insert_item(&mut self, item: &Item) -> Result<()>;
    /// Content fields and `modified`; never the cached flags.
    async fn update_item(&mut self, item: &Item) -> Result<()>;
    /// Cached flags only; leaves `modified` alone.
    async fn update_visibility(&mut self, id: ItemId, flags: VisibilityFlags) -> Result<()>;
    async fn delete_item(&mut self, id: ItemId) -> Result<()>;
    async fn list_items(&mut self) -> Result<Vec<Item>>;
    /// Items whose cached public flag is set, in `list_items` order.
    async fn public_items(&mut self) -> Result<Vec<Item>>;
    async fn items_in_workgroup(&mut self, workgroup: WorkgroupId) -> Result<Vec<ItemId>>;
    /// Items with any status, current or historic, from `authority`.
    async fn items_registered_by(&mut self, authority: AuthorityId) -> Result<Vec<ItemId>>;

    // ── Statuses ──

    async fn statuses_for_item(&mut self, item: ItemId) -> Result<Vec<Status>>;
    async fn statuses_for_items(&mut self, items: &[ItemId]) -> Result<Vec<Status>>;
    async fn load_status(&mut self, id: StatusId) -> Result<Option<Status>>;
    async fn insert_status(&mut self, status: &Status) -> Result<()>;
    async fn update_status(&mut self, status: &Status) -> Result<()>;
    async fn delete_status(&mut self, id: StatusId) -> Result<()>;

    // ── Authorities & workgroups ──

    async fn load_authority(&mut self, id: AuthorityId) -> Result<Option<Authority>>;
    async fn list_authorities(&mut self) -> Result<Vec<Authority>>;
    async fn save_authority(&mut self, authority: &Authority) -> Result<()>;
    async fn load_workgroup(&mut self, id: WorkgroupId) -> Result<Option<Workgroup>>;
    /// Unknown ids are skipped.
    async fn load_workgroups(&mut self, ids: &[WorkgroupId]) -> Result<Vec<Workgroup>>;
    async fn save_workgroup(&mut self, workgroup: &Workgroup) -> Result<()>;

    // ── Publication records ──

    async fn load_publication(&mut self, item: ItemId) -> Result<Option<PublicationRecord>>;
    async fn publications_for_items(&mut self, items: &[ItemId]) -> Result<Vec<PublicationRecord>>;
    async fn save_publication(&mut self, record: &PublicationRecord) -> Result<()>;
    /// Returns false when the item had no record.
    async fn delete_publication(&mut self, item: ItemId) -> Result<bool>;

    // ── Review requests ──

    async fn load_review(&mut self, id: ReviewRequestId) -> Result<Option<ReviewRequest>>;
    async fn save_review(&mut self, review: &ReviewRequest) -> Result<()>;
    async fn reviews_for_item(&mut self, item: ItemId) -> Result<Vec<ReviewRequest>>;
    /// Open requests naming any of `items`.
    async fn open_reviews_for_items(&mut self, items: &[ItemId]) -> Result<Vec<ReviewRequest>>;

    // ── Audit & outbox ──

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()>;
    async fn audit_for_item(&mut self, item: ItemId) -> Result<Vec<AuditEntry>>;
    async fn enqueue_event(&mut self, event: &RegistryEvent, at: DateTime<Utc>) -> Result<i64>;
    /// Remove and return up to `max` events, oldest first.
    async fn drain_events(&mut self, max: usize) -> Result<Vec<OutboxEvent>>;

    // ── Completion ──

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}
