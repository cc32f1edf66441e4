//! Postgres implementation of the registry store ports.
//!
//! A unit of work is one `sqlx::Transaction`. All SQL is runtime-checked
//! (sqlx::query, not sqlx::query!) to avoid compile-time DB requirement.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use mdr_core::events::{OutboxEvent, RegistryEvent};
use mdr_core::store::{RegistryStore, UnitOfWork};
use mdr_core::types::*;

use crate::sqlx_types::*;

const ITEM_COLUMNS: &str = r#"
    item_id, kind, name, definition, workgroup_id, submitter,
    ready_to_review, is_public, is_locked, links, extension,
    created_at, modified_at
"#;

const STATUS_COLUMNS: &str = r#"
    status_id, item_id, authority_id, state, registration_date,
    until_date, change_details, created_at
"#;

const REVIEW_COLUMNS: &str = r#"
    review_id, authority_id, requester, items, state, registration_date,
    cascade, status, message, reviewer, response, created_at
"#;

// ── PgRegistryStore ───────────────────────────────────────────

/// Postgres-backed registry store.
#[derive(Debug, Clone)]
pub struct PgRegistryStore {
    pool: PgPool,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

// ── PgUnitOfWork ──────────────────────────────────────────────

/// One transaction. Dropping it without commit rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    async fn fetch_item(&mut self, id: ItemId, for_update: bool) -> Result<Option<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM mdr.items WHERE item_id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, PgItemRow>(&query)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(Item::try_from).transpose()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    // ── Items ──

    async fn load_item(&mut self, id: ItemId) -> Result<Option<Item>> {
        self.fetch_item(id, false).await
    }

    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>> {
        self.fetch_item(id, true).await
    }

    async fn insert_item(&mut self, item: &Item) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mdr.items (
                item_id, kind, name, definition, workgroup_id, submitter,
                ready_to_review, is_public, is_locked, links, extension,
                created_at, modified_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.kind.as_str())
        .bind(&item.name)
        .bind(&item.definition)
        .bind(item.workgroup.map(|w| w.as_uuid()))
        .bind(item.submitter.map(|u| u.as_uuid()))
        .bind(item.ready_to_review)
        .bind(item.visibility.is_public)
        .bind(item.visibility.is_locked)
        .bind(Json(&item.links))
        .bind(&item.extension)
        .bind(item.created)
        .bind(item.modified)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE mdr.items
            SET kind = $2,
                name = $3,
                definition = $4,
                workgroup_id = $5,
                submitter = $6,
                ready_to_review = $7,
                links = $8,
                extension = $9,
                modified_at = $10
            WHERE item_id = $1
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.kind.as_str())
        .bind(&item.name)
        .bind(&item.definition)
        .bind(item.workgroup.map(|w| w.as_uuid()))
        .bind(item.submitter.map(|u| u.as_uuid()))
        .bind(item.ready_to_review)
        .bind(Json(&item.links))
        .bind(&item.extension)
        .bind(item.modified)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            bail!("item {} does not exist", item.id);
        }
        Ok(())
    }

    async fn update_visibility(&mut self, id: ItemId, flags: VisibilityFlags) -> Result<()> {
        let result = sqlx::query(
            "UPDATE mdr.items SET is_public = $2, is_locked = $3 WHERE item_id = $1",
        )
        .bind(id.as_uuid())
        .bind(flags.is_public)
        .bind(flags.is_locked)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            bail!("item {id} does not exist");
        }
        Ok(())
    }

    async fn delete_item(&mut self, id: ItemId) -> Result<()> {
        // Statuses and the publication record go with the item (ON DELETE CASCADE).
        sqlx::query("DELETE FROM mdr.items WHERE item_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn list_items(&mut self) -> Result<Vec<Item>> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM mdr.items ORDER BY item_id");
        let rows = sqlx::query_as::<_, PgItemRow>(&query)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(Item::try_from).collect()
    }

    async fn public_items(&mut self) -> Result<Vec<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM mdr.items WHERE is_public ORDER BY item_id"
        );
        let rows = sqlx::query_as::<_, PgItemRow>(&query)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(Item::try_from).collect()
    }

    async fn items_in_workgroup(&mut self, workgroup: WorkgroupId) -> Result<Vec<ItemId>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT item_id FROM mdr.items WHERE workgroup_id = $1 ORDER BY item_id",
        )
        .bind(workgroup.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(ids.into_iter().map(ItemId::from).collect())
    }

    async fn items_registered_by(&mut self, authority: AuthorityId) -> Result<Vec<ItemId>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT item_id
            FROM mdr.statuses
            WHERE authority_id = $1
            ORDER BY item_id
            "#,
        )
        .bind(authority.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(ids.into_iter().map(ItemId::from).collect())
    }

    // ── Statuses ──

    async fn statuses_for_item(&mut self, item: ItemId) -> Result<Vec<Status>> {
        let query = format!(
            r#"
            SELECT {STATUS_COLUMNS}
            FROM mdr.statuses
            WHERE item_id = $1
            ORDER BY authority_id, registration_date DESC, created_at DESC
            "#
        );
        let rows = sqlx::query_as::<_, PgStatusRow>(&query)
            .bind(item.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(Status::try_from).collect()
    }

    async fn statuses_for_items(&mut self, items: &[ItemId]) -> Result<Vec<Status>> {
        let query = format!(
            r#"
            SELECT {STATUS_COLUMNS}
            FROM mdr.statuses
            WHERE item_id = ANY($1)
            ORDER BY item_id, authority_id, registration_date DESC, created_at DESC
            "#
        );
        let rows = sqlx::query_as::<_, PgStatusRow>(&query)
            .bind(uuids(items, ItemId::as_uuid))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(Status::try_from).collect()
    }

    async fn load_status(&mut self, id: StatusId) -> Result<Option<Status>> {
        let query = format!("SELECT {STATUS_COLUMNS} FROM mdr.statuses WHERE status_id = $1");
        let row = sqlx::query_as::<_, PgStatusRow>(&query)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(Status::try_from).transpose()
    }

    async fn insert_status(&mut self, status: &Status) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mdr.statuses (
                status_id, item_id, authority_id, state, registration_date,
                until_date, change_details, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(status.id.as_uuid())
        .bind(status.item.as_uuid())
        .bind(status.authority.as_uuid())
        .bind(state_to_db(status.state))
        .bind(status.registration_date)
        .bind(status.until_date)
        .bind(&status.change_details)
        .bind(status.created)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn update_status(&mut self, status: &Status) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE mdr.statuses
            SET state = $2,
                registration_date = $3,
                until_date = $4,
                change_details = $5
            WHERE status_id = $1
            "#,
        )
        .bind(status.id.as_uuid())
        .bind(state_to_db(status.state))
        .bind(status.registration_date)
        .bind(status.until_date)
        .bind(&status.change_details)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            bail!("status {} does not exist", status.id);
        }
        Ok(())
    }

    async fn delete_status(&mut self, id: StatusId) -> Result<()> {
        sqlx::query("DELETE FROM mdr.statuses WHERE status_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    // ── Authorities & workgroups ──

    async fn load_authority(&mut self, id: AuthorityId) -> Result<Option<Authority>> {
        let row = sqlx::query_as::<_, PgAuthorityRow>(
            r#"
            SELECT authority_id, name, locked_state, public_state, registrars, managers
            FROM mdr.authorities
            WHERE authority_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(Authority::try_from).transpose()
    }

    async fn list_authorities(&mut self) -> Result<Vec<Authority>> {
        let rows = sqlx::query_as::<_, PgAuthorityRow>(
            r#"
            SELECT authority_id, name, locked_state, public_state, registrars, managers
            FROM mdr.authorities
            ORDER BY authority_id
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(Authority::try_from).collect()
    }

    async fn save_authority(&mut self, authority: &Authority) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mdr.authorities (
                authority_id, name, locked_state, public_state, registrars, managers
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (authority_id) DO UPDATE
            SET name = EXCLUDED.name,
                locked_state = EXCLUDED.locked_state,
                public_state = EXCLUDED.public_state,
                registrars = EXCLUDED.registrars,
                managers = EXCLUDED.managers
            "#,
        )
        .bind(authority.id.as_uuid())
        .bind(&authority.name)
        .bind(state_to_db(authority.locked_state))
        .bind(state_to_db(authority.public_state))
        .bind(uuids(&authority.registrars, UserId::as_uuid))
        .bind(uuids(&authority.managers, UserId::as_uuid))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn load_workgroup(&mut self, id: WorkgroupId) -> Result<Option<Workgroup>> {
        let row = sqlx::query_as::<_, PgWorkgroupRow>(
            r#"
            SELECT workgroup_id, name, ownership, authorities, archived,
                   viewers, submitters, stewards, managers
            FROM mdr.workgroups
            WHERE workgroup_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(Workgroup::try_from).transpose()
    }

    async fn load_workgroups(&mut self, ids: &[WorkgroupId]) -> Result<Vec<Workgroup>> {
        let rows = sqlx::query_as::<_, PgWorkgroupRow>(
            r#"
            SELECT workgroup_id, name, ownership, authorities, archived,
                   viewers, submitters, stewards, managers
            FROM mdr.workgroups
            WHERE workgroup_id = ANY($1)
            ORDER BY workgroup_id
            "#,
        )
        .bind(uuids(ids, WorkgroupId::as_uuid))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(Workgroup::try_from).collect()
    }

    async fn save_workgroup(&mut self, workgroup: &Workgroup) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mdr.workgroups (
                workgroup_id, name, ownership, authorities, archived,
                viewers, submitters, stewards, managers
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (workgroup_id) DO UPDATE
            SET name = EXCLUDED.name,
                ownership = EXCLUDED.ownership,
                authorities = EXCLUDED.authorities,
                archived = EXCLUDED.archived,
                viewers = EXCLUDED.viewers,
                submitters = EXCLUDED.submitters,
                stewards = EXCLUDED.stewards,
                managers = EXCLUDED.managers
            "#,
        )
        .bind(workgroup.id.as_uuid())
        .bind(&workgroup.name)
        .bind(workgroup.ownership.as_str())
        .bind(uuids(&workgroup.authorities, AuthorityId::as_uuid))
        .bind(workgroup.archived)
        .bind(uuids(&workgroup.viewers, UserId::as_uuid))
        .bind(uuids(&workgroup.submitters, UserId::as_uuid))
        .bind(uuids(&workgroup.stewards, UserId::as_uuid))
        .bind(uuids(&workgroup.managers, UserId::as_uuid))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    // ── Publication records ──

    async fn load_publication(&mut self, item: ItemId) -> Result<Option<PublicationRecord>> {
        let row = sqlx::query_as::<_, PgPublicationRow>(
            r#"
            SELECT item_id, publisher, visibility, publication_date, note, created_at
            FROM mdr.publications
            WHERE item_id = $1
            "#,
        )
        .bind(item.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(PublicationRecord::try_from).transpose()
    }

    async fn publications_for_items(&mut self, items: &[ItemId]) -> Result<Vec<PublicationRecord>> {
        let rows = sqlx::query_as::<_, PgPublicationRow>(
            r#"
            SELECT item_id, publisher, visibility, publication_date, note, created_at
            FROM mdr.publications
            WHERE item_id = ANY($1)
            "#,
        )
        .bind(uuids(items, ItemId::as_uuid))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(PublicationRecord::try_from).collect()
    }

    async fn save_publication(&mut self, record: &PublicationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mdr.publications (
                item_id, publisher, visibility, publication_date, note, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (item_id) DO UPDATE
            SET publisher = EXCLUDED.publisher,
                visibility = EXCLUDED.visibility,
                publication_date = EXCLUDED.publication_date,
                note = EXCLUDED.note,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(record.item.as_uuid())
        .bind(record.publisher.as_uuid())
        .bind(record.visibility.as_str())
        .bind(record.publication_date)
        .bind(&record.note)
        .bind(record.created)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn delete_publication(&mut self, item: ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mdr.publications WHERE item_id = $1")
            .bind(item.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }

    // ── Review requests ──

    async fn load_review(&mut self, id: ReviewRequestId) -> Result<Option<ReviewRequest>> {
        let query = format!("SELECT {REVIEW_COLUMNS} FROM mdr.review_requests WHERE review_id = $1");
        let row = sqlx::query_as::<_, PgReviewRow>(&query)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(ReviewRequest::try_from).transpose()
    }

    async fn save_review(&mut self, review: &ReviewRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mdr.review_requests (
                review_id, authority_id, requester, items, state, registration_date,
                cascade, status, message, reviewer, response, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (review_id) DO UPDATE
            SET status = EXCLUDED.status,
                reviewer = EXCLUDED.reviewer,
                response = EXCLUDED.response
            "#,
        )
        .bind(review.id.as_uuid())
        .bind(review.authority.as_uuid())
        .bind(review.requester.as_uuid())
        .bind(uuids(&review.items, ItemId::as_uuid))
        .bind(state_to_db(review.state))
        .bind(review.registration_date)
        .bind(review.cascade)
        .bind(review.status.as_str())
        .bind(&review.message)
        .bind(review.reviewer.map(|u| u.as_uuid()))
        .bind(&review.response)
        .bind(review.created)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn reviews_for_item(&mut self, item: ItemId) -> Result<Vec<ReviewRequest>> {
        let query = format!(
            r#"
            SELECT {REVIEW_COLUMNS}
            FROM mdr.review_requests
            WHERE $1 = ANY(items)
            ORDER BY created_at, review_id
            "#
        );
        let rows = sqlx::query_as::<_, PgReviewRow>(&query)
            .bind(item.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(ReviewRequest::try_from).collect()
    }

    async fn open_reviews_for_items(&mut self, items: &[ItemId]) -> Result<Vec<ReviewRequest>> {
        let query = format!(
            r#"
            SELECT {REVIEW_COLUMNS}
            FROM mdr.review_requests
            WHERE items && $1 AND status = $2
            ORDER BY created_at, review_id
            "#
        );
        let rows = sqlx::query_as::<_, PgReviewRow>(&query)
            .bind(uuids(items, ItemId::as_uuid))
            .bind(ReviewStatus::Submitted.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(ReviewRequest::try_from).collect()
    }

    // ── Audit & outbox ──

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mdr.audit_log (audit_id, actor, action, comment, items, at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.actor.map(|u| u.as_uuid()))
        .bind(&entry.action)
        .bind(&entry.comment)
        .bind(uuids(&entry.items, ItemId::as_uuid))
        .bind(entry.at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn audit_for_item(&mut self, item: ItemId) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, PgAuditRow>(
            r#"
            SELECT audit_id, actor, action, comment, items, at
            FROM mdr.audit_log
            WHERE $1 = ANY(items)
            ORDER BY at, audit_id
            "#,
        )
        .bind(item.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    async fn enqueue_event(&mut self, event: &RegistryEvent, at: DateTime<Utc>) -> Result<i64> {
        let payload = serde_json::to_value(event)?;
        let seq = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO mdr.outbox_events (event_type, payload, created_at)
            VALUES ($1, $2, $3)
            RETURNING outbox_seq
            "#,
        )
        .bind(event.kind())
        .bind(&payload)
        .bind(at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(seq)
    }

    async fn drain_events(&mut self, max: usize) -> Result<Vec<OutboxEvent>> {
        // Concurrent drainers skip each other's rows instead of blocking.
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            WITH claimable AS (
                SELECT outbox_seq
                FROM mdr.outbox_events
                ORDER BY outbox_seq
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM mdr.outbox_events e
            USING claimable c
            WHERE e.outbox_seq = c.outbox_seq
            RETURNING e.outbox_seq, e.event_type, e.payload, e.created_at
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| anyhow!(e))?;

        let (events, dead) = decode_outbox_rows(rows);
        for (row, error) in dead {
            tracing::warn!(
                seq = row.outbox_seq,
                event_type = %row.event_type,
                %error,
                "unreadable outbox payload moved to dead letters"
            );
            sqlx::query(
                r#"
                INSERT INTO mdr.outbox_dead_letters (outbox_seq, event_type, payload, created_at, error)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (outbox_seq) DO NOTHING
                "#,
            )
            .bind(row.outbox_seq)
            .bind(&row.event_type)
            .bind(&row.payload)
            .bind(row.created_at)
            .bind(&error)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }
        Ok(events)
    }

    // ── Completion ──

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(|e| anyhow!(e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(|e| anyhow!(e))
    }
}

/// Split drained rows into events, oldest first, and rows whose payload no
/// longer deserializes.
fn decode_outbox_rows(rows: Vec<OutboxRow>) -> (Vec<OutboxEvent>, Vec<(OutboxRow, String)>) {
    let mut events = Vec::with_capacity(rows.len());
    let mut dead = Vec::new();
    for row in rows {
        match serde_json::from_value::<RegistryEvent>(row.payload.clone()) {
            Ok(event) => events.push(OutboxEvent {
                seq: row.outbox_seq,
                event,
                created: row.created_at,
            }),
            Err(e) => dead.push((row, e.to_string())),
        }
    }
    // RETURNING order is unspecified.
    events.sort_by_key(|e| e.seq);
    (events, dead)
}
