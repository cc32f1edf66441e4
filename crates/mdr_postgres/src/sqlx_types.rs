//! Row structs for `sqlx::query_as` and their conversion into core types.
//!
//! Core types carry no sqlx derives, so every table gets a flat row struct
//! here. Enum columns are stored as text (or the state ordinal) and parsed
//! back; an unknown value is a storage error, not a panic.

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use mdr_core::types::*;

pub(crate) fn state_from_db(value: i16) -> Result<State> {
    State::from_ordinal(value).ok_or_else(|| anyhow!("invalid registration state ordinal {value}"))
}

pub(crate) fn state_to_db(state: State) -> i16 {
    i16::from(state.ordinal())
}

pub(crate) fn uuids<T: Copy>(ids: impl IntoIterator<Item = T>, f: fn(T) -> Uuid) -> Vec<Uuid> {
    ids.into_iter().map(f).collect()
}

fn user_set(ids: Vec<Uuid>) -> BTreeSet<UserId> {
    ids.into_iter().map(UserId::from).collect()
}

// ── Items ─────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgItemRow {
    pub item_id: Uuid,
    pub kind: String,
    pub name: String,
    pub definition: String,
    pub workgroup_id: Option<Uuid>,
    pub submitter: Option<Uuid>,
    pub ready_to_review: bool,
    pub is_public: bool,
    pub is_locked: bool,
    pub links: Json<Vec<ItemLink>>,
    pub extension: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl TryFrom<PgItemRow> for Item {
    type Error = anyhow::Error;

    fn try_from(row: PgItemRow) -> Result<Self> {
        let kind = ItemKind::from_str(&row.kind)
            .ok_or_else(|| anyhow!("item {} has unknown kind {:?}", row.item_id, row.kind))?;
        Ok(Item {
            id: ItemId::from(row.item_id),
            kind,
            name: row.name,
            definition: row.definition,
            workgroup: row.workgroup_id.map(WorkgroupId::from),
            submitter: row.submitter.map(UserId::from),
            ready_to_review: row.ready_to_review,
            visibility: VisibilityFlags {
                is_public: row.is_public,
                is_locked: row.is_locked,
            },
            links: row.links.0,
            extension: row.extension,
            created: row.created_at,
            modified: row.modified_at,
        })
    }
}

// ── Statuses ──────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgStatusRow {
    pub status_id: Uuid,
    pub item_id: Uuid,
    pub authority_id: Uuid,
    pub state: i16,
    pub registration_date: NaiveDate,
    pub until_date: Option<NaiveDate>,
    pub change_details: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgStatusRow> for Status {
    type Error = anyhow::Error;

    fn try_from(row: PgStatusRow) -> Result<Self> {
        Ok(Status {
            id: StatusId::from(row.status_id),
            item: ItemId::from(row.item_id),
            authority: AuthorityId::from(row.authority_id),
            state: state_from_db(row.state)?,
            registration_date: row.registration_date,
            until_date: row.until_date,
            change_details: row.change_details,
            created: row.created_at,
        })
    }
}

// ── Authorities & workgroups ──────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgAuthorityRow {
    pub authority_id: Uuid,
    pub name: String,
    pub locked_state: i16,
    pub public_state: i16,
    pub registrars: Vec<Uuid>,
    pub managers: Vec<Uuid>,
}

impl TryFrom<PgAuthorityRow> for Authority {
    type Error = anyhow::Error;

    fn try_from(row: PgAuthorityRow) -> Result<Self> {
        Ok(Authority {
            id: AuthorityId::from(row.authority_id),
            name: row.name,
            locked_state: state_from_db(row.locked_state)?,
            public_state: state_from_db(row.public_state)?,
            registrars: user_set(row.registrars),
            managers: user_set(row.managers),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgWorkgroupRow {
    pub workgroup_id: Uuid,
    pub name: String,
    pub ownership: String,
    pub authorities: Vec<Uuid>,
    pub archived: bool,
    pub viewers: Vec<Uuid>,
    pub submitters: Vec<Uuid>,
    pub stewards: Vec<Uuid>,
    pub managers: Vec<Uuid>,
}

impl TryFrom<PgWorkgroupRow> for Workgroup {
    type Error = anyhow::Error;

    fn try_from(row: PgWorkgroupRow) -> Result<Self> {
        let ownership = OwnershipMode::from_str(&row.ownership).ok_or_else(|| {
            anyhow!(
                "workgroup {} has unknown ownership {:?}",
                row.workgroup_id,
                row.ownership
            )
        })?;
        Ok(Workgroup {
            id: WorkgroupId::from(row.workgroup_id),
            name: row.name,
            ownership,
            authorities: row.authorities.into_iter().map(AuthorityId::from).collect(),
            archived: row.archived,
            viewers: user_set(row.viewers),
            submitters: user_set(row.submitters),
            stewards: user_set(row.stewards),
            managers: user_set(row.managers),
        })
    }
}

// ── Publications ──────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgPublicationRow {
    pub item_id: Uuid,
    pub publisher: Uuid,
    pub visibility: String,
    pub publication_date: NaiveDate,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgPublicationRow> for PublicationRecord {
    type Error = anyhow::Error;

    fn try_from(row: PgPublicationRow) -> Result<Self> {
        let visibility = PublicationVisibility::from_str(&row.visibility)
            .ok_or_else(|| anyhow!("unknown publication visibility {:?}", row.visibility))?;
        Ok(PublicationRecord {
            item: ItemId::from(row.item_id),
            publisher: UserId::from(row.publisher),
            visibility,
            publication_date: row.publication_date,
            note: row.note,
            created: row.created_at,
        })
    }
}

// ── Review requests ───────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgReviewRow {
    pub review_id: Uuid,
    pub authority_id: Uuid,
    pub requester: Uuid,
    pub items: Vec<Uuid>,
    pub state: i16,
    pub registration_date: NaiveDate,
    pub cascade: bool,
    pub status: String,
    pub message: Option<String>,
    pub reviewer: Option<Uuid>,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgReviewRow> for ReviewRequest {
    type Error = anyhow::Error;

    fn try_from(row: PgReviewRow) -> Result<Self> {
        let status = ReviewStatus::from_str(&row.status).ok_or_else(|| {
            anyhow!("review {} has unknown status {:?}", row.review_id, row.status)
        })?;
        Ok(ReviewRequest {
            id: ReviewRequestId::from(row.review_id),
            authority: AuthorityId::from(row.authority_id),
            requester: UserId::from(row.requester),
            items: row.items.into_iter().map(ItemId::from).collect(),
            state: state_from_db(row.state)?,
            registration_date: row.registration_date,
            cascade: row.cascade,
            status,
            message: row.message,
            reviewer: row.reviewer.map(UserId::from),
            response: row.response,
            created: row.created_at,
        })
    }
}

// ── Audit ─────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgAuditRow {
    pub audit_id: Uuid,
    pub actor: Option<Uuid>,
    pub action: String,
    pub comment: String,
    pub items: Vec<Uuid>,
    pub at: DateTime<Utc>,
}

impl From<PgAuditRow> for AuditEntry {
    fn from(row: PgAuditRow) -> Self {
        AuditEntry {
            id: AuditId::from(row.audit_id),
            actor: row.actor.map(UserId::from),
            action: row.action,
            comment: row.comment,
            items: row.items.into_iter().map(ItemId::from).collect(),
            at: row.at,
        }
    }
}

// ── Outbox ────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OutboxRow {
    pub outbox_seq: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ordinals_round_trip_through_smallint() {
        assert_eq!(state_to_db(State::NotProgressed), 0);
        assert_eq!(state_to_db(State::Retired), 8);
        assert_eq!(state_from_db(5).unwrap(), State::Standard);
        assert!(state_from_db(9).is_err());
        assert!(state_from_db(-1).is_err());
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let row = PgItemRow {
            item_id: Uuid::new_v4(),
            kind: "widget".into(),
            name: "x".into(),
            definition: String::new(),
            workgroup_id: None,
            submitter: None,
            ready_to_review: false,
            is_public: false,
            is_locked: false,
            links: Json(vec![]),
            extension: serde_json::Value::Null,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        };
        let err = Item::try_from(row).unwrap_err();
        assert!(err.to_string().contains("widget"));
    }

    #[test]
    fn item_row_carries_cached_flags() {
        let target = ItemId::new();
        let row = PgItemRow {
            item_id: Uuid::new_v4(),
            kind: "data_element".into(),
            name: "Person age".into(),
            definition: String::new(),
            workgroup_id: None,
            submitter: None,
            ready_to_review: true,
            is_public: true,
            is_locked: true,
            links: Json(vec![ItemLink {
                role: LinkRole::ValueDomain,
                target,
            }]),
            extension: serde_json::json!({"unit": "years"}),
            created_at: Utc::now(),
            modified_at: Utc::now(),
        };
        let item = Item::try_from(row).unwrap();
        assert_eq!(item.kind, ItemKind::DataElement);
        assert!(item.is_public() && item.is_locked());
        assert_eq!(item.link(LinkRole::ValueDomain), Some(target));
    }
}
