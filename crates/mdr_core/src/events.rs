use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Outbound registry events, consumed asynchronously by search indexing and
/// notification delivery. Enqueued in the same unit of work as the change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    ItemCreated {
        item: ItemId,
        kind: ItemKind,
    },
    ItemEdited {
        item: ItemId,
        fields: Vec<String>,
    },
    ItemDeleted {
        item: ItemId,
    },
    StatusChanged {
        item: ItemId,
        authority: AuthorityId,
        status: StatusId,
        state: State,
        registration_date: NaiveDate,
    },
    StatusRemoved {
        item: ItemId,
        authority: AuthorityId,
        status: StatusId,
    },
    VisibilityUpdated {
        item: ItemId,
        before: VisibilityFlags,
        after: VisibilityFlags,
    },
    ThresholdsChanged {
        authority: AuthorityId,
        locked_state: State,
        public_state: State,
    },
    WorkgroupOwnershipChanged {
        workgroup: WorkgroupId,
    },
    ReviewRequestChanged {
        review: ReviewRequestId,
        status: ReviewStatus,
    },
}

impl RegistryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ItemCreated { .. } => "item_created",
            Self::ItemEdited { .. } => "item_edited",
            Self::ItemDeleted { .. } => "item_deleted",
            Self::StatusChanged { .. } => "status_changed",
            Self::StatusRemoved { .. } => "status_removed",
            Self::VisibilityUpdated { .. } => "visibility_updated",
            Self::ThresholdsChanged { .. } => "thresholds_changed",
            Self::WorkgroupOwnershipChanged { .. } => "workgroup_ownership_changed",
            Self::ReviewRequestChanged { .. } => "review_request_changed",
        }
    }
}

/// An event as stored in the outbox. `seq` is monotonic per store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub seq: i64,
    pub event: RegistryEvent,
    pub created: DateTime<Utc>,
}
