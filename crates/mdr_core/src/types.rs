//! Core domain types for the metadata registry.
//! Pure value types; no sqlx or storage dependencies.

// Several enums intentionally use `from_str() -> Option<Self>` instead of
// `FromStr` because they return None for unknown values rather than an error.
#![allow(clippy::should_implement_trait)]

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};
use uuid::Uuid;

use crate::error::RegistryError;

// ── ID newtypes ───────────────────────────────────────────────

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(
    /// Identifier of a registrable item (concept).
    ItemId
);
id_newtype!(
    /// Identifier of a registration authority.
    AuthorityId
);
id_newtype!(
    /// Identifier of a workgroup.
    WorkgroupId
);
id_newtype!(
    /// Identifier of a single registration status row.
    StatusId
);
id_newtype!(
    /// Identifier of a user supplied by the identity collaborator.
    UserId
);
id_newtype!(ReviewRequestId);
id_newtype!(AuditId);

// ── Registration state ────────────────────────────────────────

/// ISO/IEC 11179 registration state. Ordinal: comparisons are by maturity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum State {
    NotProgressed = 0,
    Incomplete = 1,
    Candidate = 2,
    Recorded = 3,
    Qualified = 4,
    Standard = 5,
    Preferred = 6,
    Superseded = 7,
    Retired = 8,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotProgressed => "notprogressed",
            Self::Incomplete => "incomplete",
            Self::Candidate => "candidate",
            Self::Recorded => "recorded",
            Self::Qualified => "qualified",
            Self::Standard => "standard",
            Self::Preferred => "preferred",
            Self::Superseded => "superseded",
            Self::Retired => "retired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::iter().find(|state| state.as_str() == s)
    }

    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn from_ordinal(value: i16) -> Option<Self> {
        Self::iter().find(|state| i16::from(state.ordinal()) == value)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Item kinds ────────────────────────────────────────────────

/// Kind tag for the single item record. Kind-specific data lives in `links`
/// and `extension`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    ObjectClass,
    Property,
    ConceptualDomain,
    ValueDomain,
    DataType,
    UnitOfMeasure,
    DataElementConcept,
    DataElement,
    DataElementDerivation,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectClass => "object_class",
            Self::Property => "property",
            Self::ConceptualDomain => "conceptual_domain",
            Self::ValueDomain => "value_domain",
            Self::DataType => "data_type",
            Self::UnitOfMeasure => "unit_of_measure",
            Self::DataElementConcept => "data_element_concept",
            Self::DataElement => "data_element",
            Self::DataElementDerivation => "data_element_derivation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::iter().find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role a linked item plays for its owner (e.g. the object class of a
/// data element concept).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    ObjectClass,
    Property,
    ConceptualDomain,
    DataElementConcept,
    ValueDomain,
    DataType,
    UnitOfMeasure,
    Derives,
    Input,
}

impl LinkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectClass => "object_class",
            Self::Property => "property",
            Self::ConceptualDomain => "conceptual_domain",
            Self::DataElementConcept => "data_element_concept",
            Self::ValueDomain => "value_domain",
            Self::DataType => "data_type",
            Self::UnitOfMeasure => "unit_of_measure",
            Self::Derives => "derives",
            Self::Input => "input",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::iter().find(|role| role.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemLink {
    pub role: LinkRole,
    pub target: ItemId,
}

// ── Visibility ────────────────────────────────────────────────

/// The two derived flags. Independent predicates, not tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisibilityFlags {
    pub is_public: bool,
    pub is_locked: bool,
}

// ── Item ──────────────────────────────────────────────────────

/// A registrable item (ISO 11179 concept).
///
/// `visibility` is the persisted cache; it is only ever written by the
/// visibility cache, never by content edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
    pub name: String,
    pub definition: String,
    pub workgroup: Option<WorkgroupId>,
    pub submitter: Option<UserId>,
    pub ready_to_review: bool,
    pub visibility: VisibilityFlags,
    #[serde(default)]
    pub links: Vec<ItemLink>,
    #[serde(default)]
    pub extension: serde_json::Value,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Item {
    pub fn new(kind: ItemKind, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ItemId::new(),
            kind,
            name: name.into(),
            definition: String::new(),
            workgroup: None,
            submitter: None,
            ready_to_review: false,
            visibility: VisibilityFlags::default(),
            links: Vec::new(),
            extension: serde_json::Value::Null,
            created: now,
            modified: now,
        }
    }

    pub fn in_workgroup(mut self, workgroup: WorkgroupId) -> Self {
        self.workgroup = Some(workgroup);
        self
    }

    pub fn submitted_by(mut self, user: UserId) -> Self {
        self.submitter = Some(user);
        self
    }

    pub fn with_link(mut self, role: LinkRole, target: ItemId) -> Self {
        self.links.push(ItemLink { role, target });
        self
    }

    /// First linked item for a role.
    pub fn link(&self, role: LinkRole) -> Option<ItemId> {
        self.links
            .iter()
            .find(|link| link.role == role)
            .map(|link| link.target)
    }

    pub fn is_public(&self) -> bool {
        self.visibility.is_public
    }

    pub fn is_locked(&self) -> bool {
        self.visibility.is_locked
    }

    /// True when the item changed inside `window` before `now`.
    pub fn was_modified_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.modified >= now - window
    }
}

// ── Registration authority ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authority {
    pub id: AuthorityId,
    pub name: String,
    pub locked_state: State,
    pub public_state: State,
    #[serde(default)]
    pub registrars: BTreeSet<UserId>,
    #[serde(default)]
    pub managers: BTreeSet<UserId>,
}

impl Authority {
    /// New authority with the default thresholds (locked at candidate,
    /// public at recorded).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AuthorityId::new(),
            name: name.into(),
            locked_state: State::Candidate,
            public_state: State::Recorded,
            registrars: BTreeSet::new(),
            managers: BTreeSet::new(),
        }
    }

    pub fn with_thresholds(
        mut self,
        locked_state: State,
        public_state: State,
    ) -> Result<Self, RegistryError> {
        Self::validate_thresholds(locked_state, public_state)?;
        self.locked_state = locked_state;
        self.public_state = public_state;
        Ok(self)
    }

    /// A public threshold below the locked threshold would make an item
    /// public but editable; such configurations are rejected.
    pub fn validate_thresholds(locked_state: State, public_state: State) -> Result<(), RegistryError> {
        if public_state < locked_state {
            return Err(RegistryError::InvalidThresholds {
                locked: locked_state,
                public: public_state,
            });
        }
        Ok(())
    }

    pub fn is_registrar(&self, user: UserId) -> bool {
        self.registrars.contains(&user)
    }

    pub fn is_manager(&self, user: UserId) -> bool {
        self.managers.contains(&user)
    }
}

// ── Workgroup ─────────────────────────────────────────────────

/// Which authorities count when evaluating an item in a workgroup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipMode {
    /// Any authority counts.
    #[default]
    Registry,
    /// Only the workgroup's associated authorities count.
    Authority,
}

impl OwnershipMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Authority => "authority",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "registry" => Some(Self::Registry),
            "authority" => Some(Self::Authority),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkgroupRole {
    Viewer,
    Submitter,
    Steward,
    Manager,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workgroup {
    pub id: WorkgroupId,
    pub name: String,
    pub ownership: OwnershipMode,
    #[serde(default)]
    pub authorities: BTreeSet<AuthorityId>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub viewers: BTreeSet<UserId>,
    #[serde(default)]
    pub submitters: BTreeSet<UserId>,
    #[serde(default)]
    pub stewards: BTreeSet<UserId>,
    #[serde(default)]
    pub managers: BTreeSet<UserId>,
}

impl Workgroup {
    pub fn new(name: impl Into<String>, ownership: OwnershipMode) -> Self {
        Self {
            id: WorkgroupId::new(),
            name: name.into(),
            ownership,
            authorities: BTreeSet::new(),
            archived: false,
            viewers: BTreeSet::new(),
            submitters: BTreeSet::new(),
            stewards: BTreeSet::new(),
            managers: BTreeSet::new(),
        }
    }

    pub fn grant(&mut self, role: WorkgroupRole, user: UserId) {
        self.role_set_mut(role).insert(user);
    }

    pub fn has_role(&self, role: WorkgroupRole, user: UserId) -> bool {
        match role {
            WorkgroupRole::Viewer => self.viewers.contains(&user),
            WorkgroupRole::Submitter => self.submitters.contains(&user),
            WorkgroupRole::Steward => self.stewards.contains(&user),
            WorkgroupRole::Manager => self.managers.contains(&user),
        }
    }

    /// Members are the union of all four role sets.
    pub fn is_member(&self, user: UserId) -> bool {
        self.viewers.contains(&user)
            || self.submitters.contains(&user)
            || self.stewards.contains(&user)
            || self.managers.contains(&user)
    }

    fn role_set_mut(&mut self, role: WorkgroupRole) -> &mut BTreeSet<UserId> {
        match role {
            WorkgroupRole::Viewer => &mut self.viewers,
            WorkgroupRole::Submitter => &mut self.submitters,
            WorkgroupRole::Steward => &mut self.stewards,
            WorkgroupRole::Manager => &mut self.managers,
        }
    }
}

// ── Status ────────────────────────────────────────────────────

/// One registration record. Rows are appended, never rewritten by
/// registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub item: ItemId,
    pub authority: AuthorityId,
    pub state: State,
    pub registration_date: NaiveDate,
    pub until_date: Option<NaiveDate>,
    #[serde(default)]
    pub change_details: String,
    pub created: DateTime<Utc>,
}

impl Status {
    /// Validity window is closed on both ends; `until_date = None` is open.
    pub fn is_valid_on(&self, when: NaiveDate) -> bool {
        self.registration_date <= when && self.until_date.is_none_or(|until| until >= when)
    }
}

// ── Publication override ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationVisibility {
    #[default]
    Public,
    /// Logged-in (active) users only.
    Active,
    Hidden,
}

impl PublicationVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Active => "active",
            Self::Hidden => "hidden",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "active" => Some(Self::Active),
            "hidden" => Some(Self::Hidden),
            _ => None,
        }
    }
}

/// Standalone publication of an item that bypasses authority registration.
/// At most one per item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub item: ItemId,
    pub publisher: UserId,
    pub visibility: PublicationVisibility,
    pub publication_date: NaiveDate,
    pub note: Option<String>,
    pub created: DateTime<Utc>,
}

impl PublicationRecord {
    pub fn is_public_on(&self, when: NaiveDate) -> bool {
        self.visibility == PublicationVisibility::Public && self.publication_date <= when
    }

    /// Visible to any logged-in user (public records included).
    pub fn is_visible_to_active_on(&self, when: NaiveDate) -> bool {
        matches!(
            self.visibility,
            PublicationVisibility::Public | PublicationVisibility::Active
        ) && self.publication_date <= when
    }
}

// ── Review requests ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Submitted,
    Cancelled,
    Accepted,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Cancelled => "cancelled",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "cancelled" => Some(Self::Cancelled),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A request that an authority register a set of items at a given state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: ReviewRequestId,
    pub authority: AuthorityId,
    pub requester: UserId,
    pub items: Vec<ItemId>,
    pub state: State,
    pub registration_date: NaiveDate,
    pub cascade: bool,
    pub status: ReviewStatus,
    pub message: Option<String>,
    pub reviewer: Option<UserId>,
    pub response: Option<String>,
    pub created: DateTime<Utc>,
}

impl ReviewRequest {
    pub fn is_open(&self) -> bool {
        self.status == ReviewStatus::Submitted
    }
}

// ── Audit ─────────────────────────────────────────────────────

/// One audit log entry. A cascade writes exactly one entry for all items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub actor: Option<UserId>,
    pub action: String,
    pub comment: String,
    pub items: Vec<ItemId>,
    pub at: DateTime<Utc>,
}

// ── Command inputs / outputs ──────────────────────────────────

/// Optional parameters of a registration. `registration_date = None`
/// means "today".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub registration_date: Option<NaiveDate>,
    pub until_date: Option<NaiveDate>,
    #[serde(default)]
    pub change_details: String,
}

impl RegistrationRequest {
    pub fn effective_from(mut self, date: NaiveDate) -> Self {
        self.registration_date = Some(date);
        self
    }

    pub fn until(mut self, date: NaiveDate) -> Self {
        self.until_date = Some(date);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.change_details = details.into();
        self
    }
}

/// Result of a cascaded registration. Every member of the cascade set
/// appears in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    pub success: Vec<ItemId>,
    pub failed: Vec<ItemId>,
}

impl CascadeOutcome {
    pub fn total(&self) -> usize {
        self.success.len() + self.failed.len()
    }
}

/// Input for creating an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub kind: ItemKind,
    pub name: String,
    #[serde(default)]
    pub definition: String,
    pub workgroup: Option<WorkgroupId>,
    #[serde(default)]
    pub links: Vec<ItemLink>,
    #[serde(default)]
    pub extension: serde_json::Value,
}

/// Content edit carrying the optimistic-concurrency token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEdit {
    pub item: ItemId,
    pub last_fetched: DateTime<Utc>,
    pub name: Option<String>,
    pub definition: Option<String>,
    pub ready_to_review: Option<bool>,
    pub links: Option<Vec<ItemLink>>,
}

impl ItemEdit {
    pub fn new(item: ItemId, last_fetched: DateTime<Utc>) -> Self {
        Self {
            item,
            last_fetched,
            name: None,
            definition: None,
            ready_to_review: None,
            links: None,
        }
    }

    /// Names of the content fields this edit touches.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.definition.is_some() {
            fields.push("definition");
        }
        if self.ready_to_review.is_some() {
            fields.push("ready_to_review");
        }
        if self.links.is_some() {
            fields.push("links");
        }
        fields
    }
}

/// Outcome of a bulk recache job. Items that could not be evaluated are
/// listed with the error and keep their previous flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecacheReport {
    pub scanned: usize,
    pub changed: usize,
    pub failed: Vec<(ItemId, String)>,
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn state_ordering_is_ordinal() {
        assert!(State::NotProgressed < State::Incomplete);
        assert!(State::Recorded < State::Standard);
        assert!(State::Superseded < State::Retired);
        assert_eq!(State::Standard.ordinal(), 5);
        assert_eq!(State::from_ordinal(3), Some(State::Recorded));
        assert_eq!(State::from_ordinal(9), None);
    }

    #[test]
    fn state_str_round_trip() {
        for state in State::iter() {
            assert_eq!(State::from_str(state.as_str()), Some(state));
            assert_eq!(state.as_ref(), state.as_str());
        }
        assert_eq!(State::from_str("bogus"), None);
        assert_eq!(
            serde_json::to_value(State::NotProgressed).unwrap(),
            "notprogressed"
        );
    }

    #[test]
    fn item_kind_display() {
        assert_eq!(ItemKind::DataElementConcept.to_string(), "data_element_concept");
        assert_eq!(ItemKind::from_str("value_domain"), Some(ItemKind::ValueDomain));
        assert_eq!(ItemKind::from_str("widget"), None);
    }

    #[test]
    fn authority_defaults() {
        let ra = Authority::new("RA");
        assert_eq!(ra.locked_state, State::Candidate);
        assert_eq!(ra.public_state, State::Recorded);
    }

    #[test]
    fn authority_rejects_inverted_thresholds() {
        let err = Authority::new("RA")
            .with_thresholds(State::Standard, State::Candidate)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidThresholds { .. }));

        let ok = Authority::new("RA")
            .with_thresholds(State::Standard, State::Standard)
            .unwrap();
        assert_eq!(ok.locked_state, ok.public_state);
    }

    #[test]
    fn status_window_is_inclusive() {
        let status = Status {
            id: StatusId::new(),
            item: ItemId::new(),
            authority: AuthorityId::new(),
            state: State::Standard,
            registration_date: date(2005, 1, 1),
            until_date: Some(date(2005, 6, 29)),
            change_details: String::new(),
            created: Utc::now(),
        };
        assert!(!status.is_valid_on(date(2004, 12, 31)));
        assert!(status.is_valid_on(date(2005, 1, 1)));
        assert!(status.is_valid_on(date(2005, 6, 29)));
        assert!(!status.is_valid_on(date(2005, 6, 30)));
    }

    #[test]
    fn workgroup_membership_is_union_of_roles() {
        let mut wg = Workgroup::new("WG", OwnershipMode::Registry);
        let steward = UserId::new();
        let outsider = UserId::new();
        wg.grant(WorkgroupRole::Steward, steward);
        assert!(wg.is_member(steward));
        assert!(wg.has_role(WorkgroupRole::Steward, steward));
        assert!(!wg.is_member(outsider));
    }

    #[test]
    fn publication_record_dates() {
        let record = PublicationRecord {
            item: ItemId::new(),
            publisher: UserId::new(),
            visibility: PublicationVisibility::Active,
            publication_date: date(2020, 1, 1),
            note: None,
            created: Utc::now(),
        };
        assert!(!record.is_public_on(date(2021, 1, 1)));
        assert!(record.is_visible_to_active_on(date(2021, 1, 1)));
        assert!(!record.is_visible_to_active_on(date(2019, 12, 31)));
    }

    #[test]
    fn item_edit_changed_fields() {
        let mut edit = ItemEdit::new(ItemId::new(), Utc::now());
        assert!(edit.changed_fields().is_empty());
        edit.name = Some("renamed".into());
        edit.ready_to_review = Some(true);
        assert_eq!(edit.changed_fields(), vec!["name", "ready_to_review"]);
    }
}
