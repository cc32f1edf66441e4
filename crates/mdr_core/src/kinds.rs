//! Per-kind behaviour as lookup tables.
//!
//! Every kind shares the single [`Item`] record; what differs per kind is
//! which links it may carry and which linked items a cascaded registration
//! drags along.

use crate::error::RegistryError;
use crate::types::{Item, ItemId, ItemKind, LinkRole};

pub type DependentsFn = fn(&Item) -> Vec<ItemId>;

/// Direct cascade dependents for `kind`, in declaration order.
pub fn dependents_fn(kind: ItemKind) -> DependentsFn {
    match kind {
        ItemKind::DataElement => data_element_dependents,
        ItemKind::DataElementConcept => data_element_concept_dependents,
        _ => no_dependents,
    }
}

pub fn direct_dependents(item: &Item) -> Vec<ItemId> {
    dependents_fn(item.kind)(item)
}

fn data_element_dependents(item: &Item) -> Vec<ItemId> {
    [LinkRole::ValueDomain, LinkRole::DataElementConcept]
        .into_iter()
        .filter_map(|role| item.link(role))
        .collect()
}

fn data_element_concept_dependents(item: &Item) -> Vec<ItemId> {
    [LinkRole::ObjectClass, LinkRole::Property]
        .into_iter()
        .filter_map(|role| item.link(role))
        .collect()
}

fn no_dependents(_: &Item) -> Vec<ItemId> {
    Vec::new()
}

/// Link roles an item of `kind` may carry, with the kind the target must be.
pub fn allowed_links(kind: ItemKind) -> &'static [(LinkRole, ItemKind)] {
    match kind {
        ItemKind::DataElementConcept => &[
            (LinkRole::ObjectClass, ItemKind::ObjectClass),
            (LinkRole::Property, ItemKind::Property),
            (LinkRole::ConceptualDomain, ItemKind::ConceptualDomain),
        ],
        ItemKind::DataElement => &[
            (LinkRole::DataElementConcept, ItemKind::DataElementConcept),
            (LinkRole::ValueDomain, ItemKind::ValueDomain),
        ],
        ItemKind::ValueDomain => &[
            (LinkRole::ConceptualDomain, ItemKind::ConceptualDomain),
            (LinkRole::DataType, ItemKind::DataType),
            (LinkRole::UnitOfMeasure, ItemKind::UnitOfMeasure),
        ],
        ItemKind::DataElementDerivation => &[
            (LinkRole::Derives, ItemKind::DataElement),
            (LinkRole::Input, ItemKind::DataElement),
        ],
        _ => &[],
    }
}

/// Roles that may appear more than once on one item.
fn is_multi_valued(role: LinkRole) -> bool {
    matches!(role, LinkRole::Input)
}

/// Check roles and cardinality. Target kinds are checked by the caller once
/// the targets are loaded.
pub fn validate_links(item: &Item) -> Result<(), RegistryError> {
    let allowed = allowed_links(item.kind);
    for (i, link) in item.links.iter().enumerate() {
        if !allowed.iter().any(|(role, _)| *role == link.role) {
            return Err(RegistryError::InvalidInput(format!(
                "{} cannot carry a {} link",
                item.kind,
                link.role.as_str()
            )));
        }
        if !is_multi_valued(link.role) && item.links[..i].iter().any(|l| l.role == link.role) {
            return Err(RegistryError::InvalidInput(format!(
                "{} carries more than one {} link",
                item.kind,
                link.role.as_str()
            )));
        }
        if link.target == item.id {
            return Err(RegistryError::InvalidInput(format!(
                "{} links to itself",
                item.id
            )));
        }
    }
    Ok(())
}

/// Kind a link target must have, if the role is allowed for `kind`.
pub fn expected_target_kind(kind: ItemKind, role: LinkRole) -> Option<ItemKind> {
    allowed_links(kind)
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, target)| *target)
}
