//! Bulk visibility filters.
//!
//! Each filter keeps exactly the members for which the per-item predicate
//! in [`crate::perms`] holds.

use chrono::NaiveDate;

use crate::perms::{can_edit, can_view, Actor, ItemFacts};
use crate::types::Item;

#[derive(Debug, Clone, Copy)]
pub struct ConceptQuerySet<'a> {
    facts: &'a [ItemFacts],
    today: NaiveDate,
}

impl<'a> ConceptQuerySet<'a> {
    pub fn new(facts: &'a [ItemFacts], today: NaiveDate) -> Self {
        Self { facts, today }
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Superuser: everything. Anonymous or inactive: `public()` only.
    pub fn visible(&self, actor: &Actor) -> Vec<&'a Item> {
        if actor.principal.is_effective_superuser() {
            return self.all();
        }
        if actor.principal.active_user().is_none() {
            return self.public();
        }
        self.filter(|f| can_view(actor, f, self.today))
    }

    pub fn editable(&self, actor: &Actor) -> Vec<&'a Item> {
        if actor.principal.is_effective_superuser() {
            return self.all();
        }
        if actor.principal.active_user().is_none() {
            return Vec::new();
        }
        self.filter(|f| can_edit(actor, f, self.today))
    }

    /// Items whose cached public flag is set. Only as fresh as the cache.
    pub fn public(&self) -> Vec<&'a Item> {
        self.filter(|f| f.item.is_public())
    }

    fn all(&self) -> Vec<&'a Item> {
        self.facts.iter().map(|f| &f.item).collect()
    }

    fn filter(&self, keep: impl Fn(&ItemFacts) -> bool) -> Vec<&'a Item> {
        self.facts
            .iter()
            .filter(|f| keep(f))
            .map(|f| &f.item)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::Principal;
    use crate::types::{ItemKind, OwnershipMode, UserId, Workgroup, WorkgroupRole};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn facts(item: Item, workgroup: Option<Workgroup>) -> ItemFacts {
        ItemFacts {
            item,
            workgroup,
            current_authorities: BTreeSet::new(),
            review_authorities: BTreeSet::new(),
            publication: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn filters_by_role() {
        let member = UserId::new();
        let mut wg = Workgroup::new("WG", OwnershipMode::Registry);
        wg.grant(WorkgroupRole::Submitter, member);

        let mut public = Item::new(ItemKind::Property, "Age", Utc::now());
        public.visibility.is_public = true;
        let draft = Item::new(ItemKind::Property, "Height", Utc::now()).in_workgroup(wg.id);
        let foreign = Item::new(ItemKind::Property, "Weight", Utc::now());

        let all = vec![
            facts(public.clone(), None),
            facts(draft.clone(), Some(wg)),
            facts(foreign.clone(), None),
        ];
        let qs = ConceptQuerySet::new(&all, today());

        let anon = Actor::new(Principal::anonymous());
        assert_eq!(qs.visible(&anon), vec![&public]);
        assert!(qs.editable(&anon).is_empty());

        let user = Actor::new(Principal::user(member));
        assert_eq!(qs.visible(&user), vec![&public, &draft]);
        assert_eq!(qs.editable(&user), vec![&draft]);

        let admin = Actor::new(Principal::superuser(UserId::new()));
        assert_eq!(qs.visible(&admin).len(), 3);
        assert_eq!(qs.editable(&admin).len(), 3);
        assert_eq!(qs.public(), vec![&public]);

        let lapsed = Actor::new(Principal {
            is_active: false,
            ..Principal::superuser(member)
        });
        assert_eq!(qs.visible(&lapsed), vec![&public]);
        assert!(qs.editable(&lapsed).is_empty());
    }
}
