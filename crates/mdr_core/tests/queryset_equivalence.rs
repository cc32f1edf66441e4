//! Bulk listings agree with single-item checks, and the cached public flag
//! agrees with a fresh evaluation, for randomly generated registries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use mdr_core::types::*;
use mdr_core::visibility::evaluate;
use mdr_core::{FixedClock, MemoryStore, Principal, RegistryConfig, RegistryService};

const STATES: [State; 9] = [
    State::NotProgressed,
    State::Incomplete,
    State::Candidate,
    State::Recorded,
    State::Qualified,
    State::Standard,
    State::Preferred,
    State::Superseded,
    State::Retired,
];

#[derive(Debug, Clone)]
struct ItemPlan {
    workgroup: Option<usize>,
    ready: bool,
    /// (authority index, state index, days before today)
    statuses: Vec<(usize, usize, i64)>,
    published: Option<bool>,
}

#[derive(Debug, Clone)]
struct Scenario {
    ownership: [bool; 2],
    associated: [bool; 2],
    role: Option<WorkgroupRole>,
    registrar_of_first: bool,
    items: Vec<ItemPlan>,
}

fn arb_role() -> impl Strategy<Value = Option<WorkgroupRole>> {
    prop_oneof![
        Just(None),
        Just(Some(WorkgroupRole::Viewer)),
        Just(Some(WorkgroupRole::Submitter)),
        Just(Some(WorkgroupRole::Steward)),
        Just(Some(WorkgroupRole::Manager)),
    ]
}

fn arb_item() -> impl Strategy<Value = ItemPlan> {
    (
        proptest::option::of(0usize..2),
        any::<bool>(),
        proptest::collection::vec((0usize..2, 0usize..9, -30i64..400), 0..4),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(workgroup, ready, statuses, published)| ItemPlan {
            workgroup,
            ready,
            statuses,
            published,
        })
}

fn arb_scenario() -> impl Strategy<Value = Scenario> {
    (
        any::<[bool; 2]>(),
        any::<[bool; 2]>(),
        arb_role(),
        any::<bool>(),
        proptest::collection::vec(arb_item(), 1..7),
    )
        .prop_map(|(ownership, associated, role, registrar_of_first, items)| Scenario {
            ownership,
            associated,
            role,
            registrar_of_first,
            items,
        })
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

/// Build the registry; returns the service, the store and the user whose access is checked.
async fn build(scenario: &Scenario) -> (RegistryService, MemoryStore, Principal) {
    let store = MemoryStore::new();
    let service = RegistryService::new(
        Arc::new(store.clone()),
        Arc::new(RegistryConfig::default()),
    )
    .with_clock(Arc::new(FixedClock::on(today())));
    let admin = Principal::superuser(UserId::new());
    let user = UserId::new();

    let mut first = Authority::new("First");
    if scenario.registrar_of_first {
        first.registrars.insert(user);
    }
    let second = Authority::new("Second")
        .with_thresholds(State::Qualified, State::Standard)
        .unwrap();
    let authorities = [
        service.create_authority(&admin, first).await.unwrap(),
        service.create_authority(&admin, second).await.unwrap(),
    ];

    let mut workgroups = Vec::new();
    for i in 0..2 {
        let mode = if scenario.ownership[i] {
            OwnershipMode::Authority
        } else {
            OwnershipMode::Registry
        };
        let mut wg = Workgroup::new(format!("WG{i}"), mode);
        if scenario.associated[i] {
            wg.authorities.insert(authorities[i].id);
        }
        if let (0, Some(role)) = (i, scenario.role) {
            wg.grant(role, user);
        }
        workgroups.push(service.create_workgroup(&admin, wg).await.unwrap());
    }

    for plan in &scenario.items {
        let item = service
            .create_item(
                &admin,
                NewItem {
                    kind: ItemKind::ObjectClass,
                    name: "Thing".into(),
                    definition: String::new(),
                    workgroup: plan.workgroup.map(|i| workgroups[i].id),
                    links: vec![],
                    extension: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();
        if plan.ready {
            let mut edit = ItemEdit::new(item.id, item.modified);
            edit.ready_to_review = Some(true);
            service.edit_item(&admin, edit).await.unwrap();
        }
        for (ra, state, days_ago) in &plan.statuses {
            service
                .register(
                    &admin,
                    authorities[*ra].id,
                    item.id,
                    STATES[*state],
                    RegistrationRequest::default()
                        .effective_from(today() - Duration::days(*days_ago)),
                )
                .await
                .unwrap();
        }
        if let Some(public) = plan.published {
            let visibility = if public {
                PublicationVisibility::Public
            } else {
                PublicationVisibility::Active
            };
            service
                .publish(&admin, item.id, visibility, None, None)
                .await
                .unwrap();
        }
    }

    (service, store, Principal::user(user))
}

fn ids(items: &[Item]) -> BTreeSet<ItemId> {
    items.iter().map(|i| i.id).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn bulk_filters_match_single_item_checks(scenario in arb_scenario()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (service, _store, user) = build(&scenario).await;
            let id = user.user_id.unwrap();
            let lapsed_admin = Principal { is_active: false, ..Principal::superuser(id) };
            for principal in [user, Principal::anonymous(), Principal::inactive(id), lapsed_admin] {
                let visible = ids(&service.visible_items(&principal).await.unwrap());
                let editable = ids(&service.editable_items(&principal).await.unwrap());
                let all = service.visible_items(&Principal::superuser(UserId::new())).await.unwrap();
                for item in &all {
                    let can_view = service.can_view(&principal, item.id).await.unwrap();
                    let can_edit = service.can_edit(&principal, item.id).await.unwrap();
                    assert_eq!(visible.contains(&item.id), can_view, "view {principal}");
                    assert_eq!(editable.contains(&item.id), can_edit, "edit {principal}");
                    assert!(!can_edit || can_view);
                }
            }
        });
    }

    #[test]
    fn public_listing_matches_fresh_evaluation(scenario in arb_scenario()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (service, store, _) = build(&scenario).await;
            let public = ids(&service.public_items().await.unwrap());
            let state = store.snapshot().await;
            let authorities: BTreeMap<_, _> = state.authorities.clone().into_iter().collect();
            for item in state.items.values() {
                let statuses: Vec<Status> = state
                    .statuses
                    .values()
                    .filter(|s| s.item == item.id)
                    .cloned()
                    .collect();
                let workgroup = item.workgroup.and_then(|id| state.workgroups.get(&id));
                let fresh = evaluate(
                    workgroup,
                    &statuses,
                    &authorities,
                    state.publications.get(&item.id),
                    today(),
                )
                .unwrap();
                assert_eq!(fresh, item.visibility);
                assert_eq!(public.contains(&item.id), fresh.is_public);

                // Recaching again changes nothing.
                assert_eq!(service.recache(item.id).await.unwrap(), fresh);
            }
        });
    }
}
