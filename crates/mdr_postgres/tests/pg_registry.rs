//! Registry service against a live Postgres.
//!
//! Run with: DATABASE_URL=... cargo test -p mdr_postgres --features database -- --ignored

#![cfg(feature = "database")]

use std::sync::Arc;

use chrono::NaiveDate;
use mdr_core::store::RegistryStore;
use mdr_core::types::*;
use mdr_core::{FixedClock, Principal, RegistryConfig, RegistryService};
use mdr_postgres::{migrate, DatabaseConfig, PgRegistryStore};

async fn get_test_store() -> PgRegistryStore {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/mdr_test".to_string());
    let pool = DatabaseConfig::with_url(url)
        .connect()
        .await
        .expect("Failed to connect to database");
    migrate(&pool).await.expect("Failed to apply schema");
    PgRegistryStore::new(pool)
}

fn service(store: &PgRegistryStore) -> RegistryService {
    RegistryService::new(Arc::new(store.clone()), Arc::new(RegistryConfig::default())).with_clock(
        Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())),
    )
}

async fn seed(service: &RegistryService, admin: &Principal) -> (Authority, Workgroup, Item) {
    let authority = service
        .create_authority(admin, Authority::new("PG RA"))
        .await
        .unwrap();
    let mut workgroup = Workgroup::new("PG WG", OwnershipMode::Authority);
    workgroup.authorities.insert(authority.id);
    let workgroup = service.create_workgroup(admin, workgroup).await.unwrap();
    let item = service
        .create_item(
            admin,
            NewItem {
                kind: ItemKind::ObjectClass,
                name: "Person".into(),
                definition: "A human being".into(),
                workgroup: Some(workgroup.id),
                links: vec![],
                extension: serde_json::json!({"source": "pg test"}),
            },
        )
        .await
        .unwrap();
    (authority, workgroup, item)
}

#[tokio::test]
#[ignore] // Requires database
async fn registration_persists_status_and_flags() {
    let store = get_test_store().await;
    let service = service(&store);
    let admin = Principal::superuser(UserId::new());
    let (authority, _, item) = seed(&service, &admin).await;

    let status = service
        .register_item(
            &admin,
            authority.id,
            item.id,
            State::Standard,
            RegistrationRequest::default().details("approved"),
        )
        .await
        .unwrap();

    let mut uow = store.begin().await.unwrap();
    let stored = uow.load_item(item.id).await.unwrap().unwrap();
    assert!(stored.is_public());
    assert!(stored.is_locked());
    assert_eq!(stored.extension["source"], "pg test");
    let statuses = uow.statuses_for_item(item.id).await.unwrap();
    assert_eq!(statuses, vec![status]);
    let audit = uow.audit_for_item(item.id).await.unwrap();
    assert!(audit.iter().any(|e| e.action == "register"));
    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn dropped_unit_of_work_rolls_back() {
    let store = get_test_store().await;
    let item = Item::new(ItemKind::Property, "Age", chrono::Utc::now());

    let mut uow = store.begin().await.unwrap();
    uow.insert_item(&item).await.unwrap();
    drop(uow);

    let mut uow = store.begin().await.unwrap();
    assert!(uow.load_item(item.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires database
async fn update_item_leaves_cached_flags() {
    let store = get_test_store().await;
    let mut item = Item::new(ItemKind::Property, "Height", chrono::Utc::now());
    let mut uow = store.begin().await.unwrap();
    uow.insert_item(&item).await.unwrap();
    uow.update_visibility(
        item.id,
        VisibilityFlags {
            is_public: true,
            is_locked: false,
        },
    )
    .await
    .unwrap();
    item.name = "Height in cm".into();
    uow.update_item(&item).await.unwrap();
    let stored = uow.load_item(item.id).await.unwrap().unwrap();
    assert!(stored.is_public());
    assert_eq!(stored.name, "Height in cm");
    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn concurrent_registrations_both_land() {
    let store = get_test_store().await;
    let service = Arc::new(service(&store));
    let admin = Principal::superuser(UserId::new());
    let (authority, _, item) = seed(&service, &admin).await;

    let a = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .register(
                    &admin,
                    authority.id,
                    item.id,
                    State::Candidate,
                    RegistrationRequest::default(),
                )
                .await
        })
    };
    let b = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .register(
                    &admin,
                    authority.id,
                    item.id,
                    State::Standard,
                    RegistrationRequest::default(),
                )
                .await
        })
    };
    assert!(a.await.unwrap().unwrap());
    assert!(b.await.unwrap().unwrap());

    let mut uow = store.begin().await.unwrap();
    assert_eq!(uow.statuses_for_item(item.id).await.unwrap().len(), 2);
    let stored = uow.load_item(item.id).await.unwrap().unwrap();
    // Both states reach the locked threshold; the second commit recached
    // after seeing the first.
    assert!(stored.is_locked());
}

#[tokio::test]
#[ignore] // Requires database
async fn publication_and_review_rows_round_trip() {
    let store = get_test_store().await;
    let service = service(&store);
    let admin = Principal::superuser(UserId::new());
    let (authority, _, item) = seed(&service, &admin).await;

    service
        .publish(&admin, item.id, PublicationVisibility::Active, None, Some("beta".into()))
        .await
        .unwrap();
    let review = service
        .submit_review(
            &admin,
            mdr_core::service::NewReviewRequest {
                authority: authority.id,
                items: vec![item.id],
                state: State::Qualified,
                registration_date: None,
                cascade: true,
                message: None,
            },
        )
        .await
        .unwrap();

    let mut uow = store.begin().await.unwrap();
    let record = uow.load_publication(item.id).await.unwrap().unwrap();
    assert_eq!(record.visibility, PublicationVisibility::Active);
    assert_eq!(record.note.as_deref(), Some("beta"));
    let reviews = uow.reviews_for_item(item.id).await.unwrap();
    assert_eq!(reviews, vec![review]);
    assert!(uow.delete_publication(item.id).await.unwrap());
    assert!(!uow.delete_publication(item.id).await.unwrap());
    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn bulk_loaders_match_single_item_loaders() {
    let store = get_test_store().await;
    let service = service(&store);
    let admin = Principal::superuser(UserId::new());
    let (authority, workgroup, item) = seed(&service, &admin).await;
    service
        .register(&admin, authority.id, item.id, State::Standard, RegistrationRequest::default())
        .await
        .unwrap();
    service
        .publish(&admin, item.id, PublicationVisibility::Public, None, None)
        .await
        .unwrap();

    let mut uow = store.begin().await.unwrap();
    assert_eq!(
        uow.statuses_for_items(&[item.id]).await.unwrap(),
        uow.statuses_for_item(item.id).await.unwrap()
    );
    let publications = uow.publications_for_items(&[item.id]).await.unwrap();
    assert_eq!(publications.len(), 1);
    assert_eq!(publications[0].item, item.id);
    let workgroups = uow.load_workgroups(&[workgroup.id]).await.unwrap();
    assert_eq!(workgroups.len(), 1);
    assert_eq!(workgroups[0].id, workgroup.id);
    assert!(uow.public_items().await.unwrap().iter().any(|i| i.id == item.id));
    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn unreadable_outbox_rows_are_dead_lettered() {
    let store = get_test_store().await;
    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO mdr.outbox_events (event_type, payload, created_at)
        VALUES ('bogus', '{"type": "bogus"}'::jsonb, now())
        RETURNING outbox_seq
        "#,
    )
    .fetch_one(store.pool())
    .await
    .unwrap();

    let events = service(&store).drain_events(10_000).await.unwrap();
    assert!(events.iter().all(|e| e.seq != seq));

    let error: Option<String> =
        sqlx::query_scalar("SELECT error FROM mdr.outbox_dead_letters WHERE outbox_seq = $1")
            .bind(seq)
            .fetch_optional(store.pool())
            .await
            .unwrap();
    assert!(error.is_some());
}
