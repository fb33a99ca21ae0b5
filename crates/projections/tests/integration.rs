//! Integration tests: buffered events → claim → EventRouter → projection store.

use chrono::{DateTime, TimeZone, Utc};
use common::{BaseId, ContinentId, ContinentKey, EventCategory, Faction, ServerId};
use domain::{AlertHandler, AlertState, OwnershipHandler, PopulationHandler};
use event_store::{
    AlertPhase, Base, EventStore, InMemoryEventStore, RawEvent, ReferenceData, TrackedServer,
};
use projections::{EventRouter, InMemoryProjectionStore, ProjectionStore, ProjectionStoreExt};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn reference() -> ReferenceData {
    ReferenceData::new(
        [TrackedServer {
            id: ServerId::new(10),
            name: "Miller".to_string(),
            region: "EU".to_string(),
            tracking_enabled: true,
        }],
        (1..=20).map(|id| Base {
            id: BaseId::new(id),
            name: format!("base-{id}"),
            continent_id: ContinentId::new(2),
            base_type: "Small Outpost".to_string(),
            map_pos_x: 0.0,
            map_pos_y: 0.0,
        }),
    )
}

/// Helper to set up buffer, projection store, and a router with every handler.
fn setup() -> (
    InMemoryEventStore,
    InMemoryProjectionStore,
    EventRouter<InMemoryProjectionStore>,
) {
    let buffer = InMemoryEventStore::new();
    let store = InMemoryProjectionStore::new();
    let mut router = EventRouter::new(store.clone());
    router.register(Box::new(OwnershipHandler::new()));
    router.register(Box::new(PopulationHandler::new()));
    router.register(Box::new(AlertHandler::default()));
    (buffer, store, router)
}

fn control(secs: i64, base: i32, new: Faction) -> RawEvent {
    RawEvent::builder()
        .timestamp(at(secs))
        .server(10)
        .continent(2)
        .base_control(base, Faction::None, new)
}

fn blip(secs: i64, player: i64, base: i32) -> RawEvent {
    RawEvent::builder()
        .timestamp(at(secs))
        .server(10)
        .continent(2)
        .player_blip(player, base)
}

fn alert(secs: i64, phase: AlertPhase) -> RawEvent {
    RawEvent::builder()
        .timestamp(at(secs))
        .server(10)
        .continent(2)
        .alert(147, phase)
}

/// Claims every category up to `watermark` and routes the result.
async fn tick(
    buffer: &InMemoryEventStore,
    router: &EventRouter<InMemoryProjectionStore>,
    watermark: DateTime<Utc>,
) -> u64 {
    let mut written = 0;
    for category in EventCategory::ALL {
        let batch = buffer.claim(category, watermark).await.unwrap();
        written += router.route(batch, &reference()).await.blips_written();
    }
    written
}

#[tokio::test]
async fn every_event_becomes_exactly_one_blip() {
    let (buffer, store, router) = setup();

    // 30 events spread over three ticks with overlapping arrival.
    for i in 0..10 {
        buffer.push(control(i, (i % 20 + 1) as i32, Faction::Vs)).await;
        buffer.push(blip(i, i, (i % 20 + 1) as i32)).await;
    }
    tick(&buffer, &router, at(5)).await;
    for i in 10..20 {
        buffer.push(control(i, (i % 20 + 1) as i32, Faction::Tr)).await;
    }
    tick(&buffer, &router, at(15)).await;
    tick(&buffer, &router, at(100)).await;
    tick(&buffer, &router, at(200)).await;

    assert_eq!(buffer.event_count().await, 0);
    assert_eq!(
        store.blip_count(EventCategory::BaseControl).await.unwrap(),
        20
    );
    assert_eq!(store.blip_count(EventCategory::PlayerBlip).await.unwrap(), 10);
}

#[tokio::test]
async fn latest_event_wins_regardless_of_arrival() {
    let (buffer, store, router) = setup();

    // Arrival order A(t=1), B(t=3), C(t=2).
    buffer
        .push_all([
            control(1, 5, Faction::Vs),
            control(3, 5, Faction::Nc),
            control(2, 5, Faction::Tr),
        ])
        .await;
    tick(&buffer, &router, at(10)).await;

    let owner = store
        .ownership(ServerId::new(10), BaseId::new(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.owning_faction, Faction::Nc);
    assert_eq!(owner.owned_since, at(3));

    let blips = store.blips(EventCategory::BaseControl).await;
    let times: Vec<_> = blips.iter().map(|e| e.timestamp).collect();
    assert_eq!(times, vec![at(1), at(2), at(3)]);
}

#[tokio::test]
async fn out_of_order_ticks_match_in_order_processing() {
    let events = [
        control(1, 1, Faction::Vs),
        control(2, 2, Faction::Nc),
        control(3, 1, Faction::Tr),
        control(4, 3, Faction::Vs),
        control(5, 2, Faction::Tr),
    ];

    // In timestamp order, one tick.
    let (buffer, in_order, router) = setup();
    buffer.push_all(events.clone()).await;
    tick(&buffer, &router, at(10)).await;

    // Newest first, each in its own tick.
    let (buffer, reversed, router) = setup();
    for event in events.iter().rev() {
        buffer.push(event.clone()).await;
        tick(&buffer, &router, at(10)).await;
    }

    assert_eq!(
        in_order.ownerships(ServerId::new(10)).await.unwrap().len(),
        3
    );
    let a: Vec<_> = in_order
        .ownerships(ServerId::new(10))
        .await
        .unwrap()
        .into_iter()
        .map(|o| (o.base_id, o.owning_faction, o.owned_since))
        .collect();
    let b: Vec<_> = reversed
        .ownerships(ServerId::new(10))
        .await
        .unwrap()
        .into_iter()
        .map(|o| (o.base_id, o.owning_faction, o.owned_since))
        .collect();
    assert_eq!(a, b);
}

#[tokio::test]
async fn empty_claim_opens_no_transaction() {
    let (buffer, store, router) = setup();

    assert_eq!(tick(&buffer, &router, at(10)).await, 0);
    assert_eq!(store.transactions_opened(), 0);
}

#[tokio::test]
async fn unknown_base_is_excluded_and_siblings_applied() {
    let (buffer, store, router) = setup();

    buffer
        .push_all([
            control(1, 5, Faction::Vs),
            control(2, 9999, Faction::Vs),
            control(3, 6, Faction::Nc),
        ])
        .await;
    tick(&buffer, &router, at(10)).await;

    assert_eq!(store.blip_count(EventCategory::BaseControl).await.unwrap(), 2);
    assert!(
        store
            .ownership(ServerId::new(10), BaseId::new(9999))
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(store.ownerships(ServerId::new(10)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failing_alert_apply_does_not_block_ownership() {
    let (buffer, store, router) = setup();
    store.fail_applies(EventCategory::ContinentAlert, true).await;

    buffer
        .push_all([control(1, 5, Faction::Vs), alert(1, AlertPhase::Start)])
        .await;
    let mut failed = Vec::new();
    for category in EventCategory::ALL {
        let batch = buffer.claim(category, at(10)).await.unwrap();
        failed.extend(router.route(batch, &reference()).await.failed());
    }

    assert_eq!(failed, vec![EventCategory::ContinentAlert]);
    assert!(
        store
            .ownership(ServerId::new(10), BaseId::new(5))
            .await
            .unwrap()
            .is_some()
    );
    assert_eq!(store.blip_count(EventCategory::ContinentAlert).await.unwrap(), 0);
}

#[tokio::test]
async fn alert_lifecycle_across_ticks() {
    let (buffer, store, router) = setup();
    let key = ContinentKey::new(ServerId::new(10), ContinentId::new(2));
    let grace = AlertHandler::default().grace();

    buffer.push(alert(0, AlertPhase::Start)).await;
    tick(&buffer, &router, at(10)).await;
    assert_eq!(store.alert(key).await.unwrap().state, AlertState::Active);

    buffer.push(alert(100, AlertPhase::End)).await;
    tick(&buffer, &router, at(200)).await;
    assert_eq!(store.alert(key).await.unwrap().state, AlertState::Ending);

    // A late start from before the end does not move the state back.
    buffer.push(alert(50, AlertPhase::Start)).await;
    tick(&buffer, &router, at(200)).await;
    assert_eq!(store.alert(key).await.unwrap().state, AlertState::Ending);

    store.expire_alerts(at(100) + grace, grace).await.unwrap();
    let settled = store.alert(key).await.unwrap();
    assert_eq!(settled.state, AlertState::Inactive);
    assert_eq!(
        store.blip_count(EventCategory::ContinentAlert).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn population_snapshot_after_pipeline() {
    let (buffer, store, router) = setup();

    buffer
        .push_all([
            blip(10, 1, 5),
            blip(20, 2, 5),
            blip(30, 1, 6),
            blip(40, 3, 6),
        ])
        .await;
    tick(&buffer, &router, at(100)).await;

    let snapshot = store
        .population_at(ServerId::new(10), at(100), chrono::Duration::minutes(15))
        .await
        .unwrap();
    assert_eq!(snapshot.base(BaseId::new(5)), 1);
    assert_eq!(snapshot.base(BaseId::new(6)), 2);
    assert_eq!(snapshot.continent(ContinentId::new(2)), 3);
    assert_eq!(snapshot.total, 3);
}
