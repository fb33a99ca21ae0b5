use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{BaseId, BaseKey, ContinentKey, EventCategory, PlayerKey, ServerId};
use domain::{
    AlertRecord, ApplyReport, BaseOwnership, PlayerPresence, ProjectionDelta, presence_cutoff,
};
use event_store::RawEvent;
use tokio::sync::RwLock;

use crate::{ProjectionError, Result, store::ProjectionStore};

#[derive(Debug, Default)]
struct Tables {
    ownership: HashMap<BaseKey, BaseOwnership>,
    presence: HashMap<PlayerKey, PlayerPresence>,
    alerts: HashMap<ContinentKey, AlertRecord>,
    blips: HashMap<EventCategory, Vec<RawEvent>>,
}

/// In-memory projection store for testing.
///
/// Applies follow the same rules as the PostgreSQL store: guarded upserts,
/// conditional alert writes, and all-or-nothing deltas.
#[derive(Clone, Default)]
pub struct InMemoryProjectionStore {
    tables: Arc<RwLock<Tables>>,
    failing: Arc<RwLock<HashSet<EventCategory>>>,
    transactions: Arc<AtomicU64>,
}

impl InMemoryProjectionStore {
    /// Creates a new empty in-memory projection store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every apply of `category` fail with `StoreUnavailable` until
    /// cleared.
    pub async fn fail_applies(&self, category: EventCategory, failing: bool) {
        let mut set = self.failing.write().await;
        if failing {
            set.insert(category);
        } else {
            set.remove(&category);
        }
    }

    /// Returns how many apply transactions have been opened.
    pub fn transactions_opened(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Returns the history rows of a category in insertion order.
    pub async fn blips(&self, category: EventCategory) -> Vec<RawEvent> {
        self.tables
            .read()
            .await
            .blips
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the stored alert row of a continent.
    pub async fn alert(&self, key: ContinentKey) -> Option<AlertRecord> {
        self.tables.read().await.alerts.get(&key).copied()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn apply(&self, delta: &ProjectionDelta) -> Result<ApplyReport> {
        if delta.is_empty() {
            return Ok(ApplyReport::default());
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);

        if self.failing.read().await.contains(&delta.category) {
            return Err(ProjectionError::StoreUnavailable(format!(
                "applies of {} are failing",
                delta.category
            )));
        }

        let mut tables = self.tables.write().await;

        // Check every conditional write before touching anything.
        for change in &delta.alerts {
            let key = change.record.key();
            let stored = tables.alerts.get(&key).map(AlertRecord::causal_order);
            if stored != change.expected {
                return Err(ProjectionError::ApplyConflict { key });
            }
        }

        let mut report = ApplyReport::default();
        for record in &delta.ownership {
            let stored = tables.ownership.get(&record.key());
            if stored.is_none_or(|s| s.causal_order() < record.causal_order()) {
                tables.ownership.insert(record.key(), *record);
                report.rows_updated += 1;
            }
        }
        for record in &delta.presence {
            let stored = tables.presence.get(&record.key());
            if stored.is_none_or(|s| s.causal_order() < record.causal_order()) {
                tables.presence.insert(record.key(), *record);
                report.rows_updated += 1;
            }
        }
        for change in &delta.alerts {
            tables.alerts.insert(change.record.key(), change.record);
            report.rows_updated += 1;
        }
        for event in &delta.blips {
            tables
                .blips
                .entry(event.category())
                .or_default()
                .push(event.clone());
            report.blips_written += 1;
        }

        Ok(report)
    }

    async fn load_alerts(&self, keys: &[ContinentKey]) -> Result<Vec<AlertRecord>> {
        let tables = self.tables.read().await;
        let mut found: Vec<_> = keys
            .iter()
            .filter_map(|key| tables.alerts.get(key).copied())
            .collect();
        found.sort_by_key(AlertRecord::key);
        found.dedup_by_key(|a| a.key());
        Ok(found)
    }

    async fn ownership(
        &self,
        server_id: ServerId,
        base_id: BaseId,
    ) -> Result<Option<BaseOwnership>> {
        Ok(self
            .tables
            .read()
            .await
            .ownership
            .get(&BaseKey::new(server_id, base_id))
            .copied())
    }

    async fn ownerships(&self, server_id: ServerId) -> Result<Vec<BaseOwnership>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<_> = tables
            .ownership
            .values()
            .filter(|o| o.server_id == server_id)
            .copied()
            .collect();
        rows.sort_by_key(|o| o.base_id);
        Ok(rows)
    }

    async fn presence_as_of(
        &self,
        server_id: ServerId,
        as_of: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<PlayerPresence>> {
        let tables = self.tables.read().await;
        let mut latest: BTreeMap<PlayerKey, PlayerPresence> = BTreeMap::new();
        let history = tables
            .blips
            .get(&EventCategory::PlayerBlip)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for presence in history.iter().filter_map(PlayerPresence::from_event) {
            if presence.server_id != server_id || presence.last_seen > as_of {
                continue;
            }
            latest
                .entry(presence.key())
                .and_modify(|current| {
                    if presence.causal_order() > current.causal_order() {
                        *current = presence;
                    }
                })
                .or_insert(presence);
        }

        let oldest = presence_cutoff(as_of, window);
        Ok(latest
            .into_values()
            .filter(|p| p.last_seen > oldest)
            .collect())
    }

    async fn expire_alerts(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut expired = 0;
        for record in tables.alerts.values_mut() {
            if record.settle(now, grace) {
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn blip_count(&self, category: EventCategory) -> Result<u64> {
        Ok(self
            .tables
            .read()
            .await
            .blips
            .get(&category)
            .map_or(0, |b| b.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use common::{AlertId, ContinentId, Faction};
    use domain::{AlertChange, AlertState, Handler, OwnershipHandler, PriorState};
    use event_store::AlertPhase;

    use super::*;
    use crate::ProjectionStoreExt;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn control(seq: i64, secs: i64, new: Faction) -> RawEvent {
        RawEvent::builder()
            .sequence(seq)
            .timestamp(at(secs))
            .server(10)
            .continent(2)
            .base_control(5, Faction::None, new)
    }

    fn key() -> ContinentKey {
        ContinentKey::new(ServerId::new(10), ContinentId::new(2))
    }

    #[tokio::test]
    async fn empty_delta_opens_no_transaction() {
        let store = InMemoryProjectionStore::new();
        let report = store
            .apply(&ProjectionDelta::empty(EventCategory::BaseControl))
            .await
            .unwrap();
        assert_eq!(report, ApplyReport::default());
        assert_eq!(store.transactions_opened(), 0);
    }

    #[tokio::test]
    async fn older_ownership_never_overwrites_newer() {
        let store = InMemoryProjectionStore::new();
        let handler = OwnershipHandler::new();
        let prior = PriorState::default();

        store
            .apply(&handler.project(&[control(2, 3, Faction::Nc)], &prior))
            .await
            .unwrap();
        let report = store
            .apply(&handler.project(&[control(3, 2, Faction::Tr)], &prior))
            .await
            .unwrap();

        assert_eq!(report.rows_updated, 0);
        assert_eq!(report.blips_written, 1);
        let owner = store
            .ownership(ServerId::new(10), BaseId::new(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.owning_faction, Faction::Nc);
        assert_eq!(store.blip_count(EventCategory::BaseControl).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_alert_write_conflicts_and_writes_nothing() {
        let store = InMemoryProjectionStore::new();
        let mut record = AlertRecord::inactive(key(), at(0));
        record.advance((at(1), 1), AlertId::new(147), AlertPhase::Start, Duration::minutes(10));

        let mut delta = ProjectionDelta::empty(EventCategory::ContinentAlert);
        delta.alerts.push(AlertChange {
            expected: Some((at(0), 0)),
            record,
        });
        delta.blips.push(
            RawEvent::builder()
                .sequence(1)
                .timestamp(at(1))
                .server(10)
                .continent(2)
                .alert(147, AlertPhase::Start),
        );

        let err = store.apply(&delta).await.unwrap_err();
        assert!(matches!(err, ProjectionError::ApplyConflict { .. }));
        assert_eq!(store.blip_count(EventCategory::ContinentAlert).await.unwrap(), 0);
        assert!(store.alert(key()).await.is_none());
    }

    #[tokio::test]
    async fn expire_alerts_settles_ending_rows() {
        let store = InMemoryProjectionStore::new();
        let grace = Duration::minutes(10);
        let mut record = AlertRecord::inactive(key(), at(0));
        record.advance((at(1), 1), AlertId::new(147), AlertPhase::Start, grace);
        record.advance((at(100), 2), AlertId::new(147), AlertPhase::End, grace);

        let mut delta = ProjectionDelta::empty(EventCategory::ContinentAlert);
        delta.alerts.push(AlertChange {
            expected: None,
            record,
        });
        store.apply(&delta).await.unwrap();

        assert_eq!(store.expire_alerts(at(200), grace).await.unwrap(), 0);
        assert_eq!(store.expire_alerts(at(800), grace).await.unwrap(), 1);
        let stored = store.alert(key()).await.unwrap();
        assert_eq!(stored.state, AlertState::Inactive);
        assert_eq!(stored.state_since, at(700));
    }

    #[tokio::test]
    async fn population_from_history() {
        let store = InMemoryProjectionStore::new();
        let blips: Vec<_> = [(1, 10, 1_i64, 100), (2, 20, 2, 100), (3, 30, 1, 101)]
            .into_iter()
            .map(|(seq, secs, player, base)| {
                RawEvent::builder()
                    .sequence(seq)
                    .timestamp(at(secs))
                    .server(10)
                    .continent(2)
                    .player_blip(player, base)
            })
            .collect();
        let mut delta = ProjectionDelta::empty(EventCategory::PlayerBlip);
        delta.blips = blips;
        store.apply(&delta).await.unwrap();

        let window = Duration::minutes(15);
        let early = store
            .population_at(ServerId::new(10), at(25), window)
            .await
            .unwrap();
        assert_eq!(early.base(BaseId::new(100)), 2);

        let late = store
            .population_at(ServerId::new(10), at(60), window)
            .await
            .unwrap();
        assert_eq!(late.base(BaseId::new(100)), 1);
        assert_eq!(late.base(BaseId::new(101)), 1);
        assert_eq!(late.continent(ContinentId::new(2)), 2);
    }

    #[tokio::test]
    async fn unbounded_window_stops_at_epoch() {
        let store = InMemoryProjectionStore::new();
        let events = vec![
            RawEvent::builder()
                .sequence(1)
                .timestamp(Utc.timestamp_opt(-3_600, 0).unwrap())
                .server(10)
                .continent(2)
                .player_blip(7_i64, 5),
            RawEvent::builder()
                .sequence(2)
                .timestamp(at(10))
                .server(10)
                .continent(2)
                .player_blip(1_i64, 5),
        ];
        let delta = domain::PopulationHandler::new().project(&events, &PriorState::default());
        store.apply(&delta).await.unwrap();

        let present = store
            .presence_as_of(ServerId::new(10), at(60), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].player_id.get(), 1);

        let snapshot = store
            .population_at(ServerId::new(10), at(60), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(snapshot.total, 1);
    }

    #[tokio::test]
    async fn failing_category_is_isolated() {
        let store = InMemoryProjectionStore::new();
        store.fail_applies(EventCategory::ContinentAlert, true).await;

        let delta = OwnershipHandler::new().project(&[control(1, 1, Faction::Vs)], &PriorState::default());
        assert!(store.apply(&delta).await.is_ok());

        let mut alert = ProjectionDelta::empty(EventCategory::ContinentAlert);
        alert.blips.push(
            RawEvent::builder()
                .server(10)
                .continent(2)
                .alert(147, AlertPhase::End),
        );
        assert!(store.apply(&alert).await.unwrap_err().is_transient());
    }
}
