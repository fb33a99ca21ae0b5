use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{BaseId, ContinentKey, EventCategory, Faction, ServerId};
use domain::{
    AlertChange, AlertRecord, AlertState, ApplyReport, BaseOwnership, PlayerPresence,
    ProjectionDelta, presence_cutoff,
};
use event_store::{EventPayload, RawEvent, with_deadline};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{ProjectionError, Result, store::ProjectionStore};

/// Deadline applied to every store call unless configured otherwise.
pub const DEFAULT_STORE_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// PostgreSQL-backed projection store.
#[derive(Clone)]
pub struct PostgresProjectionStore {
    pool: PgPool,
    timeout: StdDuration,
}

impl PostgresProjectionStore {
    /// Creates a new PostgreSQL projection store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Sets the deadline applied to every store call.
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn blip_table(category: EventCategory) -> &'static str {
        match category {
            EventCategory::BaseControl => "base_control_blip",
            EventCategory::PlayerBlip => "player_blip",
            EventCategory::ContinentAlert => "continent_alert_blip",
        }
    }

    async fn upsert_ownership(conn: &mut PgConnection, record: &BaseOwnership) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO base_ownership
                (server_id, base_id, continent_id, owning_faction_id, owned_since, event_seq)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (server_id, base_id) DO UPDATE SET
                continent_id = EXCLUDED.continent_id,
                owning_faction_id = EXCLUDED.owning_faction_id,
                owned_since = EXCLUDED.owned_since,
                event_seq = EXCLUDED.event_seq
            WHERE (base_ownership.owned_since, base_ownership.event_seq)
                < (EXCLUDED.owned_since, EXCLUDED.event_seq)
            "#,
        )
        .bind(record.server_id.get())
        .bind(record.base_id.get())
        .bind(record.continent_id.get())
        .bind(record.owning_faction.id())
        .bind(record.owned_since)
        .bind(record.event_sequence)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_presence(conn: &mut PgConnection, record: &PlayerPresence) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO player_presence
                (server_id, player_id, continent_id, base_id, last_seen, event_seq)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (server_id, player_id) DO UPDATE SET
                continent_id = EXCLUDED.continent_id,
                base_id = EXCLUDED.base_id,
                last_seen = EXCLUDED.last_seen,
                event_seq = EXCLUDED.event_seq
            WHERE (player_presence.last_seen, player_presence.event_seq)
                < (EXCLUDED.last_seen, EXCLUDED.event_seq)
            "#,
        )
        .bind(record.server_id.get())
        .bind(record.player_id.get())
        .bind(record.continent_id.get())
        .bind(record.base_id.get())
        .bind(record.last_seen)
        .bind(record.event_sequence)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn write_alert(conn: &mut PgConnection, change: &AlertChange) -> Result<u64> {
        let record = &change.record;
        let query = match change.expected {
            None => sqlx::query(
                r#"
                INSERT INTO continent_alert
                    (server_id, continent_id, state, alert_id, state_since, last_event_at, event_seq)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (server_id, continent_id) DO NOTHING
                "#,
            ),
            Some(_) => sqlx::query(
                r#"
                UPDATE continent_alert SET
                    state = $3,
                    alert_id = $4,
                    state_since = $5,
                    last_event_at = $6,
                    event_seq = $7
                WHERE server_id = $1 AND continent_id = $2
                  AND last_event_at = $8 AND event_seq = $9
                "#,
            ),
        };
        let mut query = query
            .bind(record.server_id.get())
            .bind(record.continent_id.get())
            .bind(record.state.as_str())
            .bind(record.alert_id.map(|id| id.get()))
            .bind(record.state_since)
            .bind(record.last_event_at)
            .bind(record.event_sequence);
        if let Some((last_event_at, event_seq)) = change.expected {
            query = query.bind(last_event_at).bind(event_seq);
        }

        let affected = query.execute(conn).await?.rows_affected();
        if affected == 0 {
            return Err(ProjectionError::ApplyConflict { key: record.key() });
        }
        Ok(affected)
    }

    async fn insert_blip(conn: &mut PgConnection, event: &RawEvent) -> Result<()> {
        match event.payload {
            EventPayload::BaseControl(control) => {
                sqlx::query(
                    r#"
                    INSERT INTO base_control_blip
                        (event_seq, timestamp, server_id, continent_id,
                         base_id, old_faction_id, new_faction_id)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(event.sequence)
                .bind(event.timestamp)
                .bind(event.server_id.get())
                .bind(event.continent_id.get())
                .bind(control.base_id.get())
                .bind(control.old_faction.id())
                .bind(control.new_faction.id())
                .execute(conn)
                .await?;
            }
            EventPayload::PlayerBlip(blip) => {
                sqlx::query(
                    r#"
                    INSERT INTO player_blip
                        (event_seq, timestamp, server_id, continent_id, player_id, base_id)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(event.sequence)
                .bind(event.timestamp)
                .bind(event.server_id.get())
                .bind(event.continent_id.get())
                .bind(blip.player_id.get())
                .bind(blip.base_id.get())
                .execute(conn)
                .await?;
            }
            EventPayload::ContinentAlert(alert) => {
                sqlx::query(
                    r#"
                    INSERT INTO continent_alert_blip
                        (event_seq, timestamp, server_id, continent_id, alert_id, phase)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(event.sequence)
                .bind(event.timestamp)
                .bind(event.server_id.get())
                .bind(event.continent_id.get())
                .bind(alert.alert_id.get())
                .bind(alert.phase.as_str())
                .execute(conn)
                .await?;
            }
        }
        Ok(())
    }

    fn row_to_ownership(row: &PgRow) -> Result<BaseOwnership> {
        let faction: i16 = row.try_get("owning_faction_id")?;
        Ok(BaseOwnership {
            server_id: row.try_get::<i32, _>("server_id")?.into(),
            base_id: row.try_get::<i32, _>("base_id")?.into(),
            continent_id: row.try_get::<i32, _>("continent_id")?.into(),
            owning_faction: Faction::try_from(faction).map_err(|e| {
                ProjectionError::CorruptRow {
                    table: "base_ownership",
                    reason: e.to_string(),
                }
            })?,
            owned_since: row.try_get("owned_since")?,
            event_sequence: row.try_get("event_seq")?,
        })
    }

    fn row_to_alert(row: &PgRow) -> Result<AlertRecord> {
        let state: String = row.try_get("state")?;
        Ok(AlertRecord {
            server_id: row.try_get::<i32, _>("server_id")?.into(),
            continent_id: row.try_get::<i32, _>("continent_id")?.into(),
            state: state
                .parse::<AlertState>()
                .map_err(|reason| ProjectionError::CorruptRow {
                    table: "continent_alert",
                    reason,
                })?,
            alert_id: row.try_get::<Option<i32>, _>("alert_id")?.map(Into::into),
            state_since: row.try_get("state_since")?,
            last_event_at: row.try_get("last_event_at")?,
            event_sequence: row.try_get("event_seq")?,
        })
    }
}

#[async_trait]
impl ProjectionStore for PostgresProjectionStore {
    #[tracing::instrument(skip(self, delta), fields(category = %delta.category, blips = delta.blips.len()))]
    async fn apply(&self, delta: &ProjectionDelta) -> Result<ApplyReport> {
        if delta.is_empty() {
            return Ok(ApplyReport::default());
        }

        with_deadline("apply", self.timeout, async {
            let mut tx = self.pool.begin().await?;
            let mut report = ApplyReport::default();

            for record in &delta.ownership {
                report.rows_updated += Self::upsert_ownership(&mut tx, record).await?;
            }
            for record in &delta.presence {
                report.rows_updated += Self::upsert_presence(&mut tx, record).await?;
            }
            // Returning early drops `tx`, which rolls it back.
            for change in &delta.alerts {
                report.rows_updated += Self::write_alert(&mut tx, change).await?;
            }
            for event in &delta.blips {
                Self::insert_blip(&mut tx, event).await?;
                report.blips_written += 1;
            }

            tx.commit().await?;
            Ok::<_, ProjectionError>(report)
        })
        .await
    }

    async fn load_alerts(&self, keys: &[ContinentKey]) -> Result<Vec<AlertRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let servers: Vec<i32> = keys.iter().map(|k| k.server_id.get()).collect();
        let continents: Vec<i32> = keys.iter().map(|k| k.continent_id.get()).collect();

        let rows = with_deadline("load_alerts", self.timeout, async {
            Ok::<_, ProjectionError>(
                sqlx::query(
                    r#"
                    SELECT a.server_id, a.continent_id, a.state, a.alert_id,
                           a.state_since, a.last_event_at, a.event_seq
                    FROM continent_alert a
                    JOIN UNNEST($1::INTEGER[], $2::INTEGER[]) AS k(server_id, continent_id)
                      ON a.server_id = k.server_id AND a.continent_id = k.continent_id
                    ORDER BY a.server_id, a.continent_id
                    "#,
                )
                .bind(&servers)
                .bind(&continents)
                .fetch_all(&self.pool)
                .await?,
            )
        })
        .await?;

        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn ownership(
        &self,
        server_id: ServerId,
        base_id: BaseId,
    ) -> Result<Option<BaseOwnership>> {
        let row = with_deadline("ownership", self.timeout, async {
            Ok::<_, ProjectionError>(
                sqlx::query(
                    r#"
                    SELECT server_id, base_id, continent_id, owning_faction_id,
                           owned_since, event_seq
                    FROM base_ownership
                    WHERE server_id = $1 AND base_id = $2
                    "#,
                )
                .bind(server_id.get())
                .bind(base_id.get())
                .fetch_optional(&self.pool)
                .await?,
            )
        })
        .await?;

        row.as_ref().map(Self::row_to_ownership).transpose()
    }

    async fn ownerships(&self, server_id: ServerId) -> Result<Vec<BaseOwnership>> {
        let rows = with_deadline("ownerships", self.timeout, async {
            Ok::<_, ProjectionError>(
                sqlx::query(
                    r#"
                    SELECT server_id, base_id, continent_id, owning_faction_id,
                           owned_since, event_seq
                    FROM base_ownership
                    WHERE server_id = $1
                    ORDER BY base_id ASC
                    "#,
                )
                .bind(server_id.get())
                .fetch_all(&self.pool)
                .await?,
            )
        })
        .await?;

        rows.iter().map(Self::row_to_ownership).collect()
    }

    async fn presence_as_of(
        &self,
        server_id: ServerId,
        as_of: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<PlayerPresence>> {
        let rows = with_deadline("presence_as_of", self.timeout, async {
            Ok::<_, ProjectionError>(
                sqlx::query(
                    r#"
                    SELECT * FROM (
                        SELECT DISTINCT ON (player_id)
                               server_id, player_id, continent_id, base_id,
                               timestamp, event_seq
                        FROM player_blip
                        WHERE server_id = $1 AND timestamp <= $2
                        ORDER BY player_id, timestamp DESC, event_seq DESC
                    ) latest
                    WHERE latest.timestamp > $3
                    ORDER BY player_id ASC
                    "#,
                )
                .bind(server_id.get())
                .bind(as_of)
                .bind(presence_cutoff(as_of, window))
                .fetch_all(&self.pool)
                .await?,
            )
        })
        .await?;

        rows.iter()
            .map(|row| {
                Ok::<_, ProjectionError>(PlayerPresence {
                    server_id: row.try_get::<i32, _>("server_id")?.into(),
                    player_id: row.try_get::<i64, _>("player_id")?.into(),
                    continent_id: row.try_get::<i32, _>("continent_id")?.into(),
                    base_id: row.try_get::<i32, _>("base_id")?.into(),
                    last_seen: row.try_get("timestamp")?,
                    event_sequence: row.try_get("event_seq")?,
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn expire_alerts(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64> {
        let grace_secs = grace.num_milliseconds() as f64 / 1000.0;
        let expired = with_deadline("expire_alerts", self.timeout, async {
            Ok::<_, ProjectionError>(
                sqlx::query(
                    r#"
                    UPDATE continent_alert SET
                        state = 'inactive',
                        alert_id = NULL,
                        state_since = state_since + make_interval(secs => $2)
                    WHERE state = 'ending'
                      AND state_since + make_interval(secs => $2) <= $1
                    "#,
                )
                .bind(now)
                .bind(grace_secs)
                .execute(&self.pool)
                .await?
                .rows_affected(),
            )
        })
        .await?;

        if expired > 0 {
            tracing::info!(expired, "closed alert grace windows");
        }
        Ok(expired)
    }

    async fn blip_count(&self, category: EventCategory) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", Self::blip_table(category));
        let count: i64 = with_deadline("blip_count", self.timeout, async {
            Ok::<_, ProjectionError>(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
        })
        .await?;
        Ok(count.max(0) as u64)
    }
}
