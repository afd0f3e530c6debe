use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::debug;
use webrec_core::{DataSource, Occurrence, OccurrenceStatus, RawPayload};

use crate::store::{
    validate_occurrence, OccurrenceStore, StoreError, StoredOccurrence, SyncHistoryEntry,
    SyncRunStatus,
};

const UPSERT_OCCURRENCE_SQL: &str = r#"
    INSERT INTO webinar_occurrences (
        account_id, webinar_id, occurrence_id, webinar_uuid, topic,
        scheduled_start, scheduled_duration_minutes,
        actual_start, actual_duration_minutes, end_time,
        status, registrants_count, participants_count,
        data_source, is_historical, raw_payload
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
    ON CONFLICT (account_id, webinar_id, occurrence_id) DO UPDATE SET
        webinar_uuid = EXCLUDED.webinar_uuid,
        topic = EXCLUDED.topic,
        scheduled_start = EXCLUDED.scheduled_start,
        scheduled_duration_minutes = EXCLUDED.scheduled_duration_minutes,
        actual_start = EXCLUDED.actual_start,
        actual_duration_minutes = EXCLUDED.actual_duration_minutes,
        end_time = EXCLUDED.end_time,
        status = EXCLUDED.status,
        registrants_count = EXCLUDED.registrants_count,
        participants_count = EXCLUDED.participants_count,
        data_source = EXCLUDED.data_source,
        is_historical = EXCLUDED.is_historical,
        raw_payload = EXCLUDED.raw_payload,
        updated_at = now()
    RETURNING created_at, updated_at
"#;

const SELECT_OCCURRENCES_SQL: &str = r#"
    SELECT account_id, webinar_id, occurrence_id, webinar_uuid, topic,
           scheduled_start, scheduled_duration_minutes,
           actual_start, actual_duration_minutes, end_time,
           status, registrants_count, participants_count,
           data_source, is_historical, raw_payload,
           created_at, updated_at
      FROM webinar_occurrences
     WHERE account_id = $1
     ORDER BY webinar_id, scheduled_start NULLS LAST, occurrence_id
"#;

/// Credentials row linking a dashboard owner to a platform account.
#[derive(Debug, Clone)]
pub struct PlatformConnection {
    pub owner_id: String,
    pub account_id: String,
    pub platform_user_id: String,
    pub access_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PgOccurrenceStore {
    pool: PgPool,
}

impl PgOccurrenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn find_connection(
        &self,
        owner_id: &str,
    ) -> Result<Option<PlatformConnection>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, account_id, platform_user_id, access_token, token_expires_at
              FROM platform_connections
             WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok::<_, StoreError>(PlatformConnection {
                owner_id: row.try_get("owner_id")?,
                account_id: row.try_get("account_id")?,
                platform_user_id: row.try_get("platform_user_id")?,
                access_token: row.try_get("access_token")?,
                token_expires_at: row.try_get("token_expires_at")?,
            })
        })
        .transpose()
    }
}

fn count_to_db(count: u32) -> i64 {
    i64::from(count)
}

fn count_from_db(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn occurrence_from_row(row: &PgRow) -> Result<StoredOccurrence, StoreError> {
    let status: String = row.try_get("status")?;
    let data_source: String = row.try_get("data_source")?;
    let data_source = DataSource::parse(&data_source)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown data_source {data_source:?}")))?;
    let Json(raw_payload): Json<RawPayload> = row.try_get("raw_payload")?;

    Ok(StoredOccurrence {
        occurrence: Occurrence {
            account_id: row.try_get("account_id")?,
            webinar_id: row.try_get("webinar_id")?,
            occurrence_id: row.try_get("occurrence_id")?,
            webinar_uuid: row.try_get("webinar_uuid")?,
            topic: row.try_get("topic")?,
            scheduled_start: row.try_get("scheduled_start")?,
            scheduled_duration_minutes: row.try_get("scheduled_duration_minutes")?,
            actual_start: row.try_get("actual_start")?,
            actual_duration_minutes: row.try_get("actual_duration_minutes")?,
            end_time: row.try_get("end_time")?,
            status: OccurrenceStatus::from_stored(&status),
            registrants_count: count_from_db(row.try_get("registrants_count")?),
            participants_count: count_from_db(row.try_get("participants_count")?),
            data_source,
            is_historical: row.try_get("is_historical")?,
            raw_payload,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl OccurrenceStore for PgOccurrenceStore {
    async fn upsert_occurrence(
        &self,
        occurrence: &Occurrence,
    ) -> Result<StoredOccurrence, StoreError> {
        validate_occurrence(occurrence)?;
        let row = sqlx::query(UPSERT_OCCURRENCE_SQL)
            .bind(&occurrence.account_id)
            .bind(&occurrence.webinar_id)
            .bind(&occurrence.occurrence_id)
            .bind(&occurrence.webinar_uuid)
            .bind(&occurrence.topic)
            .bind(occurrence.scheduled_start)
            .bind(occurrence.scheduled_duration_minutes)
            .bind(occurrence.actual_start)
            .bind(occurrence.actual_duration_minutes)
            .bind(occurrence.end_time)
            .bind(occurrence.status.as_str())
            .bind(count_to_db(occurrence.registrants_count))
            .bind(count_to_db(occurrence.participants_count))
            .bind(occurrence.data_source.tag())
            .bind(occurrence.is_historical)
            .bind(Json(&occurrence.raw_payload))
            .fetch_one(&self.pool)
            .await?;

        debug!(
            account_id = %occurrence.account_id,
            webinar_id = %occurrence.webinar_id,
            occurrence_id = %occurrence.occurrence_id,
            "upserted occurrence"
        );

        Ok(StoredOccurrence {
            occurrence: occurrence.clone(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn list_occurrences(
        &self,
        account_id: &str,
    ) -> Result<Vec<StoredOccurrence>, StoreError> {
        let rows = sqlx::query(SELECT_OCCURRENCES_SQL)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(occurrence_from_row).collect()
    }

    async fn record_sync_run(&self, entry: &SyncHistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_history
                (run_id, account_id, status, items_synced, summary, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.run_id)
        .bind(&entry.account_id)
        .bind(entry.status.as_str())
        .bind(count_to_db(entry.items_synced))
        .bind(&entry.summary)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_sync_runs(&self, account_id: &str) -> Result<Vec<SyncHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, account_id, status, items_synced, summary, started_at, finished_at
              FROM sync_history
             WHERE account_id = $1
             ORDER BY started_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            out.push(SyncHistoryEntry {
                run_id: row.try_get("run_id")?,
                account_id: row.try_get("account_id")?,
                status: SyncRunStatus::parse(&status)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown sync status {status:?}")))?,
                items_synced: count_from_db(row.try_get("items_synced")?),
                summary: row.try_get("summary")?,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
            });
        }
        Ok(out)
    }
}
