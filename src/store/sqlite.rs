use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::store::migrations::BASE_MIGRATION;
use crate::store::{RecordStore, StoreError};
use crate::types::{DelegationRecord, YearFilter};

const UPSERT_SQL: &str = r#"
INSERT INTO delegations(timestamp, amount, delegator, block)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(timestamp) DO UPDATE SET
    amount = excluded.amount,
    delegator = excluded.delegator,
    block = excluded.block
"#;

const SELECT_COLUMNS: &str = "SELECT timestamp, amount, delegator, block FROM delegations";

type RawRow = (i64, i64, String, String);

/// SQLite-backed [`RecordStore`]. Timestamps are stored as UTC microseconds.
///
/// Clones share one connection; every call runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened delegation store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(BASE_MIGRATION)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut *guard)
        })
        .await?
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(&self, records: &[DelegationRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let records = records.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
                for record in &records {
                    stmt.execute(params![
                        record.timestamp.timestamp_micros(),
                        amount_to_column(record.amount),
                        record.delegator,
                        record.block
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn latest(&self) -> Result<Option<DelegationRecord>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!("{SELECT_COLUMNS} ORDER BY timestamp DESC LIMIT 1");
            let raw = conn.query_row(&sql, [], read_row).optional()?;
            raw.map(decode_row).transpose()
        })
        .await
    }

    async fn query(
        &self,
        page: u64,
        page_size: u64,
        year: YearFilter,
    ) -> Result<Vec<DelegationRecord>, StoreError> {
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let offset = page.saturating_sub(1).saturating_mul(page_size);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let bounds = match year.bounds() {
            None => None,
            Some(None) => return Ok(Vec::new()),
            Some(Some((start, end))) => Some((start.timestamp_micros(), end.timestamp_micros())),
        };

        self.with_conn(move |conn| {
            let rows = if let Some((start, end)) = bounds {
                let sql = format!(
                    "{SELECT_COLUMNS} WHERE timestamp >= ?1 AND timestamp < ?2 \
                     ORDER BY timestamp DESC LIMIT ?3 OFFSET ?4"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map(params![start, end, limit, offset], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            } else {
                let sql = format!("{SELECT_COLUMNS} ORDER BY timestamp DESC LIMIT ?1 OFFSET ?2");
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map(params![limit, offset], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            rows.into_iter().map(decode_row).collect()
        })
        .await
    }

    async fn count(&self, year: YearFilter) -> Result<u64, StoreError> {
        let bounds = match year.bounds() {
            None => None,
            Some(None) => return Ok(0),
            Some(Some((start, end))) => Some((start.timestamp_micros(), end.timestamp_micros())),
        };

        self.with_conn(move |conn| {
            let total: i64 = match bounds {
                Some((start, end)) => conn.query_row(
                    "SELECT COUNT(*) FROM delegations WHERE timestamp >= ?1 AND timestamp < ?2",
                    params![start, end],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM delegations", [], |row| row.get(0))?,
            };
            Ok(u64::try_from(total).unwrap_or(0))
        })
        .await
    }
}

// Bit-for-bit in the signed column; past i64::MAX reads negative in raw SQL.
fn amount_to_column(amount: u64) -> i64 {
    amount as i64
}

fn amount_from_column(amount: i64) -> u64 {
    amount as u64
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_row((micros, amount, delegator, block): RawRow) -> Result<DelegationRecord, StoreError> {
    let timestamp: DateTime<Utc> = Utc
        .timestamp_micros(micros)
        .single()
        .ok_or(StoreError::InvalidTimestamp(micros))?;
    Ok(DelegationRecord {
        timestamp,
        amount: amount_from_column(amount),
        delegator,
        block,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use super::SqliteStore;
    use crate::store::RecordStore;
    use crate::types::{DelegationRecord, YearFilter};

    fn record(y: i32, m: u32, d: u32, h: u32, delegator: &str, amount: u64) -> DelegationRecord {
        DelegationRecord::new(
            Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(),
            amount,
            delegator,
            format!("block-{delegator}"),
        )
    }

    /// One record per hour on 2023-01-01, oldest first.
    fn hourly(count: u32) -> Vec<DelegationRecord> {
        (0..count)
            .map(|h| record(2023, 1, 1, h, &format!("tz{h}"), u64::from(h) * 10))
            .collect()
    }

    #[tokio::test]
    async fn latest_on_empty_store_is_none() {
        let store = SqliteStore::open_in_memory().expect("open store");
        assert!(store.latest().await.expect("latest").is_none());
        assert_eq!(store.count(YearFilter::ALL).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn empty_upsert_is_a_noop() {
        let store = SqliteStore::open_in_memory().expect("open store");
        store.upsert(&[]).await.expect("upsert");
        assert_eq!(store.count(YearFilter::ALL).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn upsert_twice_leaves_same_state() {
        let store = SqliteStore::open_in_memory().expect("open store");
        let batch = vec![
            record(2023, 5, 1, 17, "tz2", 100),
            record(2023, 5, 1, 16, "tz1", 100),
        ];
        store.upsert(&batch).await.expect("first upsert");
        let once = store.query(1, 100, YearFilter::ALL).await.expect("query");
        store.upsert(&batch).await.expect("second upsert");
        let twice = store.query(1, 100, YearFilter::ALL).await.expect("query");

        assert_eq!(once, twice);
        assert_eq!(store.count(YearFilter::ALL).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn upsert_replaces_record_with_same_timestamp() {
        let store = SqliteStore::open_in_memory().expect("open store");
        store
            .upsert(&[record(2023, 5, 1, 16, "tz1", 100)])
            .await
            .expect("upsert");
        let replacement = DelegationRecord::new(
            Utc.with_ymd_and_hms(2023, 5, 1, 16, 0, 0).unwrap(),
            250,
            "tz9",
            "b9",
        );
        store
            .upsert(std::slice::from_ref(&replacement))
            .await
            .expect("upsert");

        assert_eq!(store.count(YearFilter::ALL).await.expect("count"), 1);
        assert_eq!(store.latest().await.expect("latest"), Some(replacement));
    }

    #[tokio::test]
    async fn latest_is_max_timestamp_regardless_of_insert_order() {
        let store = SqliteStore::open_in_memory().expect("open store");
        store
            .upsert(&[
                record(2023, 5, 1, 16, "tz1", 100),
                record(2023, 5, 1, 17, "tz2", 100),
                record(2021, 1, 1, 9, "tz0", 5),
            ])
            .await
            .expect("upsert");

        let latest = store.latest().await.expect("latest").expect("some record");
        assert_eq!(latest.delegator, "tz2");
    }

    #[tokio::test]
    async fn query_pages_newest_first_within_bounds() {
        let store = SqliteStore::open_in_memory().expect("open store");
        store.upsert(&hourly(5)).await.expect("upsert");

        let first = store.query(1, 2, YearFilter::ALL).await.expect("page 1");
        let second = store.query(2, 2, YearFilter::ALL).await.expect("page 2");
        let third = store.query(3, 2, YearFilter::ALL).await.expect("page 3");
        let beyond = store.query(4, 2, YearFilter::ALL).await.expect("page 4");

        let names = |page: &[DelegationRecord]| {
            page.iter().map(|r| r.delegator.clone()).collect::<Vec<_>>()
        };
        assert_eq!(names(&first), ["tz4", "tz3"]);
        assert_eq!(names(&second), ["tz2", "tz1"]);
        assert_eq!(names(&third), ["tz0"]);
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn huge_page_returns_empty_instead_of_overflowing() {
        let store = SqliteStore::open_in_memory().expect("open store");
        store.upsert(&hourly(3)).await.expect("upsert");
        let page = store
            .query(u64::MAX, u64::MAX, YearFilter::ALL)
            .await
            .expect("query");
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn year_filter_restricts_query_and_count() {
        let store = SqliteStore::open_in_memory().expect("open store");
        store
            .upsert(&[
                record(2023, 3, 1, 12, "tz2023", 1),
                record(2021, 7, 1, 12, "tz2021", 2),
            ])
            .await
            .expect("upsert");

        let filter = YearFilter::from_param(2021);
        let page = store.query(1, 100, filter).await.expect("query");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].delegator, "tz2021");
        assert_eq!(store.count(filter).await.expect("count"), 1);

        let empty_year = YearFilter::from_param(1999);
        assert!(store.query(1, 100, empty_year).await.expect("query").is_empty());
        assert_eq!(store.count(empty_year).await.expect("count"), 0);
        assert_eq!(store.count(YearFilter::ALL).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn year_boundaries_use_utc() {
        let store = SqliteStore::open_in_memory().expect("open store");
        let last_second = DelegationRecord::new(
            Utc.with_ymd_and_hms(2021, 12, 31, 23, 59, 59).unwrap(),
            1,
            "tz-late",
            "b1",
        );
        let first_second = DelegationRecord::new(
            Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            1,
            "tz-early",
            "b2",
        );
        store
            .upsert(&[last_second.clone(), first_second.clone()])
            .await
            .expect("upsert");

        let in_2021 = store
            .query(1, 10, YearFilter::from_param(2021))
            .await
            .expect("query");
        let in_2022 = store
            .query(1, 10, YearFilter::from_param(2022))
            .await
            .expect("query");
        assert_eq!(in_2021, vec![last_second]);
        assert_eq!(in_2022, vec![first_second]);
    }

    #[tokio::test]
    async fn amounts_round_trip_across_full_u64_range() {
        let store = SqliteStore::open_in_memory().expect("open store");
        let amounts = [0, 1, i64::MAX as u64, i64::MAX as u64 + 1, u64::MAX];
        let records: Vec<_> = amounts
            .iter()
            .enumerate()
            .map(|(hour, amount)| record(2023, 1, 1, hour as u32, "tz1", *amount))
            .collect();
        store.upsert(&records).await.expect("upsert");

        let mut stored: Vec<u64> = store
            .query(1, 10, YearFilter::ALL)
            .await
            .expect("query")
            .into_iter()
            .map(|r| r.amount)
            .collect();
        stored.reverse();
        assert_eq!(stored, amounts);
        let latest = store.latest().await.expect("latest").expect("some record");
        assert_eq!(latest.amount, u64::MAX);
    }

    #[tokio::test]
    async fn on_disk_store_persists_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/delegations.db");

        let store = SqliteStore::open(&path).expect("open store");
        store.upsert(&hourly(3)).await.expect("upsert");
        drop(store);

        let reopened = SqliteStore::open(&path).expect("reopen store");
        assert_eq!(reopened.count(YearFilter::ALL).await.expect("count"), 3);
        let latest = reopened.latest().await.expect("latest").expect("some record");
        assert_eq!(latest.delegator, "tz2");
    }
}
