use crate::models::{NewEntry, QueueEntry, Status};
use crate::store::{JobStore, StoreError};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

const ENTRY_COLUMNS: &str =
    "id, insert_date, insert_user, send_date, status, priority, attempts, payload";

/// Raw `mail_queue` row. Enum columns stay integers until checked.
#[derive(sqlx::FromRow)]
struct EntryRow {
    id: i64,
    insert_date: NaiveDate,
    insert_user: String,
    send_date: Option<NaiveDate>,
    status: i64,
    priority: i64,
    attempts: i64,
    payload: String,
}

impl TryFrom<EntryRow> for QueueEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(QueueEntry {
            id: row.id,
            insert_date: row.insert_date,
            insert_user: row.insert_user,
            send_date: row.send_date,
            status: code_column("status", row.status)?,
            priority: code_column("priority", row.priority)?,
            attempts: row.attempts,
            payload: row.payload,
        })
    }
}

fn code_column<T: TryFrom<i64>>(column: &'static str, value: i64) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::InvalidColumn { column, value })
}

/// SQLite-backed [`JobStore`].
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    /// A private in-memory database. The pool is pinned to one connection
    /// that never expires, since each SQLite connection would otherwise see
    /// its own empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for Database {
    async fn insert(&self, entry: &NewEntry) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO mail_queue (insert_date, insert_user, status, priority, attempts, payload)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(entry.insert_date)
        .bind(&entry.insert_user)
        .bind(Status::Pending)
        .bind(entry.priority)
        .bind(&entry.payload)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WriteFailed {
                operation: "insert",
            });
        }
        Ok(result.last_insert_rowid())
    }

    async fn update_status(
        &self,
        id: i64,
        status: Status,
        send_date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE mail_queue SET status = ?, send_date = ? WHERE id = ?")
            .bind(status)
            .bind(send_date)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn select_by_status(&self, status: Status) -> Result<Vec<QueueEntry>, StoreError> {
        if status == Status::Sent {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM mail_queue
             WHERE status = ?
             ORDER BY priority ASC, id ASC"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    async fn count_grouped_by_status(&self) -> Result<BTreeMap<Status, u64>, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS nums FROM mail_queue GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let status: Status = code_column("status", row.try_get("status")?)?;
            let nums: i64 = row.try_get("nums")?;
            counts.insert(status, nums.max(0) as u64);
        }
        Ok(counts)
    }

    async fn claim(&self, id: i64, expected: Status) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE mail_queue SET status = ?, attempts = attempts + 1
             WHERE id = ? AND status = ?",
        )
        .bind(Status::InFlight)
        .bind(id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, id: i64, status: Status) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE mail_queue SET status = ? WHERE id = ? AND status = ?")
            .bind(status)
            .bind(id)
            .bind(Status::InFlight)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: i64) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM mail_queue WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueueEntry::try_from).transpose()
    }

    async fn reset_in_flight(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE mail_queue SET status = ? WHERE status = ?")
            .bind(Status::Refused)
            .bind(Status::InFlight)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    async fn seeded(priorities: &[Priority]) -> (Database, Vec<i64>) {
        let db = Database::in_memory().await.unwrap();
        let mut ids = Vec::new();
        for &priority in priorities {
            let id = db
                .insert(&NewEntry::new(day(), "tester", priority, r#"{"version":1}"#))
                .await
                .unwrap();
            ids.push(id);
        }
        (db, ids)
    }

    #[tokio::test]
    async fn test_insert_roundtrips_row() {
        let (db, ids) = seeded(&[Priority::Medium]).await;
        let entry = db.get(ids[0]).await.unwrap().unwrap();

        assert_eq!(entry.insert_date, day());
        assert_eq!(entry.insert_user, "tester");
        assert_eq!(entry.status, Status::Pending);
        assert_eq!(entry.priority, Priority::Medium);
        assert_eq!(entry.send_date, None);
        assert_eq!(entry.payload, r#"{"version":1}"#);
    }

    #[tokio::test]
    async fn test_select_pending_orders_by_priority() {
        let (db, ids) = seeded(&[Priority::Low, Priority::High, Priority::Medium]).await;

        let selected: Vec<i64> = db
            .select_by_status(Status::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(selected, vec![ids[1], ids[2], ids[0]]);
    }

    #[tokio::test]
    async fn test_equal_priorities_keep_insertion_order() {
        let (db, ids) =
            seeded(&[Priority::Low, Priority::High, Priority::Low, Priority::High]).await;

        let selected: Vec<i64> = db
            .select_by_status(Status::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(selected, vec![ids[1], ids[3], ids[0], ids[2]]);
    }

    #[tokio::test]
    async fn test_unknown_status_code_is_invalid_column() {
        let (db, ids) = seeded(&[Priority::High]).await;
        sqlx::query("UPDATE mail_queue SET status = 9 WHERE id = ?")
            .bind(ids[0])
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(matches!(
            db.get(ids[0]).await,
            Err(StoreError::InvalidColumn {
                column: "status",
                value: 9
            })
        ));
        assert!(matches!(
            db.count_grouped_by_status().await,
            Err(StoreError::InvalidColumn {
                column: "status",
                value: 9
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_priority_code_is_invalid_column() {
        let (db, ids) = seeded(&[Priority::High]).await;
        sqlx::query("UPDATE mail_queue SET priority = 7 WHERE id = ?")
            .bind(ids[0])
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(matches!(
            db.select_by_status(Status::Pending).await,
            Err(StoreError::InvalidColumn {
                column: "priority",
                value: 7
            })
        ));
    }

    #[tokio::test]
    async fn test_select_sent_returns_nothing() {
        let (db, ids) = seeded(&[Priority::High, Priority::Low]).await;
        for id in &ids {
            assert!(db.update_status(*id, Status::Sent, day()).await.unwrap());
        }

        assert!(db.select_by_status(Status::Sent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_status_sets_send_date_and_reports_missing_rows() {
        let (db, ids) = seeded(&[Priority::High]).await;
        let later = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        assert!(db.update_status(ids[0], Status::Refused, later).await.unwrap());
        assert!(!db.update_status(999, Status::Refused, later).await.unwrap());

        let entry = db.get(ids[0]).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Refused);
        assert_eq!(entry.send_date, Some(later));
    }

    #[tokio::test]
    async fn test_claim_and_release() {
        let (db, ids) = seeded(&[Priority::High]).await;

        assert!(db.claim(ids[0], Status::Pending).await.unwrap());
        assert!(!db.claim(ids[0], Status::Pending).await.unwrap());
        assert!(db.select_by_status(Status::Pending).await.unwrap().is_empty());

        let entry = db.get(ids[0]).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::InFlight);
        assert_eq!(entry.attempts, 1);

        assert!(db.release(ids[0], Status::Pending).await.unwrap());
        let entry = db.get(ids[0]).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Pending);
        assert_eq!(entry.send_date, None);
    }

    #[tokio::test]
    async fn test_count_grouped_by_status() {
        let (db, ids) = seeded(&[Priority::High, Priority::Low, Priority::Low]).await;
        db.update_status(ids[0], Status::Sent, day()).await.unwrap();
        db.update_status(ids[1], Status::Refused, day()).await.unwrap();

        let counts = db.count_grouped_by_status().await.unwrap();
        assert_eq!(counts.get(&Status::Pending), Some(&1));
        assert_eq!(counts.get(&Status::Sent), Some(&1));
        assert_eq!(counts.get(&Status::Refused), Some(&1));
        assert_eq!(counts.get(&Status::InFlight), None);
    }

    #[tokio::test]
    async fn test_reset_in_flight() {
        let (db, ids) = seeded(&[Priority::High, Priority::Low]).await;
        db.claim(ids[0], Status::Pending).await.unwrap();

        assert_eq!(db.reset_in_flight().await.unwrap(), 1);
        assert_eq!(
            db.get(ids[0]).await.unwrap().unwrap().status,
            Status::Refused
        );
        assert_eq!(db.get(ids[1]).await.unwrap().unwrap().status, Status::Pending);
    }
}
