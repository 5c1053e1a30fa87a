use crate::models::{NewEntry, QueueEntry, Status};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write was accepted but touched no rows.
    #[error("{operation} affected no rows")]
    WriteFailed { operation: &'static str },
    /// A stored code that maps to no known enum value.
    #[error("column {column} holds unknown code {value}")]
    InvalidColumn { column: &'static str, value: i64 },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of queue entries.
///
/// Every method maps to a single storage operation. The [`QueueProcessor`]
/// drives all state transitions; implementations only persist them.
///
/// [`QueueProcessor`]: crate::processor::QueueProcessor
#[async_trait]
pub trait JobStore: Send + Sync + Clone + 'static {
    /// Persist a new entry with status [`Status::Pending`] and return its id.
    async fn insert(&self, entry: &NewEntry) -> Result<i64, StoreError>;

    /// Set status and send date for exactly one row. Returns `false` when no
    /// row has that id.
    async fn update_status(
        &self,
        id: i64,
        status: Status,
        send_date: chrono::NaiveDate,
    ) -> Result<bool, StoreError>;

    /// Entries with the given status, highest priority first, then by id.
    /// Always empty for [`Status::Sent`].
    async fn select_by_status(&self, status: Status) -> Result<Vec<QueueEntry>, StoreError>;

    async fn count_grouped_by_status(&self) -> Result<BTreeMap<Status, u64>, StoreError>;

    /// Atomically move a row from `expected` to [`Status::InFlight`] and bump
    /// its attempt counter. Returns `false` if the row is no longer in
    /// `expected`.
    async fn claim(&self, id: i64, expected: Status) -> Result<bool, StoreError>;

    /// Move a claimed row back to `status` without touching its send date.
    async fn release(&self, id: i64, status: Status) -> Result<bool, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<QueueEntry>, StoreError>;

    /// Move every in-flight row to [`Status::Refused`] and return how many
    /// were moved.
    async fn reset_in_flight(&self) -> Result<u64, StoreError>;
}

/// In-memory [`JobStore`] for tests and embedding. Not durable.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Vec<QueueEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, entry: &NewEntry) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().await;
        let id = entries.last().map_or(1, |e| e.id + 1);
        entries.push(QueueEntry {
            id,
            insert_date: entry.insert_date,
            insert_user: entry.insert_user.clone(),
            send_date: None,
            status: Status::Pending,
            priority: entry.priority,
            attempts: 0,
            payload: entry.payload.clone(),
        });
        Ok(id)
    }

    async fn update_status(
        &self,
        id: i64,
        status: Status,
        send_date: chrono::NaiveDate,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.status = status;
                entry.send_date = Some(send_date);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn select_by_status(&self, status: Status) -> Result<Vec<QueueEntry>, StoreError> {
        if status == Status::Sent {
            return Ok(Vec::new());
        }

        let entries = self.entries.lock().await;
        let mut selected: Vec<QueueEntry> = entries
            .iter()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        selected.sort_by_key(|e| (e.priority, e.id));
        Ok(selected)
    }

    async fn count_grouped_by_status(&self) -> Result<BTreeMap<Status, u64>, StoreError> {
        let entries = self.entries.lock().await;
        let mut counts = BTreeMap::new();
        for entry in entries.iter() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn claim(&self, id: i64, expected: Status) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries
            .iter_mut()
            .find(|e| e.id == id && e.status == expected)
        {
            Some(entry) => {
                entry.status = Status::InFlight;
                entry.attempts += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, id: i64, status: Status) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries
            .iter_mut()
            .find(|e| e.id == id && e.status == Status::InFlight)
        {
            Some(entry) => {
                entry.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: i64) -> Result<Option<QueueEntry>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn reset_in_flight(&self) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        let mut moved = 0;
        for entry in entries
            .iter_mut()
            .filter(|e| e.status == Status::InFlight)
        {
            entry.status = Status::Refused;
            moved += 1;
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_forces_pending() {
        let store = MemoryStore::new();
        let a = store
            .insert(&NewEntry::new(day(), "tester", Priority::Low, "{}"))
            .await
            .unwrap();
        let b = store
            .insert(&NewEntry::new(day(), "tester", Priority::High, "{}"))
            .await
            .unwrap();
        assert_eq!((a, b), (1, 2));

        let entry = store.get(b).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::Pending);
        assert_eq!(entry.send_date, None);
        assert_eq!(entry.attempts, 0);
    }

    #[tokio::test]
    async fn test_select_orders_by_priority_then_id() {
        let store = MemoryStore::new();
        for priority in [Priority::Low, Priority::High, Priority::Medium, Priority::High] {
            store
                .insert(&NewEntry::new(day(), "tester", priority, "{}"))
                .await
                .unwrap();
        }

        let ids: Vec<i64> = store
            .select_by_status(Status::Pending)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[tokio::test]
    async fn test_select_sent_is_always_empty() {
        let store = MemoryStore::new();
        let id = store
            .insert(&NewEntry::new(day(), "tester", Priority::High, "{}"))
            .await
            .unwrap();
        store.update_status(id, Status::Sent, day()).await.unwrap();

        assert!(store.select_by_status(Status::Sent).await.unwrap().is_empty());
        assert_eq!(
            store.count_grouped_by_status().await.unwrap().get(&Status::Sent),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_update_missing_row_returns_false() {
        let store = MemoryStore::new();
        assert!(!store.update_status(42, Status::Sent, day()).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_is_conditional_on_expected_status() {
        let store = MemoryStore::new();
        let id = store
            .insert(&NewEntry::new(day(), "tester", Priority::Low, "{}"))
            .await
            .unwrap();

        assert!(store.claim(id, Status::Pending).await.unwrap());
        assert!(!store.claim(id, Status::Pending).await.unwrap());

        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.status, Status::InFlight);
        assert_eq!(entry.attempts, 1);

        assert!(store.release(id, Status::Pending).await.unwrap());
        assert!(!store.release(id, Status::Pending).await.unwrap());
        assert_eq!(store.get(id).await.unwrap().unwrap().send_date, None);
    }

    #[tokio::test]
    async fn test_reset_in_flight_moves_claims_to_refused() {
        let store = MemoryStore::new();
        let id = store
            .insert(&NewEntry::new(day(), "tester", Priority::Low, "{}"))
            .await
            .unwrap();
        store.claim(id, Status::Pending).await.unwrap();

        assert_eq!(store.reset_in_flight().await.unwrap(), 1);
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            Status::Refused
        );
    }
}
