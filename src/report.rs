use crate::models::Status;
use crate::store::{JobStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub status: Status,
    pub label: &'static str,
    pub count: u64,
}

/// Job counts per status, labelled for operators. Only statuses present in
/// the store are listed, ordered by status code.
pub async fn summarize(store: &impl JobStore) -> Result<Vec<ReportLine>, StoreError> {
    let counts = store.count_grouped_by_status().await?;
    Ok(counts
        .into_iter()
        .map(|(status, count)| ReportLine {
            status,
            label: status.label(),
            count,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewEntry, Priority};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_empty_store_has_empty_report() {
        assert!(summarize(&MemoryStore::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counts_follow_status_changes() {
        let store = MemoryStore::new();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(
                store
                    .insert(&NewEntry::new(day, "tester", Priority::Low, "{}"))
                    .await
                    .unwrap(),
            );
        }
        store.update_status(ids[0], Status::Sent, day).await.unwrap();
        store.update_status(ids[1], Status::Sent, day).await.unwrap();
        store.update_status(ids[2], Status::Refused, day).await.unwrap();

        let report = summarize(&store).await.unwrap();
        assert_eq!(
            report,
            vec![
                ReportLine {
                    status: Status::Pending,
                    label: "queued, awaiting dispatch",
                    count: 2,
                },
                ReportLine {
                    status: Status::Sent,
                    label: "delivered successfully",
                    count: 2,
                },
                ReportLine {
                    status: Status::Refused,
                    label: "delivery failed",
                    count: 1,
                },
            ]
        );
    }
}
