//! Caller-facing queue operations: enqueue, dispatch, report.

use crate::codec;
use crate::compose::MessageComposer;
use crate::config::Config;
use crate::models::{DispatchOutcome, EmailPayload, EnqueueReceipt, NewEntry, Priority, Status};
use crate::processor::QueueProcessor;
use crate::report::{self, ReportLine};
use crate::store::{JobStore, StoreError};
use crate::transport::Transport;
use chrono::{Local, NaiveDate};

pub struct MailQueue<S: JobStore, T: Transport> {
    processor: QueueProcessor<S, T>,
    insert_user: String,
}

impl<S: JobStore, T: Transport> MailQueue<S, T> {
    pub fn new(store: S, transport: T, config: &Config) -> Self {
        let processor = QueueProcessor::new(
            store,
            transport,
            MessageComposer::new(config.defaults.clone()),
        )
        .send_date_policy(config.queue.send_date)
        .max_attempts(config.queue.max_attempts);

        Self {
            processor,
            insert_user: config.queue.insert_user.clone(),
        }
    }

    /// Identity recorded as `insert_user` on new jobs.
    pub fn insert_user(mut self, user: impl Into<String>) -> Self {
        self.insert_user = user.into();
        self
    }

    pub fn store(&self) -> &S {
        self.processor.store()
    }

    pub async fn enqueue(&self, payload: &EmailPayload, priority: Priority) -> EnqueueReceipt {
        self.enqueue_on(payload, priority, Local::now().date_naive())
            .await
    }

    /// Queue `payload` as a pending job dated `insert_date`. Failures are
    /// reported in the receipt, never swallowed.
    pub async fn enqueue_on(
        &self,
        payload: &EmailPayload,
        priority: Priority,
        insert_date: NaiveDate,
    ) -> EnqueueReceipt {
        let result = match codec::encode(payload) {
            Ok(encoded) => {
                let entry = NewEntry::new(insert_date, self.insert_user.clone(), priority, encoded);
                self.store().insert(&entry).await.map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(id) => {
                tracing::info!(job_id = id, %priority, "mail queued");
                EnqueueReceipt {
                    error_code: 0,
                    message: "mail queued".to_string(),
                    id: Some(id),
                }
            }
            Err(reason) => {
                tracing::error!(%priority, %reason, "mail could not be queued");
                EnqueueReceipt {
                    error_code: 1,
                    message: format!("mail could not be queued: {reason}"),
                    id: None,
                }
            }
        }
    }

    pub async fn dispatch(&self, status: Status) -> Result<Vec<DispatchOutcome>, StoreError> {
        self.processor.run_cycle(status).await
    }

    pub async fn dispatch_on(
        &self,
        status: Status,
        today: NaiveDate,
    ) -> Result<Vec<DispatchOutcome>, StoreError> {
        self.processor.run_cycle_on(status, today).await
    }

    pub async fn report(&self) -> Result<Vec<ReportLine>, StoreError> {
        report::summarize(self.store()).await
    }

    /// Return jobs stranded in flight by an interrupted cycle to the retry
    /// pool.
    pub async fn recover_in_flight(&self) -> Result<u64, StoreError> {
        let moved = self.store().reset_in_flight().await?;
        if moved > 0 {
            tracing::warn!(moved, "recovered in-flight jobs as refused");
        }
        Ok(moved)
    }
}
