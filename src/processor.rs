use crate::codec;
use crate::compose::MessageComposer;
use crate::config::SendDatePolicy;
use crate::models::{DispatchOutcome, QueueEntry, Status};
use crate::store::{JobStore, StoreError};
use crate::transport::Transport;
use chrono::{Local, NaiveDate};
use tracing::Instrument;

/// Runs dispatch cycles: selects jobs by status, delivers them one at a time
/// and records each terminal status.
///
/// Jobs are dispatched strictly in the order the store returns them
/// (priority, then id). There is no aging, so a steady stream of high
/// priority mail can starve low priority jobs.
pub struct QueueProcessor<S: JobStore, T: Transport> {
    store: S,
    transport: T,
    composer: MessageComposer,
    send_date: SendDatePolicy,
    max_attempts: Option<u32>,
}

impl<S: JobStore, T: Transport> QueueProcessor<S, T> {
    pub fn new(store: S, transport: T, composer: MessageComposer) -> Self {
        Self {
            store,
            transport,
            composer,
            send_date: SendDatePolicy::default(),
            max_attempts: None,
        }
    }

    pub fn send_date_policy(mut self, policy: SendDatePolicy) -> Self {
        self.send_date = policy;
        self
    }

    /// Refuse to send jobs that already used `max` attempts (default:
    /// unlimited). Such jobs still get a failed outcome and keep their status.
    pub fn max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Dispatch every job currently in `target`, dated today.
    pub async fn run_cycle(&self, target: Status) -> Result<Vec<DispatchOutcome>, StoreError> {
        self.run_cycle_on(target, Local::now().date_naive()).await
    }

    /// Dispatch every job currently in `target`, treating `today` as the
    /// dispatch date.
    ///
    /// Only the initial select can fail the cycle. Every selected job yields
    /// exactly one outcome, in processing order.
    pub async fn run_cycle_on(
        &self,
        target: Status,
        today: NaiveDate,
    ) -> Result<Vec<DispatchOutcome>, StoreError> {
        if !target.is_dispatchable() {
            tracing::warn!(status = %target, "status is not dispatchable, nothing to do");
            return Ok(Vec::new());
        }

        let jobs = self.store.select_by_status(target).await?;
        tracing::info!(status = %target, jobs = jobs.len(), "starting dispatch cycle");

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            if let Some(max) = self.max_attempts {
                if job.attempts >= i64::from(max) {
                    tracing::debug!(job_id = job.id, attempts = job.attempts, "attempt limit reached, skipping");
                    outcomes.push(DispatchOutcome::failure(
                        job.id,
                        format!("attempt limit reached ({} of {max})", job.attempts),
                    ));
                    continue;
                }
            }

            let span = tracing::info_span!("dispatch", job_id = job.id, priority = %job.priority);
            let outcome = self.dispatch(&job, target, today).instrument(span).await;
            outcomes.push(outcome);
        }

        let delivered = outcomes.iter().filter(|o| o.succeeded).count();
        tracing::info!(
            status = %target,
            delivered,
            failed = outcomes.len() - delivered,
            "dispatch cycle finished"
        );
        Ok(outcomes)
    }

    async fn dispatch(&self, job: &QueueEntry, target: Status, today: NaiveDate) -> DispatchOutcome {
        match self.store.claim(job.id, target).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = job.id, "job already claimed by another dispatcher");
                return DispatchOutcome::failure(job.id, "job already claimed by another dispatcher");
            }
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "failed to claim job");
                return DispatchOutcome::failure(job.id, format!("failed to claim job: {e}"));
            }
        }

        let payload = match codec::decode(&job.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "stored payload is unreadable");
                if let Err(release_err) = self.store.release(job.id, target).await {
                    tracing::error!(job_id = job.id, error = %release_err, "failed to release claim");
                }
                return DispatchOutcome::failure(job.id, e.to_string());
            }
        };

        let delivery = match self.composer.build(&payload) {
            Ok(message) => self
                .transport
                .send(&message)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let send_date = match self.send_date {
            SendDatePolicy::Dispatch => today,
            SendDatePolicy::Insert => job.insert_date,
        };
        let (status, mut outcome) = match delivery {
            Ok(()) => {
                tracing::info!(job_id = job.id, "mail delivered");
                (Status::Sent, DispatchOutcome::success(job.id, "mail delivered"))
            }
            Err(reason) => {
                tracing::warn!(job_id = job.id, %reason, "mail delivery failed");
                (
                    Status::Refused,
                    DispatchOutcome::failure(job.id, format!("mail delivery failed: {reason}")),
                )
            }
        };

        match self.store.update_status(job.id, status, send_date).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = job.id, %status, "job vanished before its status was recorded");
                outcome.message.push_str(" (status not recorded: job no longer exists)");
            }
            Err(e) => {
                tracing::error!(job_id = job.id, %status, error = %e, "failed to record status");
                outcome.message.push_str(&format!(" (status not recorded: {e})"));
            }
        }
        outcome
    }
}
