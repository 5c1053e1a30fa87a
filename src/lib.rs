//! Durable, priority-ordered outbound mail queue.
//!
//! Jobs are enqueued as [`models::EmailPayload`]s, stored through a
//! [`store::JobStore`] and delivered by [`processor::QueueProcessor`] cycles
//! that target either pending or previously refused jobs.

pub mod codec;
pub mod compose;
pub mod config;
pub mod db;
pub mod models;
pub mod processor;
pub mod queue;
pub mod report;
pub mod store;
pub mod transport;

pub use models::{DispatchOutcome, EmailPayload, EnqueueReceipt, Priority, QueueEntry, Status};
pub use queue::MailQueue;
