use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lifecycle state of a queued job.
///
/// Stored as the integer discriminant. `Sent` is terminal; `InFlight` marks a
/// job claimed by a running dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[repr(i32)]
pub enum Status {
    Pending = 1,
    Sent = 2,
    Refused = 3,
    InFlight = 4,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::Sent,
        Status::Refused,
        Status::InFlight,
    ];

    /// Human-readable label used in queue reports.
    pub fn label(self) -> &'static str {
        match self {
            Status::Pending => "queued, awaiting dispatch",
            Status::Refused => "delivery failed",
            Status::Sent => "delivered successfully",
            Status::InFlight => "claimed, dispatch in progress",
        }
    }

    /// Whether a dispatch cycle may target this status.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Status::Pending | Status::Refused)
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i64> for Status {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Status::ALL
            .into_iter()
            .find(|s| i64::from(s.code()) == value)
            .ok_or_else(|| format!("unknown status code: {value}"))
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "1" => Ok(Status::Pending),
            "sent" | "2" => Ok(Status::Sent),
            "refused" | "3" => Ok(Status::Refused),
            "in_flight" | "inflight" | "4" => Ok(Status::InFlight),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Sent => write!(f, "sent"),
            Status::Refused => write!(f, "refused"),
            Status::InFlight => write!(f, "in_flight"),
        }
    }
}

/// Dequeue priority. Lower values are dispatched first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[repr(i32)]
pub enum Priority {
    High = 1,
    Medium = 2,
    #[default]
    Low = 3,
}

impl TryFrom<i64> for Priority {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(format!("unknown priority code: {other}")),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" | "1" => Ok(Priority::High),
            "medium" | "2" => Ok(Priority::Medium),
            "low" | "3" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// One row of the queue table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub insert_date: NaiveDate,
    pub insert_user: String,
    pub send_date: Option<NaiveDate>,
    pub status: Status,
    pub priority: Priority,
    pub attempts: i64,
    /// Encoded [`EmailPayload`], decoded only at send time.
    pub payload: String,
}

/// A job as submitted to the store. The store assigns the id and forces the
/// status to [`Status::Pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub insert_date: NaiveDate,
    pub insert_user: String,
    pub priority: Priority,
    pub payload: String,
}

impl NewEntry {
    pub fn new(
        insert_date: NaiveDate,
        insert_user: impl Into<String>,
        priority: Priority,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            insert_date,
            insert_user: insert_user.into(),
            priority,
            payload: payload.into(),
        }
    }
}

/// The structured email carried inside a queue entry.
///
/// Every field may be absent in storage; required fields are enforced when
/// the message is composed, not at enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Comma-separated list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", alias = "file")]
    pub attachments: Vec<PathBuf>,
}

impl EmailPayload {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        text_body: impl Into<String>,
    ) -> Self {
        Self {
            to: Some(to.into()),
            subject: Some(subject.into()),
            text_body: Some(text_body.into()),
            ..Self::default()
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc = Some(cc.into());
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }
}

/// Result of one job within a dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub job_id: i64,
    pub succeeded: bool,
    pub message: String,
}

impl DispatchOutcome {
    pub fn success(job_id: i64, message: impl Into<String>) -> Self {
        Self {
            job_id,
            succeeded: true,
            message: message.into(),
        }
    }

    pub fn failure(job_id: i64, message: impl Into<String>) -> Self {
        Self {
            job_id,
            succeeded: false,
            message: message.into(),
        }
    }
}

/// Structured result of an enqueue call. `error_code` is 0 on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub error_code: i32,
    pub message: String,
    pub id: Option<i64>,
}

impl EnqueueReceipt {
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_storage_values() {
        assert_eq!(Status::Pending.code(), 1);
        assert_eq!(Status::Sent.code(), 2);
        assert_eq!(Status::Refused.code(), 3);
        assert_eq!(Status::InFlight.code(), 4);
        assert_eq!(Status::try_from(3), Ok(Status::Refused));
        assert!(Status::try_from(9).is_err());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(Status::Pending.label(), "queued, awaiting dispatch");
        assert_eq!(Status::Refused.label(), "delivery failed");
        assert_eq!(Status::Sent.label(), "delivered successfully");
    }

    #[test]
    fn test_only_pending_and_refused_are_dispatchable() {
        assert!(Status::Pending.is_dispatchable());
        assert!(Status::Refused.is_dispatchable());
        assert!(!Status::Sent.is_dispatchable());
        assert!(!Status::InFlight.is_dispatchable());
    }

    #[test]
    fn test_priority_parsing_and_order() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert_eq!("2".parse::<Priority>(), Ok(Priority::Medium));
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::try_from(1), Ok(Priority::High));
        assert!(Priority::try_from(0).is_err());
        assert_eq!(Priority::default(), Priority::Low);
        assert!(Priority::High < Priority::Medium && Priority::Medium < Priority::Low);
    }
}
