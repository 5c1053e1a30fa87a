//! Durable string form of [`EmailPayload`].
//!
//! Payloads are stored as a JSON object tagged with a schema version. Text is
//! written verbatim, so non-ASCII subjects and bodies stay readable in the
//! table. Rows written before versioning carry no `version` key and are read
//! as version 1.

use crate::models::EmailPayload;
use serde::{Deserialize, Serialize};

pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("payload cannot be encoded: {0}")]
    Unencodable(String),
}

#[derive(Serialize)]
struct VersionedRef<'a> {
    version: u32,
    #[serde(flatten)]
    payload: &'a EmailPayload,
}

#[derive(Deserialize)]
struct Versioned {
    #[serde(default = "legacy_version")]
    version: u32,
    #[serde(flatten)]
    payload: EmailPayload,
}

fn legacy_version() -> u32 {
    1
}

pub fn encode(payload: &EmailPayload) -> Result<String, PayloadError> {
    serde_json::to_string(&VersionedRef {
        version: PAYLOAD_VERSION,
        payload,
    })
    .map_err(|e| PayloadError::Unencodable(e.to_string()))
}

pub fn decode(raw: &str) -> Result<EmailPayload, PayloadError> {
    let stored: Versioned =
        serde_json::from_str(raw).map_err(|e| PayloadError::Malformed(e.to_string()))?;

    if stored.version > PAYLOAD_VERSION {
        return Err(PayloadError::Malformed(format!(
            "unsupported payload version {}",
            stored.version
        )));
    }
    Ok(stored.payload)
}
