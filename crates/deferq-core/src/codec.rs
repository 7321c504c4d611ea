//! TaskRecord <-> flat hash fields.
//!
//! Field set: `id, createTime, updateTime, nextTime, status, method, url`.
//! Everything is a string; timestamps are RFC 3339 in UTC with nanoseconds so
//! that a round trip is lossless, and status/method use their integer codes.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use thiserror::Error;

use crate::domain::{HttpMethod, TaskId, TaskRecord, TaskStatus};

pub const FIELD_ID: &str = "id";
pub const FIELD_CREATE_TIME: &str = "createTime";
pub const FIELD_UPDATE_TIME: &str = "updateTime";
pub const FIELD_NEXT_TIME: &str = "nextTime";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_METHOD: &str = "method";
pub const FIELD_URL: &str = "url";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value {value:?} for field `{field}`")]
    InvalidField { field: &'static str, value: String },
}

/// RFC 3339 only has four-digit years; later instants do not round-trip.
pub fn is_encodable(t: DateTime<Utc>) -> bool {
    (0..=9999).contains(&t.year())
}

pub fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// All fields of `record`, ready for an `HSET`.
pub fn encode(record: &TaskRecord) -> Vec<(String, String)> {
    vec![
        (FIELD_ID.to_string(), record.id.to_string()),
        (FIELD_CREATE_TIME.to_string(), encode_time(record.create_time)),
        (FIELD_UPDATE_TIME.to_string(), encode_time(record.update_time)),
        (FIELD_NEXT_TIME.to_string(), encode_time(record.next_time)),
        (FIELD_STATUS.to_string(), record.status.code().to_string()),
        (FIELD_METHOD.to_string(), record.method.code().to_string()),
        (FIELD_URL.to_string(), record.target.clone()),
    ]
}

/// Only the fields touched by a status transition.
pub fn encode_status(status: TaskStatus, update_time: DateTime<Utc>) -> Vec<(String, String)> {
    vec![
        (FIELD_STATUS.to_string(), status.code().to_string()),
        (FIELD_UPDATE_TIME.to_string(), encode_time(update_time)),
    ]
}

/// Decode an `HGETALL` reply. An empty map means the key does not exist.
pub fn decode(fields: &HashMap<String, String>) -> Result<Option<TaskRecord>, CodecError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let id = field(fields, FIELD_ID)?;
    let id = id
        .parse::<TaskId>()
        .map_err(|_| invalid(FIELD_ID, id))?;

    let status = field(fields, FIELD_STATUS)?;
    let status = status
        .parse::<u8>()
        .ok()
        .and_then(TaskStatus::from_code)
        .ok_or_else(|| invalid(FIELD_STATUS, status))?;

    let method = field(fields, FIELD_METHOD)?;
    let method = method
        .parse::<u8>()
        .ok()
        .and_then(HttpMethod::from_code)
        .ok_or_else(|| invalid(FIELD_METHOD, method))?;

    Ok(Some(TaskRecord {
        id,
        create_time: time_field(fields, FIELD_CREATE_TIME)?,
        update_time: time_field(fields, FIELD_UPDATE_TIME)?,
        next_time: time_field(fields, FIELD_NEXT_TIME)?,
        status,
        method,
        target: field(fields, FIELD_URL)?.to_string(),
    }))
}

fn field<'a>(
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, CodecError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(CodecError::MissingField(name))
}

fn time_field(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<DateTime<Utc>, CodecError> {
    let raw = field(fields, name)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid(name, raw))
}

fn invalid(field: &'static str, value: &str) -> CodecError {
    CodecError::InvalidField {
        field,
        value: value.to_string(),
    }
}
