//! Validation of enqueue requests arriving as untyped JSON, e.g. from an HTTP body of the form
//! `{"type": "...", "payload": {...}, "delayMs": 0, "maxAttempts": 3}`.
use serde_json::Value;

use crate::QueueError;

use super::{EnqueueOptions, JobPayload, JobType};

/// The largest `maxAttempts` a request may ask for.
pub const MAX_ATTEMPTS_LIMIT: u16 = 10;

/// A fully validated request to enqueue a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub payload: JobPayload,
    pub options: EnqueueOptions,
}

impl EnqueueRequest {
    /// Validates a JSON body, checking in order: the body shape, the job type, the payload shape
    /// for that type, and finally the options.
    pub fn from_json(body: Value) -> Result<Self, QueueError> {
        let Value::Object(mut body) = body else {
            return Err(QueueError::InvalidBody);
        };

        let job_type = match body.get("type") {
            Some(Value::String(tag)) => tag.parse::<JobType>()?,
            Some(other) => return Err(QueueError::UnknownJobType(other.to_string())),
            None => return Err(QueueError::UnknownJobType(String::new())),
        };

        let payload = JobPayload::from_parts(job_type, body.remove("payload").unwrap_or_default())?;
        payload.validate()?;

        let options = EnqueueOptions {
            delay_ms: body.get("delayMs").map(parse_delay).transpose()?,
            max_attempts: body.get("maxAttempts").map(parse_max_attempts).transpose()?,
        };

        Ok(Self { payload, options })
    }

    /// Decodes and validates a raw JSON body.
    pub fn from_slice(body: &[u8]) -> Result<Self, QueueError> {
        Self::from_json(serde_json::from_slice(body)?)
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }
}

fn parse_delay(value: &Value) -> Result<u64, QueueError> {
    value
        .as_f64()
        .filter(|delay| delay.is_finite() && *delay >= 0.0)
        .map(|delay| delay.floor() as u64)
        .ok_or_else(|| QueueError::InvalidOptions(format!("delayMs must be >= 0, got {value}")))
}

fn parse_max_attempts(value: &Value) -> Result<u16, QueueError> {
    value
        .as_f64()
        .filter(|attempts| {
            attempts.fract() == 0.0 && (1.0..=f64::from(MAX_ATTEMPTS_LIMIT)).contains(attempts)
        })
        .map(|attempts| attempts as u16)
        .ok_or_else(|| {
            QueueError::InvalidOptions(format!(
                "maxAttempts must be an integer from 1 to {MAX_ATTEMPTS_LIMIT}, got {value}"
            ))
        })
}
