//! Payload shapes for each [`JobType`].
use serde::{Deserialize, Serialize};

use crate::QueueError;

use super::JobType;

/// The data a job carries, one variant per [`JobType`].
///
/// Serialised adjacently tagged, i.e. `{"type": "oracle.call", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum JobPayload {
    #[serde(rename = "notification.send")]
    NotificationSend(NotificationPayload),
    #[serde(rename = "deadline.check")]
    DeadlineCheck(DeadlineCheckPayload),
    #[serde(rename = "oracle.call")]
    OracleCall(OracleCallPayload),
    #[serde(rename = "analytics.recompute")]
    AnalyticsRecompute(AnalyticsRecomputePayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineCheckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_iso: Option<String>,
    pub trigger_source: TriggerSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Scheduler,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleCallPayload {
    pub oracle: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecomputePayload {
    pub scope: AnalyticsScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsScope {
    Global,
    Vault,
    User,
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::NotificationSend(_) => JobType::NotificationSend,
            Self::DeadlineCheck(_) => JobType::DeadlineCheck,
            Self::OracleCall(_) => JobType::OracleCall,
            Self::AnalyticsRecompute(_) => JobType::AnalyticsRecompute,
        }
    }

    /// Decode the payload for a given job type from raw JSON.
    pub fn from_parts(job_type: JobType, payload: serde_json::Value) -> Result<Self, QueueError> {
        let invalid = |err: serde_json::Error| QueueError::InvalidPayload {
            job_type,
            reason: err.to_string(),
        };
        let payload = match job_type {
            JobType::NotificationSend => {
                Self::NotificationSend(serde_json::from_value(payload).map_err(invalid)?)
            }
            JobType::DeadlineCheck => {
                Self::DeadlineCheck(serde_json::from_value(payload).map_err(invalid)?)
            }
            JobType::OracleCall => {
                Self::OracleCall(serde_json::from_value(payload).map_err(invalid)?)
            }
            JobType::AnalyticsRecompute => {
                Self::AnalyticsRecompute(serde_json::from_value(payload).map_err(invalid)?)
            }
        };
        Ok(payload)
    }

    /// Checks the constraints the type system cannot express, i.e. required strings being
    /// non-blank.
    pub fn validate(&self) -> Result<(), QueueError> {
        let job_type = self.job_type();
        let required = |field: &'static str, value: &str| {
            if value.trim().is_empty() {
                Err(QueueError::InvalidPayload {
                    job_type,
                    reason: format!("`{field}` must be a non-empty string"),
                })
            } else {
                Ok(())
            }
        };

        match self {
            Self::NotificationSend(payload) => {
                required("recipient", &payload.recipient)?;
                required("subject", &payload.subject)?;
                required("body", &payload.body)
            }
            Self::OracleCall(payload) => {
                required("oracle", &payload.oracle)?;
                required("symbol", &payload.symbol)
            }
            Self::DeadlineCheck(_) | Self::AnalyticsRecompute(_) => Ok(()),
        }
    }
}

impl From<NotificationPayload> for JobPayload {
    fn from(value: NotificationPayload) -> Self {
        Self::NotificationSend(value)
    }
}

impl From<DeadlineCheckPayload> for JobPayload {
    fn from(value: DeadlineCheckPayload) -> Self {
        Self::DeadlineCheck(value)
    }
}

impl From<OracleCallPayload> for JobPayload {
    fn from(value: OracleCallPayload) -> Self {
        Self::OracleCall(value)
    }
}

impl From<AnalyticsRecomputePayload> for JobPayload {
    fn from(value: AnalyticsRecomputePayload) -> Self {
        Self::AnalyticsRecompute(value)
    }
}
