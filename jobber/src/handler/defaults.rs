//! Placeholder handlers for each [`JobType`].
//!
//! These simulate a little latency and log what they would have done. Applications are expected
//! to register their own handlers in their place.
use std::time::Duration;

use async_trait::async_trait;

use crate::job::{
    payload::{AnalyticsScope, TriggerSource},
    JobContext, JobPayload, JobType,
};

use super::{Handler, HandlerRegistry, HandlerResult};

/// A registry with a logging placeholder handler for every [`JobType`].
pub fn default_registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with_handler(JobType::NotificationSend, NotificationHandler)
        .with_handler(JobType::DeadlineCheck, DeadlineCheckHandler)
        .with_handler(JobType::OracleCall, OracleCallHandler)
        .with_handler(JobType::AnalyticsRecompute, AnalyticsRecomputeHandler)
}

fn mismatched(expected: JobType, payload: &JobPayload) -> HandlerResult {
    Err(format!("{expected} handler received a {} payload", payload.job_type()).into())
}

pub struct NotificationHandler;

#[async_trait]
impl Handler for NotificationHandler {
    async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult {
        let JobPayload::NotificationSend(notification) = payload else {
            return mismatched(JobType::NotificationSend, payload);
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            attempt = context.attempt,
            "Sent notification to {}",
            notification.recipient,
        );
        Ok(())
    }
}

pub struct DeadlineCheckHandler;

#[async_trait]
impl Handler for DeadlineCheckHandler {
    async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult {
        let JobPayload::DeadlineCheck(check) = payload else {
            return mismatched(JobType::DeadlineCheck, payload);
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let target = check.vault_id.as_deref().unwrap_or("all-active-vaults");
        let source = match check.trigger_source {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduler => "scheduler",
        };
        tracing::info!(
            target_vault = target,
            deadline = check.deadline_iso.as_deref().unwrap_or("not-provided"),
            source,
            attempt = context.attempt,
            "Checked deadlines for {target}",
        );
        Ok(())
    }
}

pub struct OracleCallHandler;

#[async_trait]
impl Handler for OracleCallHandler {
    async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult {
        let JobPayload::OracleCall(call) = payload else {
            return mismatched(JobType::OracleCall, payload);
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        let request_id = call
            .request_id
            .clone()
            .unwrap_or_else(|| context.job_id.to_string());
        tracing::info!(
            oracle = %call.oracle,
            symbol = %call.symbol,
            %request_id,
            attempt = context.attempt,
            "Called oracle {} for {}",
            call.oracle,
            call.symbol,
        );
        Ok(())
    }
}

pub struct AnalyticsRecomputeHandler;

#[async_trait]
impl Handler for AnalyticsRecomputeHandler {
    async fn handle(&self, payload: &JobPayload, context: JobContext) -> HandlerResult {
        let JobPayload::AnalyticsRecompute(recompute) = payload else {
            return mismatched(JobType::AnalyticsRecompute, payload);
        };
        tokio::time::sleep(Duration::from_millis(120)).await;
        let scope = match recompute.scope {
            AnalyticsScope::Global => "global",
            AnalyticsScope::Vault => "vault",
            AnalyticsScope::User => "user",
        };
        tracing::info!(
            scope,
            entity = recompute.entity_id.as_deref().unwrap_or("all"),
            reason = recompute.reason.as_deref().unwrap_or("unspecified"),
            attempt = context.attempt,
            "Recomputed {scope} analytics",
        );
        Ok(())
    }
}
