use std::time::Duration;

use jobber::{
    job::payload::{NotificationPayload, OracleCallPayload},
    prelude::*,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,jobber=debug")),
        )
        .init();

    let system = JobSystem::from_env();
    system.queue().register_handler(
        JobType::NotificationSend,
        handler_fn(|payload, context: JobContext| async move {
            // Fail the first attempt to show a retry
            if context.attempt == 1 {
                return HandlerResult::Err("mail relay unavailable".into());
            }
            tracing::info!(?payload, "Delivered notification on attempt {}", context.attempt);
            HandlerResult::Ok(())
        }),
    );
    system.start();

    let receipt = system
        .enqueue(
            JobType::NotificationSend,
            NotificationPayload {
                recipient: "ops@example.com".to_owned(),
                subject: "Vault milestone reached".to_owned(),
                body: "Vault 42 unlocked its second tranche".to_owned(),
            }
            .into(),
            EnqueueOptions::default().with_max_attempts(2),
        )
        .unwrap();
    println!("Enqueued job {}", receipt.id);

    let receipt = system
        .enqueue(
            JobType::OracleCall,
            OracleCallPayload {
                oracle: "band".to_owned(),
                symbol: "XLM/USD".to_owned(),
                request_id: None,
            }
            .into(),
            EnqueueOptions::default().with_delay(Duration::from_millis(500)),
        )
        .unwrap();
    println!("Enqueued job {} to run at {}", receipt.id, receipt.run_at);

    let request = EnqueueRequest::from_json(json!({
        "type": "email.blast",
        "payload": {},
    }));
    if let Err(err) = request {
        println!("Rejected request: {err}");
    }

    tokio::time::sleep(Duration::from_secs(3)).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&system.metrics()).unwrap()
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&system.health()).unwrap()
    );

    let report = system.stop().await;
    println!("Stopped, drained: {}", report.drained);
}
