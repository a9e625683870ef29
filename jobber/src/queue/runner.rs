use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::time::Instant;
use tracing::instrument;

use crate::{handler::Handler, job::Job};

use super::{state::duration_ms, JobQueue};

pub(crate) const UNKNOWN_ERROR: &str = "Unknown error";

impl JobQueue {
    #[instrument(
        skip_all,
        fields(job_id = %job.id, job_type = %job.job_type(), attempt = job.attempt),
    )]
    pub(crate) async fn execute_job(self, mut job: Job, handler: Arc<dyn Handler>) {
        let job_id = job.id;
        tracing::debug!(%job_id, "Executing job {job_id}");

        let started = Instant::now();
        let result = AssertUnwindSafe(handler.handle(&job.payload, job.context()))
            .catch_unwind()
            .await;
        let elapsed = duration_ms(started.elapsed());

        let outcome = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error_message(error.to_string())),
            Err(panic) => Err(panic_message(panic)),
        };

        let running = {
            let mut state = self.state();
            state.active.remove(&job_id);
            match outcome {
                Ok(()) => {
                    tracing::debug!(%job_id, elapsed_ms = elapsed, "Job complete {job_id}");
                    state.mark_job_complete(&job, elapsed);
                }
                Err(error) if job.is_final_attempt() => {
                    tracing::error!(
                        %job_id,
                        %error,
                        "Job {job_id} failed and will be discarded after {} attempts: {error}",
                        job.attempt,
                    );
                    state.mark_job_discarded(&job, error);
                }
                Err(error) => {
                    let delay = self.config().retry_delay(job.attempt);
                    tracing::warn!(
                        %job_id,
                        %error,
                        "Job {job_id} failed and will be retried in {delay:?}: {error}",
                    );
                    job.schedule_in(delay);
                    state.mark_job_retryable(job);
                }
            }
            state.running
        };

        if running {
            self.dispatch();
        }
    }
}

fn error_message(message: String) -> String {
    if message.trim().is_empty() {
        UNKNOWN_ERROR.to_owned()
    } else {
        message
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let message = match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => String::new(),
        },
    };
    error_message(message)
}
