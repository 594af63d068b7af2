//! SQS polling loop for ingestion triggers

use crate::errors::Result;
use crate::processor::{DocumentProcessor, ProcessOutcome};
use coursemind_common::metrics;
use coursemind_common::queue::{self, Queue};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What to do with a message once handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done, or will never succeed: remove from the queue
    Delete,
    /// Leave for redelivery after the visibility timeout
    Retry,
}

/// Process one message body and decide its fate
pub async fn handle_message(processor: &DocumentProcessor, body: &str) -> (Disposition, Result<ProcessOutcome>) {
    let message = match queue::decode_message(body) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Dropping malformed ingestion message");
            return (Disposition::Delete, Err(e.into()));
        }
    };

    let result = processor
        .process_document(message.document_id, message.force)
        .await;

    let disposition = match &result {
        Ok(_) => Disposition::Delete,
        Err(e) if e.is_transient() => Disposition::Retry,
        Err(_) => Disposition::Delete,
    };

    (disposition, result)
}

/// Sleep for `duration` unless `shutdown` resolves first. Returns true on shutdown.
async fn pause<F: Future<Output = ()>>(duration: Duration, shutdown: Pin<&mut F>) -> bool {
    tokio::select! {
        _ = shutdown => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Poll `queue` until `shutdown` resolves
pub async fn run(processor: &DocumentProcessor, queue: &Queue, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    let mut consecutive_failures = 0;

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
            if pause(CIRCUIT_BREAK_DURATION, shutdown.as_mut()).await {
                info!("Shutdown signal received");
                break;
            }
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            result = queue.receive() => {
                let messages = match result {
                    Ok(messages) => messages,
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        if pause(RECEIVE_ERROR_BACKOFF, shutdown.as_mut()).await {
                            info!("Shutdown signal received");
                            break;
                        }
                        continue;
                    }
                };

                for message in messages {
                    let body = message.body.as_deref().unwrap_or_default();
                    let (disposition, result) = handle_message(processor, body).await;

                    match &result {
                        Ok(outcome) => {
                            consecutive_failures = 0;
                            info!(?outcome, "Ingestion message handled");
                        }
                        Err(e) => {
                            if disposition == Disposition::Retry {
                                consecutive_failures += 1;
                            }
                            error!(
                                error = %e,
                                failures = consecutive_failures,
                                retry = disposition == Disposition::Retry,
                                "Failed to process ingestion message"
                            );
                        }
                    }
                    metrics::record_queue_message(result.is_ok());

                    if disposition == Disposition::Delete {
                        if let Some(handle) = message.receipt_handle.as_deref() {
                            if let Err(e) = queue.delete(handle).await {
                                error!(error = %e, "Failed to delete message");
                            }
                        }
                    }
                }
            }
        }
    }
}
