//! SQS integration for ingestion triggers
//!
//! Provides:
//! - SQS client wrapper for long polling and acknowledgement
//! - JSON decoding of [`ProcessDocumentMessage`]

use crate::config::QueueSettings;
use crate::errors::{AppError, Result};
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Request to (re)process one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDocumentMessage {
    pub document_id: Uuid,
    /// Bypass the content-hash check
    #[serde(default)]
    pub force: bool,
}

/// SQS Queue client wrapper
pub struct Queue {
    client: SqsClient,
    url: String,
    max_messages: i32,
    wait_time_seconds: i32,
    visibility_timeout: i32,
}

impl Queue {
    /// Create a queue client from the ambient AWS configuration
    pub async fn new(settings: &QueueSettings) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::with_client(SqsClient::new(&aws_config), settings)
    }

    /// Create with an existing SQS client
    pub fn with_client(client: SqsClient, settings: &QueueSettings) -> Result<Self> {
        let url = settings.ingestion_queue_url.clone().ok_or_else(|| AppError::Configuration {
            message: "queue.ingestion_queue_url is not set".to_string(),
        })?;

        Ok(Self {
            client,
            url,
            // SQS caps a single receive at 10 messages and 20s of long polling
            max_messages: settings.batch_size.clamp(1, 10) as i32,
            wait_time_seconds: settings.poll_timeout_secs.min(20) as i32,
            visibility_timeout: settings.visibility_timeout_secs.min(43_200) as i32,
        })
    }

    /// Long-poll for the next batch of messages
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let result = self.client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(self.max_messages)
            .visibility_timeout(self.visibility_timeout)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        Ok(messages)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }
}

/// Decode an ingestion trigger from a message body
pub fn decode_message(body: &str) -> Result<ProcessDocumentMessage> {
    serde_json::from_str(body).map_err(|e| AppError::QueueError {
        message: format!("Failed to parse message: {}", e),
    })
}
