pub mod telegram;

use async_trait::async_trait;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("message rejected: {0}")]
    Permanent(String),
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            _ if err.is_builder() => Self::Permanent(err.to_string()),
            Some(status) if status.is_client_error() && status.as_u16() != 429 => {
                Self::Permanent(err.to_string())
            }
            _ => Self::Transient(err.to_string()),
        }
    }
}

/// A push-notification endpoint.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), SendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub destination: String,
    pub text: String,
}

/// Delivers notifications, keeping transiently failed ones for a later retry.
pub struct Messenger {
    notifier: Arc<dyn Notifier>,
    attempts: NonZeroUsize,
    queue: Mutex<Vec<PendingMessage>>,
}

impl Messenger {
    pub fn new(notifier: Arc<dyn Notifier>, attempts: NonZeroUsize) -> Self {
        Self {
            notifier,
            attempts,
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Send `text`, retrying transient failures a bounded number of times.
    ///
    /// Returns whether the message was delivered. Messages that keep failing
    /// transiently are queued; rejected ones are dropped.
    pub async fn send(&self, text: &str, destination: &str) -> bool {
        match self.deliver_with_retries(destination, text).await {
            Ok(()) => true,
            Err(SendError::Transient(reason)) => {
                tracing::warn!(
                    "Failed to deliver message to {} after {} attempts, queued for retry: {}",
                    destination,
                    self.attempts,
                    reason
                );
                self.lock_queue().push(PendingMessage {
                    destination: destination.to_owned(),
                    text: text.to_owned(),
                });
                false
            }
            Err(SendError::Permanent(reason)) => {
                tracing::error!("Dropping message to {}: {}", destination, reason);
                false
            }
        }
    }

    /// Give every queued message exactly one more `send`.
    ///
    /// Returns how many of them were delivered; the rest are queued again.
    pub async fn retry_pending(&self) -> usize {
        let pending = std::mem::take(&mut *self.lock_queue());
        if pending.is_empty() {
            return 0;
        }

        tracing::info!("Retrying {} undelivered messages", pending.len());

        let mut delivered = 0;
        for message in pending {
            if self.send(&message.text, &message.destination).await {
                delivered += 1;
            }
        }

        delivered
    }

    pub fn pending(&self) -> Vec<PendingMessage> {
        self.lock_queue().clone()
    }

    async fn deliver_with_retries(&self, destination: &str, text: &str) -> Result<(), SendError> {
        let mut last_reason = String::new();

        for attempt in 1..=self.attempts.get() {
            match self.notifier.deliver(destination, text).await {
                Ok(()) => return Ok(()),
                Err(SendError::Transient(reason)) => {
                    tracing::debug!("Delivery attempt {} failed: {}", attempt, reason);
                    last_reason = reason;
                }
                Err(err @ SendError::Permanent(_)) => return Err(err),
            }
        }

        Err(SendError::Transient(last_reason))
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Vec<PendingMessage>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
