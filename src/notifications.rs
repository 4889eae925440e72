//! Transactional email dispatch.
//!
//! Emails are queued onto a channel and delivered by a background worker with
//! a bounded retry policy. Delivery failure is logged and the message
//! dropped; nothing upstream ever waits on or fails with the mailer.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::EmailConfig;
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivery backend for transactional email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, from: &str, email: &Email) -> Result<(), ServiceError>;
}

/// Default backend: records the send in the application log. Stands in for a
/// provider integration in development and tests.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, from: &str, email: &Email) -> Result<(), ServiceError> {
        info!(%from, to = %email.to, subject = %email.subject, "email dispatched");
        Ok(())
    }
}

/// Handle for enqueueing emails; cheap to clone.
#[derive(Clone)]
pub struct EmailDispatcher {
    tx: mpsc::Sender<Email>,
}

impl EmailDispatcher {
    /// Spawn the delivery worker and return the enqueue handle.
    pub fn start(mailer: Arc<dyn Mailer>, cfg: EmailConfig) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(delivery_worker(rx, mailer, cfg));
        Self { tx }
    }

    /// Queue an email for delivery. Fire-and-forget: a full or closed queue
    /// is logged, never surfaced.
    pub async fn enqueue(&self, email: Email) {
        if let Err(e) = self.tx.send(email).await {
            warn!(error = %e, "email queue closed, dropping message");
        }
    }
}

async fn delivery_worker(mut rx: mpsc::Receiver<Email>, mailer: Arc<dyn Mailer>, cfg: EmailConfig) {
    while let Some(email) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match mailer.deliver(&cfg.from_address, &email).await {
                Ok(()) => break,
                Err(e) if attempt < cfg.max_attempts => {
                    warn!(
                        error = %e,
                        to = %email.to,
                        attempt,
                        "email delivery failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(
                        cfg.retry_backoff_secs * u64::from(attempt),
                    ))
                    .await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        to = %email.to,
                        subject = %email.subject,
                        "email delivery abandoned after {attempt} attempts"
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mailer double that fails a fixed number of times before succeeding.
    struct FlakyMailer {
        failures_remaining: Mutex<u32>,
        delivered: Mutex<Vec<Email>>,
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn deliver(&self, _from: &str, email: &Email) -> Result<(), ServiceError> {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ServiceError::InternalError("smtp down".into()));
            }
            self.delivered.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn retries_until_delivery() {
        let mailer = Arc::new(FlakyMailer {
            failures_remaining: Mutex::new(2),
            delivered: Mutex::new(Vec::new()),
        });
        let cfg = EmailConfig {
            from_address: "orders@test".into(),
            max_attempts: 3,
            retry_backoff_secs: 0,
        };
        let dispatcher = EmailDispatcher::start(mailer.clone(), cfg);

        dispatcher
            .enqueue(Email {
                to: "jo@example.com".into(),
                subject: "hi".into(),
                body: "body".into(),
            })
            .await;

        // Give the worker a moment to drain the queue.
        for _ in 0..50 {
            if !mailer.delivered.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mailer.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mailer = Arc::new(FlakyMailer {
            failures_remaining: Mutex::new(10),
            delivered: Mutex::new(Vec::new()),
        });
        let cfg = EmailConfig {
            from_address: "orders@test".into(),
            max_attempts: 2,
            retry_backoff_secs: 0,
        };
        let dispatcher = EmailDispatcher::start(mailer.clone(), cfg);

        dispatcher
            .enqueue(Email {
                to: "jo@example.com".into(),
                subject: "hi".into(),
                body: "body".into(),
            })
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(mailer.delivered.lock().unwrap().is_empty());
        // Two attempts consumed, the rest untouched.
        assert_eq!(*mailer.failures_remaining.lock().unwrap(), 8);
    }
}
