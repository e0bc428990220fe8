//! Recording mock provider for tests and local development.

use async_trait::async_trait;
use eyre::{eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use super::{EmailProvider, SendResult};
use crate::models::Email;

/// Mock provider that records sent emails in memory.
#[derive(Default)]
pub struct MockSmtpProvider {
    sent: Mutex<Vec<Email>>,
    fail_next: AtomicBool,
}

impl MockSmtpProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next send fail (for dispatch-failure paths).
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Emails sent so far.
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailProvider for MockSmtpProvider {
    async fn send(&self, email: &Email) -> Result<SendResult> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(eyre!("mock send failure"));
        }

        if !email.has_body() {
            return Err(eyre!("Email must have either text or HTML body"));
        }

        debug!(to = %email.to, subject = %email.subject, "Mock email recorded");
        self.sent.lock().unwrap().push(email.clone());

        Ok(SendResult {
            message_id: format!("mock-{}", email.id),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
