use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Email priority. High-priority mail gets more dispatch retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmailPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// A sendable email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: Uuid,
    pub to: String,
    pub from: Option<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    #[serde(default)]
    pub priority: EmailPriority,
    pub created_at: DateTime<Utc>,
}

impl Email {
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            to: to.into(),
            from: None,
            subject: subject.into(),
            body_text: None,
            body_html: None,
            priority: EmailPriority::Normal,
            created_at: Utc::now(),
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body_text = Some(text.into());
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = Some(html.into());
        self
    }

    pub fn with_priority(mut self, priority: EmailPriority) -> Self {
        self.priority = priority;
        self
    }

    /// An email needs at least one body to be sendable.
    pub fn has_body(&self) -> bool {
        self.body_text.is_some() || self.body_html.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_builder() {
        let email = Email::new("ops@example.com", "Air quality alert")
            .with_from("Alerts <alerts@example.com>")
            .with_text("AQI is 210")
            .with_priority(EmailPriority::High);

        assert_eq!(email.to, "ops@example.com");
        assert_eq!(email.subject, "Air quality alert");
        assert_eq!(email.priority, EmailPriority::High);
        assert!(email.has_body());
        assert!(email.body_html.is_none());
    }

    #[test]
    fn test_email_without_body() {
        let email = Email::new("ops@example.com", "Empty");
        assert!(!email.has_body());
    }
}
