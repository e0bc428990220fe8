//! Mailer port for the alerting pipeline.
//!
//! This crate provides:
//! - `EmailProvider` trait with SMTP (lettre) and recording mock
//!   implementations
//! - `TemplateEngine`: Handlebars rendering for alert and report emails
//! - The `Email` model with priority
//!
//! Rendering is a pure function from template name + data to subject/body;
//! dispatch is a single `send` returning the provider's delivery id.

pub mod models;
pub mod provider;
pub mod templates;

pub use models::{Email, EmailPriority};
pub use provider::{EmailProvider, MockSmtpProvider, SendResult, SmtpConfig, SmtpProvider};
pub use templates::{RenderedTemplate, TemplateEngine};
