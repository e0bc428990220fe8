//! Alert engine: condition evaluation, throttling, escalation, delivery
//! tracking.
//!
//! A fixed condition set (API failure streaks, pollution levels, queue
//! backlog, system error rate, storage usage) is evaluated against typed
//! signals. Each condition carries a throttle window (at most one alert per
//! window) and an escalation window (repeated triggers widen the recipient
//! list). Alert records persist regardless of email outcome; dispatch
//! failures are recorded on the alert, never raised.

mod conditions;
mod engine;
mod error;
mod models;
mod mongodb;

pub use conditions::{match_signal, AlertSignal, AlertThresholds};
pub use engine::AlertEngine;
pub use error::AlertError;
pub use models::{AlertCondition, AlertRecord, AlertSeverity, AlertStore, ThrottleState};
pub use mongodb::MongoAlertStore;

pub type AlertResult<T> = Result<T, AlertError>;
