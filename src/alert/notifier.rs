//! Outbound notification transport

use super::types::{Alert, Severity};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Delivers alerts to wherever operators read them
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the structured log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        match alert.severity {
            Severity::Critical => tracing::error!(
                category = %alert.category,
                key = %alert.key,
                pin = alert.pin,
                "{}",
                alert.text
            ),
            Severity::Warning => tracing::warn!(
                category = %alert.category,
                key = %alert.key,
                "{}",
                alert.text
            ),
            Severity::Info => tracing::info!(
                category = %alert.category,
                key = %alert.key,
                "{}",
                alert.text
            ),
        }
        Ok(())
    }
}
