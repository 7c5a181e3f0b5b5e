//! Delivery of finished reports.
//!
//! A [`Reporter`] receives a complete, ordered, non-empty event list and
//! renders it for some destination. The monitor never calls a reporter
//! with an empty report. [`LogReporter`] is the built-in implementation:
//! it renders each event as one line and logs it, mentioning every user
//! subscribed to the validator through it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::storage::{Database, StorageError};
use crate::types::Height;

use super::event::ReportEvent;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("failed to load notifiers: {0}")]
    Notifiers(#[from] StorageError),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// The events of one diff pass for one chain.
#[derive(Clone, Debug)]
pub struct Report {
    pub chain: String,
    pub height: Height,
    pub events: Vec<ReportEvent>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Destination for reports.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Stable name, also used as the notifier `reporter` key.
    fn name(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, report: &Report) -> Result<(), ReporterError>;
}

/// Reporter that writes each event to the log.
pub struct LogReporter {
    database: Arc<dyn Database>,
}

impl LogReporter {
    pub const NAME: &'static str = "log";

    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Renders every event of `report` as one line.
    pub fn render(&self, report: &Report) -> Result<Vec<String>, ReporterError> {
        report
            .events
            .iter()
            .map(|event| {
                let validator = event.validator();
                let notifiers = self.database.get_notifiers(
                    &report.chain,
                    &validator.operator_address,
                    Self::NAME,
                )?;

                let mut line = event.describe();
                if !notifiers.is_empty() {
                    let mentions: Vec<String> = notifiers
                        .iter()
                        .map(|n| format!("@{}", n.user_name))
                        .collect();
                    line.push_str(" (cc ");
                    line.push_str(&mentions.join(" "));
                    line.push(')');
                }
                Ok(line)
            })
            .collect()
    }
}

#[async_trait]
impl Reporter for LogReporter {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send(&self, report: &Report) -> Result<(), ReporterError> {
        for line in self.render(report)? {
            info!(chain = %report.chain, height = report.height, "{line}");
        }
        Ok(())
    }
}
