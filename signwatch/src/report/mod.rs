//! Snapshot diffing and report delivery.
//!
//! This module turns two committed snapshots into an ordered list of
//! [`ReportEvent`]s ([`diff`]) and defines the [`Reporter`] interface that
//! delivery backends implement ([`reporter`]).

pub mod diff;
pub mod event;
pub mod reporter;

pub use diff::{DiffError, DiffOutcome, diff, diff_pair};
pub use event::{EventKind, ReportEvent};
pub use reporter::{LogReporter, Report, Reporter, ReporterError};
