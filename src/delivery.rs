use std::fmt;

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Models,
    Metrics,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Models => "models",
            RecordKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counts returned by the backend for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutStatus {
    pub succeeded: u64,
    pub failed: u64,
    pub message: String,
}

/// What happened to one batch. Every outcome is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { count: usize },
    Partial { count: usize, succeeded: u64, failed: u64 },
    Lost { count: usize },
}

/// Logs and counts the outcome of sending `count` records of `kind`.
pub fn report(kind: RecordKind, count: usize, result: Result<PutStatus>) -> Delivery {
    match result {
        Err(err) => {
            error!(kind = %kind, count, error = %err, "unable to send {}", kind);
            metrics::record_failed(kind, count);
            Delivery::Lost { count }
        }
        Ok(status) if status.failed > 0 => {
            warn!(
                kind = %kind,
                count,
                succeeded = status.succeeded,
                failed = status.failed,
                message = %status.message,
                "failed to send {}",
                kind
            );
            metrics::record_sent(kind, status.succeeded as usize);
            metrics::record_failed(kind, status.failed as usize);
            Delivery::Partial {
                count,
                succeeded: status.succeeded,
                failed: status.failed,
            }
        }
        Ok(_) => {
            debug!(kind = %kind, count, "sent {}", kind);
            metrics::record_sent(kind, count);
            Delivery::Sent { count }
        }
    }
}
