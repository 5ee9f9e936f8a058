//! Business fault channel.
//!
//! Business rejections already travel back to the caller as failed
//! replies; this channel additionally surfaces them to an operator-facing
//! consumer (alerting, audit) without coupling dispatchers to one.

use chrono::{DateTime, Utc};
use common::CorrelationId;
use tokio::sync::mpsc;

/// One business rule rejection, as observed by a dispatcher.
#[derive(Debug, Clone)]
pub struct BusinessFault {
    /// Name of the handler that rejected the message.
    pub source: String,
    /// Stable error code of the rejection.
    pub code: String,
    /// Human-readable rejection message.
    pub message: String,
    /// Correlation of the rejected message, when it was traced.
    pub correlation_id: Option<CorrelationId>,
    pub occurred_at: DateTime<Utc>,
}

impl BusinessFault {
    /// Records a rejection.
    pub fn new(
        source: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        correlation_id: Option<CorrelationId>,
    ) -> Self {
        Self {
            source: source.into(),
            code: code.into(),
            message: message.into(),
            correlation_id,
            occurred_at: Utc::now(),
        }
    }
}

/// Sending side of the fault stream. Cheap to clone; forwarding is fire
/// and forget.
#[derive(Clone)]
pub struct ExceptionChannel {
    tx: Option<mpsc::UnboundedSender<BusinessFault>>,
}

impl ExceptionChannel {
    /// Creates a live channel and the receiver draining it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusinessFault>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Creates a channel that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Forwards one fault. A missing or closed consumer is logged, never
    /// an error; fault reporting must not affect dispatch.
    pub fn forward(&self, fault: BusinessFault) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(fault).is_err() {
            tracing::warn!("business fault consumer is gone, fault dropped");
        }
    }
}
