use serde::{Deserialize, Serialize};

use crate::CorrelationId;

/// Caller-observable outcome of an asynchronously-executed command or query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// The message was handled and produced a result.
    Success,
    /// The message was handled but produced nothing (an empty success).
    Nothing,
    /// The message was rejected or handling failed.
    Failed,
    /// No reply arrived within the caller's deadline.
    Timeout,
    /// The correlation layer refused the message to bound in-flight work.
    Busy,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Nothing => "nothing",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Busy => "busy",
        };
        f.write_str(s)
    }
}

/// Result of executing a command or query, created by a dispatcher when a
/// handler completes or fails and consumed exactly once by the correlation
/// layer to fulfill the pending completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub correlation_id: CorrelationId,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Payload for query results and data-bearing replies.
    pub data: Option<serde_json::Value>,
}

impl ExecutionResult {
    /// A successful reply.
    pub fn success(correlation_id: CorrelationId) -> Self {
        Self::with_status(ExecutionStatus::Success, correlation_id)
    }

    /// An empty success reply: the message was handled, nothing to report.
    pub fn nothing(correlation_id: CorrelationId) -> Self {
        Self::with_status(ExecutionStatus::Nothing, correlation_id)
    }

    /// A failed reply carrying an error code and message.
    pub fn failed(
        correlation_id: CorrelationId,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            correlation_id,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            data: None,
        }
    }

    /// The caller's deadline elapsed before any reply arrived.
    pub fn timeout(correlation_id: CorrelationId) -> Self {
        Self::with_status(ExecutionStatus::Timeout, correlation_id)
    }

    /// The in-flight cap was reached; nothing was dispatched.
    pub fn busy(correlation_id: CorrelationId) -> Self {
        Self::with_status(ExecutionStatus::Busy, correlation_id)
    }

    /// Attaches a data payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True for `Success` and `Nothing` outcomes.
    pub fn is_ok(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Success | ExecutionStatus::Nothing
        )
    }

    fn with_status(status: ExecutionStatus, correlation_id: CorrelationId) -> Self {
        Self {
            status,
            correlation_id,
            error_code: None,
            error_message: None,
            data: None,
        }
    }
}
