use std::collections::HashMap;

use uuid::Uuid;

use crate::CorrelationId;

/// Generic transport wrapper for messages crossing a receiver boundary.
///
/// The envelope carries a body plus a side-channel key/value map for
/// information (trace ids, reply addresses, source identity) that a
/// transport binding must preserve even though it does not understand
/// the domain types inside the body.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    /// The wrapped message.
    pub body: T,
    /// Unique id of this message instance, distinct from any domain id.
    pub message_id: Uuid,
    /// Correlation back to an originating message, when there is one.
    pub correlation_id: Option<CorrelationId>,
    /// Side-channel entries carried opaquely across the transport.
    pub items: HashMap<String, String>,
}

impl<T> Envelope<T> {
    /// Wraps a body with a fresh message id and no side-channel entries.
    pub fn new(body: T) -> Self {
        Self {
            body,
            message_id: Uuid::new_v4(),
            correlation_id: None,
            items: HashMap::new(),
        }
    }

    /// Sets the correlation id.
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Copies trace info into the side-channel map.
    pub fn with_trace(mut self, trace: &TraceInfo) -> Self {
        trace.write_items(&mut self.items);
        self.correlation_id = Some(trace.trace_id);
        self
    }

    /// Adds one side-channel entry.
    pub fn with_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.items.insert(key.into(), value.into());
        self
    }

    /// Looks up a side-channel entry.
    pub fn item(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Reconstructs trace info from the side-channel map, if present.
    pub fn trace(&self) -> Option<TraceInfo> {
        TraceInfo::from_items(&self.items)
    }
}

/// Correlates an asynchronously-executed command or query back to the
/// caller waiting on its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInfo {
    /// Correlation id the caller registered a pending completion under.
    pub trace_id: CorrelationId,
    /// Logical address of the reply sink that resolves the completion.
    pub reply_address: String,
}

impl TraceInfo {
    /// Side-channel key for the trace id.
    pub const TRACE_ID_KEY: &'static str = "trace-id";
    /// Side-channel key for the reply address.
    pub const REPLY_ADDRESS_KEY: &'static str = "reply-address";

    /// Creates trace info for a pending completion.
    pub fn new(trace_id: CorrelationId, reply_address: impl Into<String>) -> Self {
        Self {
            trace_id,
            reply_address: reply_address.into(),
        }
    }

    /// Writes both entries into an envelope's side-channel map.
    pub fn write_items(&self, items: &mut HashMap<String, String>) {
        items.insert(Self::TRACE_ID_KEY.to_string(), self.trace_id.to_string());
        items.insert(
            Self::REPLY_ADDRESS_KEY.to_string(),
            self.reply_address.clone(),
        );
    }

    /// Reads trace info back out of a side-channel map.
    ///
    /// Returns None when either entry is missing or the trace id does not
    /// parse; a half-written trace is treated as no trace at all.
    pub fn from_items(items: &HashMap<String, String>) -> Option<Self> {
        let trace_id = CorrelationId::parse(items.get(Self::TRACE_ID_KEY)?)?;
        let reply_address = items.get(Self::REPLY_ADDRESS_KEY)?.clone();
        Some(Self {
            trace_id,
            reply_address,
        })
    }
}
