//! Handler idempotency records.
//!
//! The event dispatcher records each (message, handler) pair it has run so
//! a redelivered batch skips handlers that already saw it. Records expire
//! after a retention window; by then the publication tracker has long
//! since moved past the batch and redelivery cannot happen anymore.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One completed (message, handler) invocation.
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub message_id: Uuid,
    pub message_type: String,
    pub handler_type: String,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory store of handler records with lazy expiry.
pub struct HandlerRecordStore {
    retention: Duration,
    records: Mutex<HashMap<(Uuid, String), HandlerRecord>>,
}

impl HandlerRecordStore {
    /// Creates a store keeping records for the given retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Whether this handler already processed this message.
    pub fn seen(&self, message_id: Uuid, handler_type: &str) -> bool {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records
            .get(&(message_id, handler_type.to_string()))
            .is_some_and(|record| !self.expired(record, Utc::now()))
    }

    /// Records a completed invocation and purges expired records.
    pub fn record(&self, message_id: Uuid, message_type: &str, handler_type: &str) {
        let now = Utc::now();
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.retain(|_, record| !self.expired(record, now));
        records.insert(
            (message_id, handler_type.to_string()),
            HandlerRecord {
                message_id,
                message_type: message_type.to_string(),
                handler_type: handler_type.to_string(),
                recorded_at: now,
            },
        );
    }

    fn expired(&self, record: &HandlerRecord, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(record.recorded_at);
        age.to_std().map_or(false, |age| age >= self.retention)
    }
}

impl Default for HandlerRecordStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}
