//! Observable transfer events.
//!
//! Adapters report notable state changes to an [`EventSink`] supplied by
//! the caller instead of writing to a global logger directly.

use std::sync::Mutex;
use std::time::Duration;

/// Something a store adapter wants the caller to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A decrypting write found plaintext input and switched to a plain
    /// copy for the rest of the call.
    DecryptionDowngraded { address: String },
    /// An attempt failed and another one starts after `delay`.
    RetryScheduled {
        address: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
}

/// Receiver for [`TransferEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TransferEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TransferEvent) {
        match event {
            TransferEvent::DecryptionDowngraded { address } => {
                tracing::info!(address = %address, "retrying upload to container without decryption");
            }
            TransferEvent::RetryScheduled {
                address,
                attempt,
                delay,
                reason,
            } => {
                tracing::debug!(
                    address = %address,
                    attempt,
                    delay_secs = delay.as_secs(),
                    reason = %reason,
                    "attempt failed, retrying"
                );
            }
        }
    }
}

/// Keeps every event in memory. Handy in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TransferEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far.
    pub fn events(&self) -> Vec<TransferEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: TransferEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
