//! In-process message receivers and their worker loops.
//!
//! A [`ChannelReceiver`] is the queue between message producers and a
//! dispatcher. A [`WorkerLoop`] drains one receiver on a dedicated task,
//! feeding each envelope to an [`EnvelopeProcessor`] until shutdown.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::Envelope;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::DispatchError;

/// Consumes envelopes drained from a receiver.
#[async_trait]
pub trait EnvelopeProcessor<T>: Send + Sync {
    /// Handles one envelope. Never returns an error; the processor owns
    /// its failure handling (replies, logging, dead-lettering).
    async fn process(&self, envelope: Envelope<T>);
}

/// An unbounded in-process queue with a single consumer.
///
/// Cloning shares the sending side; the receiving half can be taken
/// exactly once, by the worker loop that will drain it.
pub struct ChannelReceiver<T> {
    tx: mpsc::UnboundedSender<Envelope<T>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope<T>>>>,
}

impl<T: Send + 'static> ChannelReceiver<T> {
    /// Creates a fresh queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Enqueues an envelope for the consumer.
    pub fn enqueue(&self, envelope: Envelope<T>) -> Result<(), DispatchError> {
        self.tx
            .send(envelope)
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// A clone of the sending side, for producers that outlive this handle.
    pub fn sender(&self) -> mpsc::UnboundedSender<Envelope<T>> {
        self.tx.clone()
    }

    /// Takes the receiving half. Returns None after the first take.
    pub fn take_rx(&self) -> Option<mpsc::UnboundedReceiver<Envelope<T>>> {
        let mut slot = match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }
}

impl<T: Send + 'static> Default for ChannelReceiver<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkerState {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

/// Drains one receiver on a background task.
///
/// `start` and `stop` are idempotent; a second `start` while running is a
/// no-op, as is `stop` when already stopped.
pub struct WorkerLoop<T: Send + 'static> {
    name: &'static str,
    receiver: Arc<ChannelReceiver<T>>,
    processor: Arc<dyn EnvelopeProcessor<T>>,
    state: Mutex<WorkerState>,
}

impl<T: Send + 'static> WorkerLoop<T> {
    /// Creates a stopped worker over the receiver and processor.
    pub fn new(
        name: &'static str,
        receiver: Arc<ChannelReceiver<T>>,
        processor: Arc<dyn EnvelopeProcessor<T>>,
    ) -> Self {
        Self {
            name,
            receiver,
            processor,
            state: Mutex::new(WorkerState {
                handle: None,
                shutdown: None,
            }),
        }
    }

    /// Starts draining, if not already running.
    pub fn start(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.handle.is_some() {
            return;
        }
        let Some(mut rx) = self.receiver.take_rx() else {
            tracing::warn!(worker = self.name, "receiver already drained elsewhere");
            return;
        };
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let processor = Arc::clone(&self.processor);
        let name = self.name;
        let handle = tokio::spawn(async move {
            tracing::debug!(worker = name, "worker started");
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    received = rx.recv() => {
                        match received {
                            Some(envelope) => processor.process(envelope).await,
                            None => break,
                        }
                    }
                }
            }
            tracing::debug!(worker = name, "worker stopped");
        });
        state.handle = Some(handle);
        state.shutdown = Some(shutdown_tx);
    }

    /// Signals shutdown and waits for the worker task to finish.
    pub async fn stop(&self) {
        let (handle, shutdown) = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            (state.handle.take(), state.shutdown.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
