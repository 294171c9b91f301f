//! # Bounded spool queues.
//!
//! The spooler owns the sending half of two bounded `mpsc` channels; consumers
//! get a [`SpoolReceiver`], a cloneable handle over the receiving half.
//!
//! ## Rules
//! - **Single producer**: only the spooler's event loop sends.
//! - **Blocking on full**: a send to a full queue waits, stalling the whole
//!   event loop (runs *and* cancelations). There is no drop-oldest mode.
//! - **Claim once**: any number of clones may call [`recv`](SpoolReceiver::recv)
//!   concurrently; every item is handed to exactly one of them.
//! - `recv` is cancel-safe: dropping the future never loses an item.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Creates a bounded spool queue; capacity is clamped to at least 1.
pub(crate) fn spool<T>(capacity: usize) -> (mpsc::Sender<T>, SpoolReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        tx,
        SpoolReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Read-only, multi-consumer handle to a spool queue.
#[derive(Debug)]
pub struct SpoolReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for SpoolReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> SpoolReceiver<T> {
    /// Waits for the next item.
    ///
    /// Returns `None` once the spooler has been dropped and the queue drained.
    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Takes the next item if one is ready.
    ///
    /// Returns `None` when the queue is empty or another consumer is mid-`recv`.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Number of items waiting.
    pub fn len(&self) -> usize {
        self.rx.try_lock().map(|rx| rx.len()).unwrap_or(0)
    }

    /// True when no item is waiting (or another consumer holds the queue).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
