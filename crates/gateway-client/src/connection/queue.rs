//! Outbound send queue
//!
//! Every outbound frame (handshake, heartbeat, application sends) goes
//! through one channel drained by a single writer task, so frames reach the
//! transport in enqueue order with at most one write in flight.
//!
//! The queue outlives physical connections: the driver attaches a fresh sink
//! after every reconnect. Entries are stamped with the connection generation
//! current at enqueue time and are never written to a later connection.

use crate::codec::Codec;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::GatewayMessage;
use crate::transport::FrameSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

struct Entry {
    message: GatewayMessage,
    generation: u64,
    done: oneshot::Sender<GatewayResult<()>>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    sink: Option<Box<dyn FrameSink>>,
}

/// Completion handle for an enqueued frame
#[derive(Debug)]
#[must_use = "a receipt does nothing unless awaited"]
pub struct SendReceipt {
    rx: oneshot::Receiver<GatewayResult<()>>,
}

impl SendReceipt {
    /// Wait until the frame has been written (or rejected)
    pub async fn written(self) -> GatewayResult<()> {
        self.rx.await.unwrap_or(Err(GatewayError::Closed))
    }
}

/// FIFO of outbound frames with a single writer
pub struct SendQueue {
    tx: mpsc::UnboundedSender<Entry>,
    slot: Arc<Mutex<Slot>>,
    generation: AtomicU64,
}

impl SendQueue {
    /// Create the queue and spawn its writer task
    ///
    /// Must be called inside a Tokio runtime. The writer stops when the queue
    /// is dropped.
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(Mutex::new(Slot::default()));

        tokio::spawn(write_loop(rx, slot.clone(), codec));

        Self {
            tx,
            slot,
            generation: AtomicU64::new(0),
        }
    }

    /// Append a frame. Order is fixed at the moment of this call.
    pub fn enqueue(&self, message: GatewayMessage) -> SendReceipt {
        let (done, rx) = oneshot::channel();
        let entry = Entry {
            message,
            generation: self.generation.load(Ordering::SeqCst),
            done,
        };

        // A closed channel drops `done`, which resolves the receipt as Closed
        let _ = self.tx.send(entry);

        SendReceipt { rx }
    }

    /// Install the sink of a new physical connection; returns its generation
    pub async fn attach(&self, sink: Box<dyn FrameSink>) -> u64 {
        let mut slot = self.slot.lock().await;
        let generation = slot.generation + 1;
        slot.generation = generation;
        slot.sink = Some(sink);
        self.generation.store(generation, Ordering::SeqCst);
        generation
    }

    /// Remove the current sink, waiting for an in-flight write to finish
    pub async fn detach(&self) -> Option<Box<dyn FrameSink>> {
        self.slot.lock().await.sink.take()
    }

    /// Generation of the most recently attached sink
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SendQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendQueue")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<Entry>,
    slot: Arc<Mutex<Slot>>,
    codec: Arc<dyn Codec>,
) {
    while let Some(entry) = rx.recv().await {
        let result = write_entry(&slot, codec.as_ref(), &entry).await;

        if let Err(e) = &result {
            tracing::debug!(op = %entry.message.op, error = %e, "Outbound frame not written");
        }

        // The caller may have stopped waiting
        let _ = entry.done.send(result);
    }

    tracing::trace!("Send queue writer stopped");
}

async fn write_entry(slot: &Mutex<Slot>, codec: &dyn Codec, entry: &Entry) -> GatewayResult<()> {
    let mut slot = slot.lock().await;
    if slot.generation != entry.generation {
        return Err(GatewayError::NotConnected);
    }
    let sink = slot.sink.as_mut().ok_or(GatewayError::NotConnected)?;

    let frame = codec.encode(&entry.message)?;
    tracing::trace!(op = %entry.message.op, "Writing frame");
    sink.send(frame).await?;
    Ok(())
}
