use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// A raw upload waiting for the worker.
#[derive(Clone, Debug)]
pub struct Upload {
    pub jpeg: Vec<u8>,
    pub received: Instant,
}

/// Single-slot mailbox between the upload route and the worker. A new upload
/// replaces one the worker has not picked up yet.
#[derive(Clone)]
pub struct LatestFrame {
    tx: Sender<Upload>,
    drain: Receiver<Upload>,
}

impl LatestFrame {
    pub fn new() -> (Self, Receiver<Upload>) {
        let (tx, rx) = bounded(1);
        let slot = Self {
            tx,
            drain: rx.clone(),
        };
        (slot, rx)
    }

    /// Never blocks.
    pub fn offer(&self, upload: Upload) {
        let mut pending = upload;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if self.drain.try_recv().is_ok() {
                        log::trace!("replacing unprocessed upload");
                    }
                    pending = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Blocks for the next upload, then skips any that piled up behind it.
pub fn recv_latest(rx: &Receiver<Upload>) -> Option<Upload> {
    let mut upload = rx.recv().ok()?;
    while let Ok(newer) = rx.try_recv() {
        upload = newer;
    }
    Some(upload)
}

#[derive(Clone, Debug)]
pub struct FramePacket {
    pub jpeg: Arc<Vec<u8>>,
    pub sequence: u64,
}

/// The last annotated frame, shared by the worker and every stream client.
#[derive(Clone, Default)]
pub struct SharedPacket {
    inner: Arc<Mutex<Option<FramePacket>>>,
}

impl SharedPacket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `jpeg` under the next sequence number and returns that number.
    pub fn publish(&self, jpeg: Vec<u8>) -> u64 {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let sequence = guard.as_ref().map_or(1, |packet| packet.sequence + 1);
        *guard = Some(FramePacket {
            jpeg: Arc::new(jpeg),
            sequence,
        });
        sequence
    }

    pub fn latest(&self) -> Option<FramePacket> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }

    /// The latest packet, if it is newer than `seen`.
    pub fn newer_than(&self, seen: u64) -> Option<FramePacket> {
        self.latest().filter(|packet| packet.sequence > seen)
    }
}
