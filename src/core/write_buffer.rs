//! Output write queue
//!
//! Chunks from the remote process are queued with a completion signal and
//! handed to the emulator in bounded batches, in submission order. A chunk's
//! signal fires once its last byte has been processed.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::SendError;

struct PendingWrite {
    data: Vec<u8>,
    offset: usize,
    done: oneshot::Sender<Result<(), SendError>>,
}

pub struct WriteBuffer {
    queue: VecDeque<PendingWrite>,
    batch_bytes: usize,
}

impl WriteBuffer {
    pub fn new(batch_bytes: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            batch_bytes: batch_bytes.max(1),
        }
    }

    pub fn push(&mut self, data: Vec<u8>) -> WriteCompletion {
        let (done, receiver) = oneshot::channel();
        self.queue.push_back(PendingWrite {
            data,
            offset: 0,
            done,
        });
        WriteCompletion { receiver }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Bytes still waiting to be processed
    pub fn pending_bytes(&self) -> usize {
        self.queue.iter().map(|w| w.data.len() - w.offset).sum()
    }

    /// Hand at most one batch of bytes to `sink`.
    ///
    /// Returns the completion senders of the chunks that finished; the
    /// caller settles them once the result is visible.
    pub fn drain_batch(&mut self, mut sink: impl FnMut(&[u8])) -> Vec<FlushedWrite> {
        let mut budget = self.batch_bytes;
        let mut finished = Vec::new();

        while budget > 0 {
            let Some(write) = self.queue.front_mut() else {
                break;
            };
            let end = write.data.len().min(write.offset + budget);
            if end > write.offset {
                sink(&write.data[write.offset..end]);
            }
            budget -= end - write.offset;
            write.offset = end;

            if write.offset < write.data.len() {
                break;
            }
            if let Some(write) = self.queue.pop_front() {
                finished.push(FlushedWrite { done: write.done });
            }
        }
        finished
    }

    /// Settle every outstanding write with `error`
    pub fn cancel_all(&mut self, error: SendError) -> usize {
        let count = self.queue.len();
        for write in self.queue.drain(..) {
            // The caller may have stopped waiting
            let _ = write.done.send(Err(error));
        }
        count
    }
}

/// A write whose bytes have all been processed
pub struct FlushedWrite {
    done: oneshot::Sender<Result<(), SendError>>,
}

impl FlushedWrite {
    pub fn complete(self) {
        let _ = self.done.send(Ok(()));
    }
}

/// Resolves once a chunk passed to `send` has been processed and rendered
#[must_use = "a write completion does nothing unless awaited or polled"]
#[derive(Debug)]
pub struct WriteCompletion {
    receiver: oneshot::Receiver<Result<(), SendError>>,
}

impl WriteCompletion {
    /// Check for the outcome without waiting
    pub fn try_result(&mut self) -> Option<Result<(), SendError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SendError::Abandoned)),
        }
    }
}

impl Future for WriteCompletion {
    type Output = Result<(), SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SendError::Abandoned)))
    }
}
