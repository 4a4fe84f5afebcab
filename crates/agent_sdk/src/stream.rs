use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{mpsc, Mutex};

use crate::cancellation::CancellationHandle;
use crate::error::SdkError;

enum Slot<T> {
    Item(T),
    Done,
    Error(Arc<SdkError>),
}

/// A lazy, single-producer/single-consumer sequence with three terminal
/// states: pending (still open), completed (drained, done), and errored
/// (drained, then one final error). Once a terminal state is enqueued,
/// further `enqueue` calls fail; a consumer reading past an error
/// observes it exactly once and then sees the sequence as exhausted.
pub struct FramedStream<T> {
    tx: mpsc::UnboundedSender<Slot<T>>,
    rx: Mutex<mpsc::UnboundedReceiver<Slot<T>>>,
    terminal: Arc<AtomicBool>,
    cancellation: CancellationHandle,
}

impl<T> FramedStream<T> {
    pub fn new(cancellation: CancellationHandle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            terminal: Arc::new(AtomicBool::new(false)),
            cancellation,
        }
    }

    /// Pushes an item onto the sequence. Fails once the sequence has
    /// reached a terminal state.
    pub fn enqueue(&self, item: T) -> Result<(), SdkError> {
        if self.terminal.load(Ordering::SeqCst) {
            return Err(SdkError::Closed);
        }
        self.tx.send(Slot::Item(item)).map_err(|_| SdkError::Closed)
    }

    /// Marks the sequence complete. Idempotent: calling this after the
    /// sequence is already terminal is a no-op.
    pub fn mark_done(&self) {
        if self.terminal.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Slot::Done);
    }

    /// Marks the sequence errored. Idempotent for the same reason as
    /// `mark_done`; the error is delivered to the consumer exactly once.
    pub fn mark_error(&self, err: SdkError) {
        if self.terminal.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Slot::Error(Arc::new(err)));
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Awaits the next item. Returns `None` once the sequence is done or
    /// has already surfaced its terminal error. Wakes immediately if the
    /// shared cancellation handle fires while waiting, even with no item
    /// enqueued.
    pub async fn next(&self) -> Option<Result<T, Arc<SdkError>>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            slot = rx.recv() => match slot {
                Some(Slot::Item(item)) => Some(Ok(item)),
                Some(Slot::Done) | None => None,
                Some(Slot::Error(err)) => Some(Err(err)),
            },
            _ = self.cancellation.cancelled() => {
                if self.terminal.swap(true, Ordering::SeqCst) {
                    // Another path already delivered the terminal state;
                    // drain it rather than fabricating a second error.
                    match rx.recv().await {
                        Some(Slot::Item(item)) => Some(Ok(item)),
                        Some(Slot::Error(err)) => Some(Err(err)),
                        _ => None,
                    }
                } else {
                    Some(Err(Arc::new(SdkError::Aborted)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_pending_items_before_terminal_state() {
        let stream = FramedStream::new(CancellationHandle::new());
        stream.enqueue(1).unwrap();
        stream.enqueue(2).unwrap();
        stream.mark_done();

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn enqueue_after_done_fails() {
        let stream = FramedStream::<i32>::new(CancellationHandle::new());
        stream.mark_done();
        assert!(matches!(stream.enqueue(1), Err(SdkError::Closed)));
    }

    #[tokio::test]
    async fn error_surfaces_once_then_sequence_ends() {
        let stream = FramedStream::<i32>::new(CancellationHandle::new());
        stream.mark_error(SdkError::Aborted);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_wakes_a_blocked_reader() {
        let handle = CancellationHandle::new();
        let stream = Arc::new(FramedStream::<i32>::new(handle.clone()));
        let reader = stream.clone();
        let task = tokio::spawn(async move { reader.next().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        handle.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_millis(200), task)
            .await
            .expect("reader should wake promptly")
            .unwrap();
        assert!(result.unwrap().is_err());
    }
}
