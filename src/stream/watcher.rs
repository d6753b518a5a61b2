//! Background polling thread for UIs that prefer events to timers.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::consumer::{PollOutcome, StreamConsumer};
use super::status::StatusRecord;

/// Default number of undelivered events before the poller waits.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Event sent from the polling thread.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Completed { tail: String, status: StatusRecord },
    TimedOut { idle: Duration },
}

/// Owns a thread that polls a [`StreamConsumer`] and forwards its output.
///
/// The channel is bounded: if the receiver falls behind, the poller blocks
/// on send instead of buffering without limit. Dropping the receiver stops
/// the thread at its next send.
pub struct StreamWatcher {
    events: Receiver<StreamEvent>,
    handle: Option<JoinHandle<()>>,
}

impl StreamWatcher {
    pub fn spawn(consumer: StreamConsumer, interval: Duration) -> Self {
        Self::spawn_with_capacity(consumer, interval, DEFAULT_EVENT_CAPACITY)
    }

    pub fn spawn_with_capacity(
        mut consumer: StreamConsumer,
        interval: Duration,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let handle = thread::spawn(move || run_poller(&mut consumer, interval, tx));
        Self {
            events: rx,
            handle: Some(handle),
        }
    }

    /// Next event, waiting at most `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time; `Err` means the poller has
    /// exited and every event has been received.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<StreamEvent>, WatcherClosed> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WatcherClosed),
        }
    }

    /// Next event if one is already waiting.
    pub fn try_recv(&self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }

    /// Block until the stream ends and return every event, in order.
    pub fn collect(mut self) -> Vec<StreamEvent> {
        let events: Vec<StreamEvent> = self.events.iter().collect();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        events
    }
}

/// The poller thread has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherClosed;

fn run_poller(consumer: &mut StreamConsumer, interval: Duration, tx: SyncSender<StreamEvent>) {
    loop {
        let event = match consumer.poll() {
            PollOutcome::Idle => None,
            PollOutcome::Delta(text) => Some(StreamEvent::Delta(text)),
            PollOutcome::Completed { tail, status } => {
                let _ = tx.send(StreamEvent::Completed { tail, status });
                return;
            }
            PollOutcome::TimedOut { idle } => {
                let _ = tx.send(StreamEvent::TimedOut { idle });
                return;
            }
        };

        if let Some(event) = event {
            if tx.send(event).is_err() {
                // Receiver dropped; nobody is watching any more
                return;
            }
        }
        thread::sleep(interval);
    }
}
