//! Serialized event queue and executor
//!
//! All strategy callbacks run through here: producers (scheduler timers,
//! quote ingest, direct submitters) enqueue closures, and a single consumer
//! loop pops them in FIFO order and runs them one at a time. That single
//! consumer is the only place strategy code ever executes, so callbacks need
//! no locking of their own. A fault inside a popped closure is caught and
//! logged; only the poison event (or every sender dropping) ends the loop.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// A queued unit of work
pub type EventFn = Box<dyn FnOnce() + Send + 'static>;

/// Event execution errors
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// The closure panicked while running
    #[error("Event panicked: {0}")]
    Panicked(String),
    /// The executor has already shut down
    #[error("Event queue closed")]
    QueueClosed,
    /// The event was dropped before it ran
    #[error("Event dropped before execution")]
    Dropped,
}

enum Event {
    Task {
        f: EventFn,
        done: Option<oneshot::Sender<Result<(), EventError>>>,
    },
    Poison,
}

/// Producer half: enqueue closures for the executor
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Event>,
}

/// Resolves once the submitted closure has run
pub struct EventHandle {
    rx: oneshot::Receiver<Result<(), EventError>>,
}

impl EventHandle {
    /// Wait for the closure to finish; surfaces a caught closure fault
    pub async fn wait(self) -> Result<(), EventError> {
        self.rx.await.map_err(|_| EventError::Dropped)?
    }
}

impl EventQueue {
    /// Create a connected queue/executor pair
    pub fn new() -> (Self, Executor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Executor { rx })
    }

    /// Enqueue work and return a handle the caller can wait on
    pub fn submit(
        &self,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<EventHandle, EventError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Event::Task {
                f: Box::new(f),
                done: Some(done_tx),
            })
            .map_err(|_| EventError::QueueClosed)?;
        Ok(EventHandle { rx: done_rx })
    }

    /// Enqueue fire-and-forget work
    pub fn post(&self, f: impl FnOnce() + Send + 'static) -> Result<(), EventError> {
        self.tx
            .send(Event::Task {
                f: Box::new(f),
                done: None,
            })
            .map_err(|_| EventError::QueueClosed)
    }

    /// Enqueue the poison event; the executor exits after draining prior events
    pub fn poison(&self) {
        let _ = self.tx.send(Event::Poison);
    }
}

/// Consumer half: the sole runner of strategy closures
pub struct Executor {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Executor {
    /// Pop and run events in FIFO order until poisoned
    pub async fn run_loop(mut self) {
        while let Some(event) = self.rx.recv().await {
            match event {
                Event::Poison => {
                    tracing::debug!("Poison event observed, stopping executor");
                    break;
                }
                Event::Task { f, done } => {
                    let result = catch_unwind(AssertUnwindSafe(f))
                        .map_err(|p| EventError::Panicked(panic_message(p)));
                    metrics::counter!("quantrun_events_processed_total").increment(1);
                    if let Err(ref e) = result {
                        metrics::counter!("quantrun_events_faulted_total").increment(1);
                        tracing::error!(error = %e, "Event raised a fault; loop continues");
                    }
                    if let Some(done) = done {
                        let _ = done.send(result);
                    }
                }
            }
        }
        tracing::info!("Event loop stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_events_run_in_fifo_order() {
        let (queue, executor) = EventQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["A", "B", "C"] {
            let seen = seen.clone();
            queue.post(move || seen.lock().unwrap().push(label)).unwrap();
        }
        queue.poison();
        executor.run_loop().await;

        assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_fifo_across_submitting_tasks() {
        let (queue, executor) = EventQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        // Each label is posted from its own spawned task; the handshake
        // releases the next submitter only after the previous one enqueued,
        // so the cross-task submission order is externally imposed
        for label in ["A", "B", "C", "D"] {
            let (done_tx, done_rx) = oneshot::channel();
            let queue = queue.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                queue.post(move || seen.lock().unwrap().push(label)).unwrap();
                let _ = done_tx.send(());
            });
            done_rx.await.unwrap();
        }

        queue.poison();
        executor.run_loop().await;

        assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_submit_handle_resolves_after_run() {
        let (queue, executor) = EventQueue::new();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();

        let handle = queue.submit(move || *flag.lock().unwrap() = true).unwrap();
        queue.poison();
        executor.run_loop().await;

        assert!(handle.wait().await.is_ok());
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn test_fault_is_contained_and_loop_continues() {
        let (queue, executor) = EventQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let bad = queue.submit(|| panic!("boom")).unwrap();
        let seen2 = seen.clone();
        let good = queue.submit(move || seen2.lock().unwrap().push("ok")).unwrap();
        queue.poison();
        executor.run_loop().await;

        match bad.wait().await {
            Err(EventError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected Panicked, got {:?}", other),
        }
        assert!(good.wait().await.is_ok());
        assert_eq!(*seen.lock().unwrap(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_events_after_poison_do_not_run() {
        let (queue, executor) = EventQueue::new();
        let seen = Arc::new(Mutex::new(0u32));

        queue.poison();
        let seen2 = seen.clone();
        queue.post(move || *seen2.lock().unwrap() += 1).unwrap();
        executor.run_loop().await;

        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_dropped_when_never_run() {
        let (queue, executor) = EventQueue::new();
        queue.poison();
        let handle = queue.submit(|| {}).unwrap();
        executor.run_loop().await;
        assert!(matches!(handle.wait().await, Err(EventError::Dropped)));
    }

    #[tokio::test]
    async fn test_submit_after_executor_gone() {
        let (queue, executor) = EventQueue::new();
        queue.poison();
        executor.run_loop().await;
        // Executor dropped its receiver; submission must fail, not hang
        assert!(matches!(
            queue.post(|| {}),
            Err(EventError::QueueClosed)
        ));
    }
}
