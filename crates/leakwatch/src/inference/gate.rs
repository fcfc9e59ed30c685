//! Bounded, optionally serialized access to an inference adapter.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use super::{AdapterError, InferenceAdapter, Score};
use crate::model::{Explanation, FeatureRow};

/// Runs the adapter and returns the step that hands the result back.
type Call = Box<dyn FnOnce() -> Deliver + Send + 'static>;
type Deliver = Box<dyn FnOnce() + Send + 'static>;

/// Wraps an adapter so every call carries a timeout, and calls into an
/// adapter that is not thread-safe never overlap.
///
/// Calls run on long-lived call threads. The timeout starts once the call is
/// handed to a free thread; waiting for the serialization lock does not
/// count. When the timeout elapses the caller gets [`AdapterError::Timeout`]
/// and whatever the call produces later is dropped.
#[derive(Clone)]
pub struct AdapterGate {
    adapter: Arc<dyn InferenceAdapter>,
    timeout: Duration,
    serial: Option<Arc<Mutex<()>>>,
    threads: Arc<CallThreads>,
}

impl AdapterGate {
    pub fn new(adapter: Arc<dyn InferenceAdapter>, timeout: Duration) -> Self {
        let (serial, limit) = if adapter.is_thread_safe() {
            (None, None)
        } else {
            (Some(Arc::new(Mutex::new(()))), Some(1))
        };
        Self {
            adapter,
            timeout,
            serial,
            threads: Arc::new(CallThreads::new(limit)),
        }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Concurrency limit to size worker pools against. Serialized adapters
    /// report 1.
    pub fn max_concurrency(&self) -> Option<usize> {
        if self.serial.is_some() {
            return Some(1);
        }
        self.adapter.max_concurrency()
    }

    pub fn score(&self, row: &FeatureRow) -> Result<Score, AdapterError> {
        let score = self.call(row, |adapter, row| adapter.score(row))?;
        if !score.anomaly_score.is_finite() || !(0.0..=1.0).contains(&score.anomaly_score) {
            return Err(AdapterError::Unavailable(format!(
                "adapter '{}' returned score {} outside [0, 1]",
                self.adapter.name(),
                score.anomaly_score
            )));
        }
        Ok(score)
    }

    pub fn explain(&self, row: &FeatureRow) -> Result<Explanation, AdapterError> {
        self.call(row, |adapter, row| adapter.explain(row))
    }

    fn call<T: Send + 'static>(
        &self,
        row: &FeatureRow,
        f: fn(&dyn InferenceAdapter, &FeatureRow) -> Result<T, AdapterError>,
    ) -> Result<T, AdapterError> {
        // Held until this caller has its answer or gives up.
        let _turn = self
            .serial
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner));

        let (tx, rx) = bounded(1);
        let adapter = Arc::clone(&self.adapter);
        let row = row.clone();
        self.threads.run(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(adapter.as_ref(), &row)))
                .unwrap_or_else(|_| {
                    Err(AdapterError::Unavailable("adapter call panicked".to_string()))
                });
            let deliver: Deliver = Box::new(move || {
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(result);
            });
            deliver
        }))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Adapter '{}' did not answer within {:?}",
                    self.adapter.name(),
                    self.timeout
                );
                Err(AdapterError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(AdapterError::Unavailable(format!(
                "adapter '{}' call aborted",
                self.adapter.name()
            ))),
        }
    }
}

/// Reusable threads for adapter calls. Every handed-over call either claims
/// an idle thread or gets a new one, so it starts at once. With a limit the
/// pool stops growing and calls queue behind a call that timed out but is
/// still running. Threads exit when the last gate clone is dropped.
struct CallThreads {
    sender: Sender<Call>,
    receiver: Receiver<Call>,
    idle: Arc<AtomicUsize>,
    spawned: AtomicUsize,
    limit: Option<usize>,
}

impl CallThreads {
    fn new(limit: Option<usize>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            idle: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
            limit,
        }
    }

    fn run(&self, call: Call) -> Result<(), AdapterError> {
        let claimed = self
            .idle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let at_limit = self
            .limit
            .is_some_and(|limit| self.spawned.load(Ordering::SeqCst) >= limit);
        if !claimed && !at_limit {
            self.spawn()?;
        }
        self.sender
            .send(call)
            .map_err(|_| AdapterError::Unavailable("adapter call threads stopped".to_string()))
    }

    fn spawn(&self) -> Result<(), AdapterError> {
        let id = self.spawned.fetch_add(1, Ordering::SeqCst);
        let receiver = self.receiver.clone();
        let idle = Arc::clone(&self.idle);
        thread::Builder::new()
            .name(format!("leakwatch-adapter-{}", id))
            .spawn(move || {
                while let Ok(call) = receiver.recv() {
                    let deliver = call();
                    // Idle before the caller sees the result, so its next
                    // call reuses this thread.
                    idle.fetch_add(1, Ordering::SeqCst);
                    deliver();
                }
            })
            .map(|_| ())
            .map_err(|e| {
                self.spawned.fetch_sub(1, Ordering::SeqCst);
                AdapterError::Unavailable(format!("failed to spawn adapter thread: {}", e))
            })
    }

    #[cfg(test)]
    fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}
