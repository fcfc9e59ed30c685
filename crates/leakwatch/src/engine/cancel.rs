//! Cancellation tokens and per-job deadlines.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use dashmap::DashMap;

/// Shared flag a runner polls between rows. The first cancellation reason
/// sticks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    reason: Arc<OnceLock<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token. Returns false if it was already tripped.
    pub fn cancel(&self, reason: &str) -> bool {
        self.reason.set(reason.to_string()).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}

struct Entry {
    token: CancelToken,
    deadline: Option<Instant>,
}

/// Tokens of jobs that have not finished yet.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    entries: Arc<DashMap<String, Entry>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job and returns its token.
    pub fn register(&self, job_id: &str, deadline: Option<Instant>) -> CancelToken {
        let token = CancelToken::new();
        self.entries.insert(
            job_id.to_string(),
            Entry {
                token: token.clone(),
                deadline,
            },
        );
        token
    }

    /// Trips the job's token. Returns false if the job is not registered.
    pub fn cancel(&self, job_id: &str, reason: &str) -> bool {
        match self.entries.get(job_id) {
            Some(entry) => {
                entry.token.cancel(reason);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, job_id: &str) {
        self.entries.remove(job_id);
    }

    /// Trips the tokens of jobs whose deadline is at or before `now` and
    /// returns their ids. Jobs already cancelled are left out.
    pub fn expire(&self, now: Instant, reason: &str) -> Vec<String> {
        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            let due = entry.deadline.is_some_and(|d| d <= now);
            if due && entry.token.cancel(reason) {
                expired.push(entry.key().clone());
            }
        }
        expired
    }

    /// Trips every registered token and returns the job ids.
    pub fn cancel_all(&self, reason: &str) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| {
                entry.token.cancel(reason);
                entry.key().clone()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
