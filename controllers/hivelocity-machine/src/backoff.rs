//! # Error Backoff
//!
//! Per-machine Fibonacci backoff for reconciliations that return an error.
//!
//! Handler outcomes (`Continue`, `Failed`, ...) carry their own requeue delay;
//! this backoff only applies when an error reaches the dispatcher.
//! Sequence: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max). A successful reconciliation
//! resets it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator, in whole minutes
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Return the current delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.max_minutes);
        delay
    }

    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Backoff sequences keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct BackoffRegistry {
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffRegistry {
    /// Record an error for `key` and return how long to wait
    pub fn record_error(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.entry(key.to_string()).or_default().next_backoff()
    }

    /// Forget the error history of `key`
    pub fn reset(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(backoff) = states.get_mut(key) {
            backoff.reset();
        }
    }

    /// Drop `key` entirely, e.g. once the machine is gone
    pub fn forget(&self, key: &str) {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(backoff: &mut FibonacciBackoff, n: usize) -> Vec<u64> {
        (0..n).map(|_| backoff.next_backoff().as_secs() / 60).collect()
    }

    #[test]
    fn test_fibonacci_sequence_is_capped() {
        let mut backoff = FibonacciBackoff::default();
        assert_eq!(minutes(&mut backoff, 9), vec![1, 1, 2, 3, 5, 8, 10, 10, 10]);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = FibonacciBackoff::default();
        minutes(&mut backoff, 4);
        backoff.reset();
        assert_eq!(minutes(&mut backoff, 3), vec![1, 1, 2]);
    }

    #[test]
    fn test_registry_tracks_keys_independently() {
        let registry = BackoffRegistry::default();
        assert_eq!(registry.record_error("ns/a"), Duration::from_secs(60));
        assert_eq!(registry.record_error("ns/a"), Duration::from_secs(60));
        assert_eq!(registry.record_error("ns/a"), Duration::from_secs(120));
        assert_eq!(registry.record_error("ns/b"), Duration::from_secs(60));

        registry.reset("ns/a");
        assert_eq!(registry.record_error("ns/a"), Duration::from_secs(60));
    }
}
