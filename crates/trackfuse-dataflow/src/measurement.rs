// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Timestamps and measurements.

A measurement is an immutable, timestamped snapshot shared between ports.
The payload sits behind an `Arc`: ports never own measurements, they hold
references to the same snapshot.
*/

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch.
pub type Timestamp = u64;

/// The current time as a measurement timestamp.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// An immutable timestamped value.
#[derive(Debug)]
pub struct Measurement<T> {
    time: Timestamp,
    value: Arc<T>,
}

impl<T> Measurement<T> {
    pub fn new(time: Timestamp, value: T) -> Self {
        Measurement { time, value: Arc::new(value) }
    }

    pub fn from_shared(time: Timestamp, value: Arc<T>) -> Self {
        Measurement { time, value }
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn shared(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }
}

impl<T> Clone for Measurement<T> {
    fn clone(&self) -> Self {
        Measurement { time: self.time, value: Arc::clone(&self.value) }
    }
}

/// A button or signal payload. Button events must never be dropped from
/// the event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Button(pub i32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_is_shared_snapshot() {
        let m = Measurement::new(100, vec![1.0, 2.0]);
        let m2 = m.clone();
        assert_eq!(m.time(), 100);
        assert!(Arc::ptr_eq(&m.shared(), &m2.shared()));
    }

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }
}
