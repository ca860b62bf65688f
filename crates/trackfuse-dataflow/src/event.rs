// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Event traits.

Every type pushed through a port implements [`Event`], which tells the
queue how to derive a scheduling priority and how many events per receiver
may pile up before the oldest are dropped. Measurements take their
priority from the measurement time; everything else defaults to the time
of sending.
*/

use crate::measurement::{now, Button, Measurement, Timestamp};

/// Default per-receiver queue cap for droppable event types.
pub const DEFAULT_MAX_QUEUE_LENGTH: i32 = 7;

/// Queue length meaning "never drop".
pub const UNLIMITED_QUEUE_LENGTH: i32 = -1;

/// A payload that can travel inside a [`Measurement`].
pub trait Payload: Send + Sync + 'static {
    /// Per-receiver queue cap for measurements of this payload.
    /// Negative means unlimited.
    const MAX_QUEUE_LENGTH: i32 = DEFAULT_MAX_QUEUE_LENGTH;
}

impl Payload for () {}
impl Payload for bool {}
impl Payload for i64 {}
impl Payload for f64 {}
impl Payload for String {}
impl<T: Payload> Payload for Vec<T> {}

impl Payload for Button {
    // button presses must not be dropped
    const MAX_QUEUE_LENGTH: i32 = UNLIMITED_QUEUE_LENGTH;
}

/// A value that can be pushed through the event queue.
pub trait Event: Clone + Send + Sync + 'static {
    /// The timestamp-derived scheduling priority of this event.
    fn priority(&self) -> Timestamp {
        now()
    }

    /// Maximum number of queued events per receiver; negative = unlimited.
    fn max_queue_length() -> i32 {
        DEFAULT_MAX_QUEUE_LENGTH
    }
}

impl<T: Payload> Event for Measurement<T> {
    fn priority(&self) -> Timestamp {
        self.time()
    }

    fn max_queue_length() -> i32 {
        T::MAX_QUEUE_LENGTH
    }
}
