// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
The prioritized event queue.

A process-wide queue delivers push events in ascending priority order from
a single worker thread. Each receiver carries a queue cap; when a batch
overfills a receiver, the oldest events are dropped. Handler panics are
caught and logged so the worker never dies.

State machine: `stopped -> running -> stopping -> stopped -> end`.
`dispatch_now` drains the queue on the caller's thread for tests and
deterministic drivers.
*/

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::component::ComponentCore;
use crate::measurement::{now, Timestamp};

/// Minimum interval between "events dropped" warnings.
const DROP_MESSAGE_INTERVAL: Timestamp = 1_000_000_000;

/// Queue-length bookkeeping for one event receiver. Every push consumer
/// owns one of these; events in the queue point back to it.
pub struct ReceiverInfo {
    port_name: String,
    component: Arc<ComponentCore>,
    max_queue_length: i32,
    queued: AtomicI32,
}

impl ReceiverInfo {
    pub fn new(
        port_name: impl Into<String>,
        component: Arc<ComponentCore>,
        max_queue_length: i32,
    ) -> Arc<Self> {
        Arc::new(ReceiverInfo {
            port_name: port_name.into(),
            component,
            max_queue_length,
            queued: AtomicI32::new(0),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn component(&self) -> &Arc<ComponentCore> {
        &self.component
    }

    /// Number of events currently queued for this receiver.
    pub fn queued_events(&self) -> i32 {
        self.queued.load(Ordering::Relaxed)
    }

    fn over_cap(&self) -> bool {
        self.max_queue_length > 0 && self.queued.load(Ordering::Relaxed) > self.max_queue_length
    }
}

impl std::fmt::Debug for ReceiverInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverInfo")
            .field("port", &self.port_name)
            .field("max_queue_length", &self.max_queue_length)
            .field("queued", &self.queued_events())
            .finish()
    }
}

/// One queued event: the receiver, the type-erased callable and the
/// computed priority. The queue never inspects the payload.
pub struct QueueItem {
    pub receiver: Option<Arc<ReceiverInfo>>,
    pub callback: Box<dyn FnOnce() + Send>,
    pub priority: u64,
}

impl QueueItem {
    pub fn new(
        receiver: Option<Arc<ReceiverInfo>>,
        priority: u64,
        callback: Box<dyn FnOnce() + Send>,
    ) -> Self {
        QueueItem { receiver, callback, priority }
    }
}

/// Anything that accepts event batches. The global queue implements this;
/// tests and deterministic drivers may substitute a synchronous sink.
pub trait EventSink: Send + Sync {
    fn queue(&self, batch: Vec<QueueItem>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Running,
    Stopping,
    End,
}

struct Inner {
    queue: VecDeque<QueueItem>,
    state: State,
    last_drop_message: Timestamp,
    suppressed_drop_messages: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    signal: Condvar,
}

/// The event queue with its worker thread.
pub struct EventQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    /// Creates a queue in the stopped state and spawns its worker.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                state: State::Stopped,
                last_drop_message: 0,
                suppressed_drop_messages: 0,
            }),
            signal: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("event-queue".into())
            .spawn(move || worker_loop(worker_shared))
            .ok();
        if worker.is_none() {
            warn!("could not spawn event queue worker; only dispatch_now will deliver");
        }

        EventQueue { shared, worker: Mutex::new(worker) }
    }

    /// Starts event delivery.
    pub fn start(&self) {
        info!("event queue started");
        let mut inner = self.shared.inner.lock();
        inner.state = State::Running;
        self.shared.signal.notify_all();
    }

    /// Stops event delivery. Blocks until the worker confirms.
    pub fn stop(&self) {
        debug!("stopping event queue");
        let mut inner = self.shared.inner.lock();
        if inner.state != State::Stopped {
            inner.state = State::Stopping;
            self.shared.signal.notify_all();
            while inner.state != State::Stopped {
                self.shared.signal.wait(&mut inner);
            }
        }
        info!("event queue stopped");
    }

    /// Appends a batch of events atomically, sorted by priority, then
    /// drops head events of receivers that exceeded their cap.
    pub fn queue(&self, batch: Vec<QueueItem>) {
        let mut inner = self.shared.inner.lock();
        debug!("received {} events, enqueueing", batch.len());

        for item in batch {
            if let Some(receiver) = &item.receiver {
                receiver.queued.fetch_add(1, Ordering::Relaxed);
            }
            // adding at the back is the common case; otherwise keep equal
            // priorities in arrival order
            if inner.queue.back().map(|b| b.priority <= item.priority).unwrap_or(true) {
                inner.queue.push_back(item);
            } else {
                let index = inner
                    .queue
                    .iter()
                    .position(|queued| queued.priority > item.priority)
                    .unwrap_or(inner.queue.len());
                inner.queue.insert(index, item);
            }
        }

        // keep dropping the head while its receiver is over cap
        loop {
            let over = match inner.queue.front().and_then(|f| f.receiver.as_ref()) {
                Some(receiver) => receiver.over_cap(),
                None => false,
            };
            if !over {
                break;
            }
            let item = inner.queue.pop_front().expect("front checked above");
            if let Some(receiver) = &item.receiver {
                receiver.queued.fetch_sub(1, Ordering::Relaxed);
                let port = receiver.port_name.clone();
                log_drop(&mut inner, &port);
            }
        }

        if inner.state == State::Running {
            self.shared.signal.notify_all();
        }
    }

    /// Removes every queued event routed to any port of the component.
    pub fn remove_component(&self, component_name: &str) {
        debug!("removing events for component {}", component_name);
        let mut inner = self.shared.inner.lock();
        inner.queue.retain(|item| match &item.receiver {
            Some(receiver) if receiver.component.name() == component_name => {
                receiver.queued.fetch_sub(1, Ordering::Relaxed);
                false
            }
            _ => true,
        });
    }

    /// Removes all queued events.
    pub fn clear(&self) {
        debug!("removing all events from queue");
        let mut inner = self.shared.inner.lock();
        for item in &inner.queue {
            if let Some(receiver) = &item.receiver {
                receiver.queued.fetch_sub(1, Ordering::Relaxed);
            }
        }
        inner.queue.clear();
    }

    /// Dispatches the whole queue on the calling thread.
    pub fn dispatch_now(&self) {
        loop {
            let job = {
                let mut inner = self.shared.inner.lock();
                match take_front(&mut inner) {
                    TakeResult::Empty => return,
                    TakeResult::Dropped => continue,
                    TakeResult::Job(receiver, callback) => (receiver, callback),
                }
            };
            dispatch(job.0, job.1);
        }
    }

    /// Number of currently queued events.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.state = State::End;
            self.shared.signal.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        debug!("destroyed event queue");
    }
}

impl EventSink for EventQueue {
    fn queue(&self, batch: Vec<QueueItem>) {
        EventQueue::queue(self, batch);
    }
}

enum TakeResult {
    Empty,
    Dropped,
    Job(Option<Arc<ReceiverInfo>>, Box<dyn FnOnce() + Send>),
}

/// Pops the front event, re-checking the receiver cap.
fn take_front(inner: &mut Inner) -> TakeResult {
    let Some(item) = inner.queue.pop_front() else {
        return TakeResult::Empty;
    };
    match &item.receiver {
        Some(receiver) => {
            let over = receiver.over_cap();
            receiver.queued.fetch_sub(1, Ordering::Relaxed);
            if over {
                let port = receiver.port_name.clone();
                log_drop(inner, &port);
                TakeResult::Dropped
            } else {
                TakeResult::Job(item.receiver, item.callback)
            }
        }
        None => TakeResult::Job(None, item.callback),
    }
}

/// Invokes one event callback under the receiver's component mutex.
/// Panics are contained; the dispatcher carries on.
fn dispatch(receiver: Option<Arc<ReceiverInfo>>, callback: Box<dyn FnOnce() + Send>) {
    let result = catch_unwind(AssertUnwindSafe(|| match &receiver {
        Some(info) => {
            let _guard = info.component.mutex().lock();
            callback();
        }
        None => callback(),
    }));
    if result.is_err() {
        warn!(
            "event handler for {} panicked",
            receiver.as_ref().map(|r| r.port_name.as_str()).unwrap_or("(unknown)")
        );
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut inner = shared.inner.lock();
            match inner.state {
                State::End => {
                    debug!("ending event queue thread");
                    return;
                }
                State::Stopping => {
                    inner.state = State::Stopped;
                    shared.signal.notify_all();
                    continue;
                }
                State::Running if !inner.queue.is_empty() => match take_front(&mut inner) {
                    TakeResult::Job(receiver, callback) => Some((receiver, callback)),
                    _ => continue,
                },
                _ => {
                    shared.signal.wait(&mut inner);
                    continue;
                }
            }
        };

        if let Some((receiver, callback)) = job {
            dispatch(receiver, callback);
        }
    }
}

/// Rate-limited "events dropped" logging.
fn log_drop(inner: &mut Inner, port_name: &str) {
    let t = now();
    if t > inner.last_drop_message + DROP_MESSAGE_INTERVAL {
        warn!(
            "queue too long, dropping event for {} (skipped {} messages)",
            port_name, inner.suppressed_drop_messages
        );
        inner.suppressed_drop_messages = 0;
        inner.last_drop_message = t;
    } else {
        inner.suppressed_drop_messages += 1;
        debug!("queue too long, dropping event for {}", port_name);
    }
}

static GLOBAL: Mutex<Option<Arc<EventQueue>>> = Mutex::new(None);
static DISPATCHER: Mutex<Option<Arc<dyn EventSink>>> = Mutex::new(None);

/// The process-wide event queue, created on first use.
pub fn global() -> Arc<EventQueue> {
    let mut guard = GLOBAL.lock();
    guard.get_or_insert_with(|| Arc::new(EventQueue::new())).clone()
}

/// Tears down the process-wide queue: signals end and joins the worker.
pub fn destroy_global() {
    GLOBAL.lock().take();
}

/// The sink used by push suppliers: an injected dispatcher if set,
/// otherwise the global queue.
pub fn dispatcher() -> Arc<dyn EventSink> {
    if let Some(sink) = DISPATCHER.lock().clone() {
        return sink;
    }
    global()
}

/// Overrides the event sink (pass `None` to restore the global queue).
/// Tests use this to inject a synchronous dispatcher.
pub fn set_dispatcher(sink: Option<Arc<dyn EventSink>>) {
    *DISPATCHER.lock() = sink;
}

/// A sink that executes events immediately on the calling thread, in
/// arrival order, still honoring the component mutex.
pub struct ImmediateDispatcher;

impl EventSink for ImmediateDispatcher {
    fn queue(&self, batch: Vec<QueueItem>) {
        for item in batch {
            dispatch(item.receiver, item.callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn receiver(cap: i32) -> Arc<ReceiverInfo> {
        ReceiverInfo::new("c:in", ComponentCore::new("c"), cap)
    }

    fn item(
        receiver: &Arc<ReceiverInfo>,
        priority: u64,
        log: &Arc<Mutex<Vec<u64>>>,
    ) -> QueueItem {
        let log = Arc::clone(log);
        QueueItem::new(
            Some(Arc::clone(receiver)),
            priority,
            Box::new(move || log.lock().push(priority)),
        )
    }

    #[test]
    fn test_priority_order_and_fifo_for_equal() {
        let queue = EventQueue::new();
        let r = receiver(-1);
        let log = Arc::new(Mutex::new(Vec::new()));

        // out-of-order priorities plus two equal ones
        queue.queue(vec![item(&r, 30, &log)]);
        queue.queue(vec![item(&r, 10, &log), item(&r, 20, &log)]);
        queue.queue(vec![item(&r, 20, &log)]);
        queue.dispatch_now();

        assert_eq!(*log.lock(), vec![10, 20, 20, 30]);
    }

    #[test]
    fn test_fifo_order_within_equal_priority() {
        let queue = EventQueue::new();
        let r = receiver(-1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5u64 {
            let order = Arc::clone(&order);
            queue.queue(vec![QueueItem::new(
                Some(Arc::clone(&r)),
                7,
                Box::new(move || order.lock().push(i)),
            )]);
        }
        queue.dispatch_now();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queue_cap_drops_oldest() {
        let queue = EventQueue::new();
        let r = receiver(3);
        let log = Arc::new(Mutex::new(Vec::new()));

        // S6: ten events in one batch against a cap of three
        let batch: Vec<QueueItem> = (0..10).map(|i| item(&r, i, &log)).collect();
        queue.queue(batch);

        assert_eq!(queue.len(), 3);
        assert_eq!(r.queued_events(), 3);

        queue.dispatch_now();
        // the three newest survive
        assert_eq!(*log.lock(), vec![7, 8, 9]);
        assert_eq!(r.queued_events(), 0);
    }

    #[test]
    fn test_unlimited_receiver_never_drops() {
        let queue = EventQueue::new();
        let r = receiver(-1);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.queue((0..100).map(|i| item(&r, i, &log)).collect());
        assert_eq!(queue.len(), 100);
        queue.dispatch_now();
        assert_eq!(log.lock().len(), 100);
    }

    #[test]
    fn test_remove_component_and_clear() {
        let queue = EventQueue::new();
        let ra = receiver(-1);
        let rb = ReceiverInfo::new("other:in", ComponentCore::new("other"), -1);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.queue(vec![item(&ra, 1, &log), item(&rb, 2, &log), item(&ra, 3, &log)]);

        queue.remove_component("c");
        assert_eq!(queue.len(), 1);
        assert_eq!(ra.queued_events(), 0);
        assert_eq!(rb.queued_events(), 1);

        queue.clear();
        assert_eq!(queue.len(), 0);
        assert_eq!(rb.queued_events(), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_kill_dispatch() {
        let queue = EventQueue::new();
        let r = receiver(-1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        queue.queue(vec![
            QueueItem::new(Some(Arc::clone(&r)), 1, Box::new(|| panic!("boom"))),
            QueueItem::new(
                Some(Arc::clone(&r)),
                2,
                Box::new(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                }),
            ),
        ]);
        queue.dispatch_now();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_worker_thread_delivers_after_start() {
        let queue = EventQueue::new();
        let r = receiver(-1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        queue.start();
        queue.queue(vec![QueueItem::new(
            Some(Arc::clone(&r)),
            1,
            Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }),
        )]);
        // the worker drains asynchronously; stop() synchronizes with it
        for _ in 0..200 {
            if counter.load(Ordering::Relaxed) == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        queue.stop();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
