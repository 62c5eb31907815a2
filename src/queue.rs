//! Bounded suspending handoff queue
//!
//! A generic MPMC queue where `enqueue` suspends when the buffer is full and
//! `dequeue` suspends when it is empty or fails with a timeout. Waiting calls
//! are served in strict FIFO order, and a waiter is resolved exactly once even
//! when a timeout or cancellation races with a concurrent handoff.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

/// Error returned by [`HandoffQueue::enqueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue was closed while the item was pending
    #[error("queue closed")]
    Closed,
}

/// Error returned by [`HandoffQueue::dequeue`] and
/// [`HandoffQueue::dequeue_timeout`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DequeueError {
    /// The deadline elapsed before an item was delivered
    #[error("dequeue timed out")]
    TimedOut,
    /// The queue was closed while the call was pending
    #[error("queue closed")]
    Closed,
}

/// A pending `enqueue`: the item plus its single-assignment completion slot.
struct ProducerWaiter<T> {
    id: u64,
    item: T,
    done: oneshot::Sender<()>,
}

/// A pending `dequeue`: a single-assignment result slot.
struct ConsumerWaiter<T> {
    id: u64,
    slot: oneshot::Sender<T>,
}

struct State<T> {
    items: VecDeque<T>,
    producers: VecDeque<ProducerWaiter<T>>,
    consumers: VecDeque<ConsumerWaiter<T>>,
    closed: bool,
    next_waiter: u64,
}

/// Bounded suspending queue with timeout-aware dequeue.
///
/// All internal state lives behind a single mutex that is never held across a
/// suspension point: fast paths complete inside one critical section, wait
/// paths register a waiter and release the lock before suspending, so a
/// wake-up can never be missed.
///
/// A capacity of zero is valid and turns every enqueue into a rendezvous with
/// a waiting consumer.
pub struct HandoffQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
}

enum FastOrWait<T> {
    Ready(T),
    Wait(u64, oneshot::Receiver<T>),
}

impl<T> HandoffQueue<T> {
    /// Create a queue buffering at most `capacity` undelivered items.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::new(),
                producers: VecDeque::new(),
                consumers: VecDeque::new(),
                closed: false,
                next_waiter: 0,
            }),
        }
    }

    /// Create a queue with effectively unlimited capacity.
    ///
    /// Used for control mailboxes where ordering matters but backpressure
    /// must never stall the sender.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Number of buffered (not yet consumed) items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Number of suspended `enqueue` calls.
    pub fn waiting_producers(&self) -> usize {
        self.lock().producers.len()
    }

    /// Number of suspended `dequeue` calls.
    pub fn waiting_consumers(&self) -> usize {
        self.lock().consumers.len()
    }

    /// Deliver an item, suspending while the buffer is full.
    ///
    /// If a consumer is already waiting the item is handed to it directly;
    /// otherwise it is buffered if capacity allows. With neither possible the
    /// call registers a FIFO waiter and suspends until a dequeue drains it.
    ///
    /// Dropping the returned future while suspended withdraws the waiter; if
    /// a dequeue already accepted the item, it stays accepted.
    pub async fn enqueue(&self, item: T) -> Result<(), EnqueueError> {
        let (done_tx, done_rx) = oneshot::channel();
        let id;
        {
            let mut st = self.lock();
            if st.closed {
                return Err(EnqueueError::Closed);
            }
            // fast path: hand off directly to the oldest waiting consumer
            let mut item = item;
            while let Some(consumer) = st.consumers.pop_front() {
                match consumer.slot.send(item) {
                    Ok(()) => return Ok(()),
                    // consumer gave up in the meantime, try the next one
                    Err(returned) => item = returned,
                }
            }
            // fast path: spare buffer capacity
            if st.items.len() < self.capacity {
                st.items.push_back(item);
                return Ok(());
            }
            // wait path: register, then release the lock before suspending
            id = st.next_waiter;
            st.next_waiter += 1;
            st.producers.push_back(ProducerWaiter {
                id,
                item,
                done: done_tx,
            });
        }
        let guard = WaitGuard {
            queue: self,
            id,
            side: Side::Producer,
            armed: true,
        };
        match done_rx.await {
            Ok(()) => {
                guard.disarm();
                Ok(())
            }
            // completion slot dropped: the queue was closed
            Err(_) => {
                guard.disarm();
                Err(EnqueueError::Closed)
            }
        }
    }

    /// Take the next item, suspending indefinitely while the queue is empty.
    pub async fn dequeue(&self) -> Result<T, DequeueError> {
        match self.pop_or_register()? {
            FastOrWait::Ready(item) => Ok(item),
            FastOrWait::Wait(id, rx) => {
                let guard = WaitGuard {
                    queue: self,
                    id,
                    side: Side::Consumer,
                    armed: true,
                };
                match rx.await {
                    Ok(item) => {
                        guard.disarm();
                        Ok(item)
                    }
                    Err(_) => {
                        guard.disarm();
                        Err(DequeueError::Closed)
                    }
                }
            }
        }
    }

    /// Take the next item, failing with [`DequeueError::TimedOut`] once
    /// `timeout` elapses.
    ///
    /// A zero or already-elapsed timeout still attempts the fast path once.
    ///
    /// When the deadline races with a concurrent handoff the outcome is
    /// settled under the queue's lock: if the waiter was already resolved,
    /// the delivered item is returned and the timeout is superseded; an item
    /// handed to this call is never dropped.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Result<T, DequeueError> {
        match self.pop_or_register()? {
            FastOrWait::Ready(item) => Ok(item),
            FastOrWait::Wait(id, mut rx) => {
                let guard = WaitGuard {
                    queue: self,
                    id,
                    side: Side::Consumer,
                    armed: true,
                };
                match tokio::time::timeout(timeout, &mut rx).await {
                    Ok(Ok(item)) => {
                        guard.disarm();
                        Ok(item)
                    }
                    Ok(Err(_)) => {
                        guard.disarm();
                        Err(DequeueError::Closed)
                    }
                    Err(_elapsed) => {
                        // Deadline raced with a possible concurrent handoff.
                        let resolved = {
                            let mut st = self.lock();
                            match st.consumers.iter().position(|c| c.id == id) {
                                Some(pos) => {
                                    let _ = st.consumers.remove(pos);
                                    false
                                }
                                None => true,
                            }
                        };
                        guard.disarm();
                        if resolved {
                            // A counterpart already assigned the result; the
                            // item is sitting in the slot and must not be lost.
                            match rx.try_recv() {
                                Ok(item) => Ok(item),
                                Err(_) => Err(DequeueError::Closed),
                            }
                        } else {
                            Err(DequeueError::TimedOut)
                        }
                    }
                }
            }
        }
    }

    /// Close the queue, failing every suspended call with `Closed`.
    ///
    /// Buffered items are retained but never drained; subsequent operations
    /// fail immediately. Idempotent.
    pub fn close(&self) {
        let mut st = self.lock();
        st.closed = true;
        // Dropping the slots wakes the suspended counterparts with an error.
        st.producers.clear();
        st.consumers.clear();
    }

    /// Fast path of a dequeue, or registration of a consumer waiter.
    fn pop_or_register(&self) -> Result<FastOrWait<T>, DequeueError> {
        let mut st = self.lock();
        if st.closed {
            return Err(DequeueError::Closed);
        }
        if let Some(item) = st.items.pop_front() {
            // Backfill the freed slot from the oldest waiting producer so
            // producers are drained in arrival order.
            if let Some(producer) = st.producers.pop_front() {
                st.items.push_back(producer.item);
                let _ = producer.done.send(());
            }
            return Ok(FastOrWait::Ready(item));
        }
        // Rendezvous: with capacity zero the buffer is always empty and a
        // waiting producer hands its item over directly.
        if let Some(producer) = st.producers.pop_front() {
            let _ = producer.done.send(());
            return Ok(FastOrWait::Ready(producer.item));
        }
        let (tx, rx) = oneshot::channel();
        let id = st.next_waiter;
        st.next_waiter += 1;
        st.consumers.push_back(ConsumerWaiter { id, slot: tx });
        Ok(FastOrWait::Wait(id, rx))
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // The critical sections cannot leave the state inconsistent, so a
        // poisoned lock is recoverable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Copy)]
enum Side {
    Producer,
    Consumer,
}

/// Withdraws a registered waiter when a suspended call is dropped.
///
/// Removal happens under the queue's lock, so it can never race with a
/// counterpart resolving the same waiter: whichever takes the lock first
/// wins, and the other finds nothing left to do.
struct WaitGuard<'a, T> {
    queue: &'a HandoffQueue<T>,
    id: u64,
    side: Side,
    armed: bool,
}

impl<T> WaitGuard<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T> Drop for WaitGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = self.queue.lock();
        match self.side {
            Side::Producer => st.producers.retain(|p| p.id != self.id),
            Side::Consumer => st.consumers.retain(|c| c.id != self.id),
        }
    }
}
