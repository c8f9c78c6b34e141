//! Fixed-capacity FIFO with blocking and non-blocking access.
//!
//! One `parking_lot` mutex guards the items together with the count of
//! reserved slots; two condition variables signal "content changed" and
//! "capacity changed". Every waiter re-checks its condition after waking, so
//! a single notification is never assumed to satisfy a single waiter.
//!
//! A `max_wait` of [`Duration::ZERO`] is an immediate probe: the condition
//! is checked once and the call returns without parking.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Debug)]
struct QueueInner<T> {
    items: VecDeque<T>,
    /// Slots handed out by `reserve` that are neither committed nor released.
    reserved: usize,
}

impl<T> QueueInner<T> {
    #[inline]
    fn occupied(&self) -> usize {
        self.items.len() + self.reserved
    }
}

/// A capacity slot held on behalf of a producer.
///
/// The slot counts against capacity but is invisible to consumers until
/// [`Reservation::commit`] publishes an item into it. Dropping an
/// uncommitted reservation gives the slot back.
pub struct Reservation<'a, T> {
    queue: &'a BoundedQueue<T>,
    committed: bool,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                reserved: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items visible to consumers.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `item`, waiting up to `max_wait` for room.
    ///
    /// On timeout the queue is unchanged and the item is handed back.
    pub fn try_enqueue(&self, item: T, max_wait: Duration) -> Result<(), T> {
        let capacity = self.capacity;
        let mut inner = self.inner.lock();
        if !wait_until(&self.not_full, &mut inner, deadline(max_wait), |q| {
            q.occupied() < capacity
        }) {
            return Err(item);
        }

        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Claims a capacity slot, waiting up to `max_wait` for one to free up.
    pub fn reserve(&self, max_wait: Duration) -> Option<Reservation<'_, T>> {
        let capacity = self.capacity;
        let mut inner = self.inner.lock();
        if !wait_until(&self.not_full, &mut inner, deadline(max_wait), |q| {
            q.occupied() < capacity
        }) {
            return None;
        }

        inner.reserved += 1;
        Some(Reservation {
            queue: self,
            committed: false,
        })
    }

    /// Removes the oldest item, waiting up to `max_wait` for one to arrive.
    pub fn try_dequeue(&self, max_wait: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        if !wait_until(&self.not_empty, &mut inner, deadline(max_wait), |q| {
            !q.items.is_empty()
        }) {
            return None;
        }

        let item = inner.items.pop_front();
        drop(inner);
        self.not_full.notify_all();
        item
    }

    /// Waits up to `max_wait` until at least one item is present, without
    /// taking it. Returns whether the queue was non-empty when the call
    /// returned; another consumer may still win the race for the item.
    pub fn wait_for_item(&self, max_wait: Duration) -> bool {
        let mut inner = self.inner.lock();
        wait_until(&self.not_empty, &mut inner, deadline(max_wait), |q| {
            !q.items.is_empty()
        })
    }

    /// Removes up to `max` items currently present, oldest first. Never
    /// waits for future arrivals.
    pub fn drain_up_to(&self, max: usize) -> Vec<T> {
        let mut inner = self.inner.lock();
        let take = max.min(inner.items.len());
        let drained: Vec<T> = inner.items.drain(..take).collect();
        drop(inner);

        if !drained.is_empty() {
            self.not_full.notify_all();
        }
        drained
    }

    /// Discards every queued item and returns how many were removed.
    /// Outstanding reservations are left alone.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.items.len();
        inner.items.clear();
        drop(inner);

        if removed > 0 {
            self.not_full.notify_all();
        }
        removed
    }
}

impl<T> Reservation<'_, T> {
    /// Publishes `item` into the reserved slot, at the back of the queue.
    pub fn commit(mut self, item: T) {
        let mut inner = self.queue.inner.lock();
        inner.reserved -= 1;
        inner.items.push_back(item);
        drop(inner);

        self.committed = true;
        self.queue.not_empty.notify_all();
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut inner = self.queue.inner.lock();
        inner.reserved -= 1;
        drop(inner);
        self.queue.not_full.notify_all();
    }
}

impl<T> fmt::Debug for Reservation<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("committed", &self.committed)
            .finish()
    }
}

/// `None` means the wait is unbounded (the addition overflowed `Instant`).
#[inline]
fn deadline(max_wait: Duration) -> Option<Instant> {
    Instant::now().checked_add(max_wait)
}

/// Parks on `condvar` until `ready` holds or `deadline` passes. The
/// condition is always evaluated first and again after every wake-up.
fn wait_until<T, F>(
    condvar: &Condvar,
    guard: &mut MutexGuard<'_, QueueInner<T>>,
    deadline: Option<Instant>,
    ready: F,
) -> bool
where
    F: Fn(&QueueInner<T>) -> bool,
{
    loop {
        if ready(&**guard) {
            return true;
        }
        match deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return false;
                }
                condvar.wait_until(guard, deadline);
            }
            None => condvar.wait(guard),
        }
    }
}
