//! turn_mpmc - bounded MPMC queue with strict FIFO ordering
//!
//! Producers and consumers each draw a ticket from their own counter with a
//! single `fetch_add`, map it onto a power-of-two ring of slots and wait for
//! that slot's turn. There is no lock and no "is full" check: backpressure
//! comes from the turn handshake alone.
//!
//! For ticket `t` on a ring of `N` slots, slot `t & (N - 1)` is
//!
//! * writable when its turn equals `2t`,
//! * readable when its turn equals `2t + 1`,
//! * handed to the next lap (`2(t + N)`) once read.
//!
//! Doubling keeps write and read turns disjoint even at `N = 1`, where the
//! next lap's ticket `t + 1` would otherwise collide with the read turn.
//!
//! Both `push` and `pop` block by busy-waiting; there are no `try_` variants,
//! no timeouts and no cancellation.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//! use turn_mpmc::Queue;
//!
//! let queue = Arc::new(Queue::<u32, 8>::new());
//! let producer = {
//!     let queue = queue.clone();
//!     thread::spawn(move || (0..100).for_each(|i| queue.push(i)))
//! };
//! let sum: u32 = (0..100).map(|_| queue.pop()).sum();
//! producer.join().unwrap();
//! assert_eq!(sum, 4950);
//! ```
#![warn(missing_docs)]

use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

#[cfg(not(loom))]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(not(loom))]
use std::thread;

#[cfg(loom)]
use loom::cell::UnsafeCell;
#[cfg(loom)]
use loom::sync::atomic::{AtomicUsize, Ordering};
#[cfg(loom)]
use loom::thread;

/// `core::cell::UnsafeCell` behind loom's closure-based access API.
#[cfg(not(loom))]
struct UnsafeCell<T>(core::cell::UnsafeCell<T>);

#[cfg(not(loom))]
impl<T> UnsafeCell<T> {
    fn new(value: T) -> Self {
        UnsafeCell(core::cell::UnsafeCell::new(value))
    }

    #[inline]
    fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        f(self.0.get())
    }
}

/// Polls spent on `spin_loop` before the waiter starts yielding its thread.
const SPIN_LIMIT: u32 = 64;

#[repr(C, align(64))]
struct Slot<T> {
    turn: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new(turn: usize) -> Self {
        Slot {
            turn: AtomicUsize::new(turn),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Blocks until the slot's turn reaches `expected`.
    ///
    /// The `Acquire` load pairs with the `Release` store that set the turn,
    /// so everything the previous owner wrote into `value` is visible here.
    #[inline]
    fn wait_for(&self, expected: usize) {
        let mut wait = TurnWait::new();
        while self.turn.load(Ordering::Acquire) != expected {
            wait.snooze();
        }
    }
}

/// Bounded multi-producer multi-consumer FIFO queue of capacity `N`.
///
/// `N` must be a non-zero power of two; [`Queue::new`] panics otherwise.
pub struct Queue<T, const N: usize> {
    slots: Box<[Slot<T>]>,
    /// Next enqueue ticket.
    head: CachePadded<AtomicUsize>,
    /// Next dequeue ticket.
    tail: CachePadded<AtomicUsize>,
    _marker: PhantomData<T>,
}

impl<T, const N: usize> Queue<T, N> {
    /// Number of slots in the ring.
    pub const CAPACITY: usize = N;

    const MASK: usize = N.wrapping_sub(1);

    /// Turn at which the slot for `ticket` accepts that ticket's push.
    #[inline]
    const fn write_turn(ticket: usize) -> usize {
        ticket.wrapping_mul(2)
    }

    /// Turn at which the slot for `ticket` holds that ticket's value.
    #[inline]
    const fn read_turn(ticket: usize) -> usize {
        Self::write_turn(ticket).wrapping_add(1)
    }

    /// Creates an empty queue.
    ///
    /// # Panics
    ///
    /// If `N` is zero or not a power of two.
    pub fn new() -> Self {
        assert!(N > 0, "capacity must be greater than 0");
        assert!(N.is_power_of_two(), "capacity must be a power of 2");

        let slots: Box<[Slot<T>]> = (0..N).map(|i| Slot::new(Self::write_turn(i))).collect();
        tracing::debug!(
            capacity = N,
            element = core::any::type_name::<T>(),
            "created bounded mpmc queue"
        );

        Queue {
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            _marker: PhantomData,
        }
    }

    /// Appends `value`, blocking while the slot for this call's ticket is
    /// still occupied by the element pushed `N` tickets earlier.
    pub fn push(&self, value: T) {
        let ticket = self.head.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(ticket);
        slot.wait_for(Self::write_turn(ticket));

        // Safety: only our ticket maps to this write turn, so no other thread
        // touches the slot until we publish the read turn. The previous
        // occupant (if any) was moved out by the pop that set it.
        slot.value.with_mut(|cell| unsafe {
            (*cell).write(value);
        });
        slot.turn.store(Self::read_turn(ticket), Ordering::Release);
    }

    /// Removes the oldest element, blocking until the push holding the
    /// matching enqueue ticket has written it.
    pub fn pop(&self) -> T {
        let ticket = self.tail.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(ticket);
        slot.wait_for(Self::read_turn(ticket));

        // Safety: the read turn is only published after the push for
        // `ticket` initialized the value, and we are its only reader.
        let value = slot.value.with_mut(|cell| unsafe { (*cell).assume_init_read() });
        slot.turn.store(Self::write_turn(ticket.wrapping_add(N)), Ordering::Release);
        value
    }

    /// Fixed capacity of the ring.
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    fn slot(&self, ticket: usize) -> &Slot<T> {
        &self.slots[ticket & Self::MASK]
    }

    /// Queue whose first ticket (for both push and pop) is `first` instead
    /// of zero, so tests can cross the `usize` wrap boundary quickly.
    #[cfg(test)]
    fn starting_at(first: usize) -> Self {
        let queue = Self::new();
        for lap_offset in 0..N {
            let ticket = first.wrapping_add(lap_offset);
            queue
                .slot(ticket)
                .turn
                .store(Self::write_turn(ticket), Ordering::Relaxed);
        }
        queue.head.store(first, Ordering::Relaxed);
        queue.tail.store(first, Ordering::Relaxed);
        queue
    }
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> fmt::Debug for Queue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("capacity", &N).finish_non_exhaustive()
    }
}

unsafe impl<T: Send, const N: usize> Send for Queue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Queue<T, N> {}

impl<T, const N: usize> Drop for Queue<T, N> {
    fn drop(&mut self) {
        // `&mut self` means every push and pop has returned, so each ticket
        // in `tail..head` names a slot holding an initialized value.
        let head = self.head.load(Ordering::Relaxed);
        let mut ticket = self.tail.load(Ordering::Relaxed);
        while ticket != head {
            let slot = self.slot(ticket);
            slot.value.with_mut(|cell| unsafe { (*cell).assume_init_drop() });
            ticket = ticket.wrapping_add(1);
        }
    }
}

/// Spin briefly, then yield the thread on every further poll.
struct TurnWait {
    polls: u32,
}

impl TurnWait {
    #[inline]
    fn new() -> Self {
        TurnWait { polls: 0 }
    }

    #[inline]
    fn snooze(&mut self) {
        if cfg!(not(loom)) && self.polls < SPIN_LIMIT {
            self.polls += 1;
            core::hint::spin_loop();
        } else {
            thread::yield_now();
        }
    }
}
