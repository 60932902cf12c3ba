//! Bounded lock-free MPSC ring for shell-to-daemon command messages.
//!
//! Producers across untrusted shell processes claim slots by CAS on a shared
//! `tail` cursor, fill the claimed slot, and commit it with a release store
//! of the slot state. The single daemon-side consumer drains slots strictly
//! in ascending `head` order, so delivery follows commit order.
//!
//! Each slot is one cache line and carries its own state word:
//!
//! ```text
//! EMPTY ── producer CAS ──> RESERVED ── producer store ──> READY
//!   ^                                                        │
//!   └──── consumer store ──── CONSUMING <── consumer store ──┘
//! ```
//!
//! A producer that dies while RESERVED stalls the consumer at that index;
//! peers are assumed cooperative (see the crate docs).

use crate::layout::{CACHE_LINE, SLOT_SIZE};
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Payload capacity of one command slot.
pub const SLOT_PAYLOAD: usize = SLOT_SIZE - 12;

/// Slot state words.
mod state {
    pub const EMPTY: u32 = 0;
    pub const RESERVED: u32 = 1;
    pub const READY: u32 = 2;
    pub const CONSUMING: u32 = 3;
}

/// Outcome of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The message is committed; the consumer will eventually deliver it.
    Accepted,
    /// Ring at capacity. Retry, drop, or alert at the caller's discretion.
    Full,
    /// Message exceeds [`SLOT_PAYLOAD`]; nothing was consumed.
    TooLarge,
}

/// One command slot. Exactly one cache line.
#[repr(C, align(64))]
struct Slot {
    state: AtomicU32,
    client_id: AtomicU32,
    len: AtomicU32,
    payload: UnsafeCell<[u8; SLOT_PAYLOAD]>,
}

const _: () = assert!(std::mem::size_of::<Slot>() == SLOT_SIZE);

/// Ring region header. Followed in memory by `capacity` slots.
#[repr(C, align(64))]
pub struct RingHeader {
    /// Consumer cursor, daemon-owned. Producers read it to detect Full.
    head: AtomicU64,
    /// Producer cursor, claimed by CAS from any shell.
    tail: AtomicU64,
    /// Slot count. Power of two.
    capacity: u64,
    _pad: [u8; CACHE_LINE - 24],
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == CACHE_LINE);

impl RingHeader {
    /// Initialize the ring region: zeroed cursors, every slot EMPTY.
    ///
    /// # Safety
    /// `ptr` must point to writable, 64-byte aligned memory with room for
    /// the header plus `capacity` slots, not yet visible to any peer.
    pub unsafe fn init(ptr: *mut Self, capacity: u64) {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        (*ptr).head = AtomicU64::new(0);
        (*ptr).tail = AtomicU64::new(0);
        (*ptr).capacity = capacity;

        let slots = ptr.cast::<u8>().add(CACHE_LINE).cast::<Slot>();
        for i in 0..capacity as usize {
            let slot = &mut *slots.add(i);
            slot.state = AtomicU32::new(state::EMPTY);
            slot.client_id = AtomicU32::new(0);
            slot.len = AtomicU32::new(0);
        }
    }
}

/// Producer handle. Any number may exist, one per shell attach.
pub struct CmdProducer {
    header: *const RingHeader,
    slots: *const Slot,
    capacity: u64,
    mask: u64,
}

// SAFETY: all shared mutation goes through per-slot CAS ownership transfer.
unsafe impl Send for CmdProducer {}
unsafe impl Sync for CmdProducer {}

impl CmdProducer {
    /// # Safety
    /// `header` must point to an initialized [`RingHeader`] with its slots
    /// immediately after it.
    pub unsafe fn from_raw(header: *const RingHeader) -> Self {
        let capacity = (*header).capacity;
        Self {
            header,
            slots: header.cast::<u8>().add(CACHE_LINE).cast::<Slot>(),
            capacity,
            mask: capacity - 1,
        }
    }

    #[inline(always)]
    fn slot(&self, index: u64) -> &Slot {
        unsafe { &*self.slots.add((index & self.mask) as usize) }
    }

    /// Reserve the next free slot, fill it, and commit. Non-blocking with
    /// respect to the consumer and other producers.
    #[inline]
    pub fn try_send(&self, client_id: u32, msg: &[u8]) -> SendStatus {
        if msg.len() > SLOT_PAYLOAD {
            return SendStatus::TooLarge;
        }
        let header = unsafe { &*self.header };

        let mut tail = header.tail.load(Ordering::Relaxed);
        loop {
            let head = header.head.load(Ordering::Acquire);
            if tail.wrapping_sub(head) >= self.capacity {
                return SendStatus::Full;
            }
            match header.tail.compare_exchange(
                tail,
                tail.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => tail = current,
            }
        }

        let slot = self.slot(tail);
        // The slot's previous occupant may still be mid-CONSUMING right
        // after a wrap; wait for the consumer to hand it back.
        while slot
            .state
            .compare_exchange(
                state::EMPTY,
                state::RESERVED,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            std::hint::spin_loop();
        }

        slot.client_id.store(client_id, Ordering::Relaxed);
        slot.len.store(msg.len() as u32, Ordering::Relaxed);
        unsafe {
            ptr::copy_nonoverlapping(msg.as_ptr(), (*slot.payload.get()).as_mut_ptr(), msg.len());
        }
        slot.state.store(state::READY, Ordering::Release);
        SendStatus::Accepted
    }

    /// Send, spinning while the ring is full. Returns `false` only for an
    /// oversize message.
    #[inline]
    pub fn send(&self, client_id: u32, msg: &[u8]) -> bool {
        loop {
            match self.try_send(client_id, msg) {
                SendStatus::Accepted => return true,
                SendStatus::Full => std::hint::spin_loop(),
                SendStatus::TooLarge => return false,
            }
        }
    }
}

/// Consumer handle. Exactly one exists, in the daemon process.
pub struct CmdConsumer {
    header: *const RingHeader,
    slots: *const Slot,
    mask: u64,
}

// SAFETY: single consumer by contract.
unsafe impl Send for CmdConsumer {}

impl CmdConsumer {
    /// # Safety
    /// `header` must point to an initialized [`RingHeader`] with its slots
    /// immediately after it, and no other consumer may exist.
    pub unsafe fn from_raw(header: *const RingHeader) -> Self {
        let capacity = (*header).capacity;
        Self {
            header,
            slots: header.cast::<u8>().add(CACHE_LINE).cast::<Slot>(),
            mask: capacity - 1,
        }
    }

    #[inline(always)]
    fn slot(&self, index: u64) -> &Slot {
        unsafe { &*self.slots.add((index & self.mask) as usize) }
    }

    /// Number of claimed-but-not-yet-consumed slots at this instant.
    #[inline]
    pub fn pending(&self) -> u64 {
        let header = unsafe { &*self.header };
        let head = header.head.load(Ordering::Relaxed);
        let tail = header.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// Deliver the oldest committed message, if any.
    ///
    /// Copies at most `buf.len()` payload bytes and returns the originating
    /// client id with the copied length. Returns `None` on an empty ring or
    /// while the producer at `head` is still filling its slot; the cursor
    /// never advances past an uncommitted slot.
    #[inline]
    pub fn try_recv(&self, buf: &mut [u8]) -> Option<(u32, usize)> {
        let header = unsafe { &*self.header };

        let head = header.head.load(Ordering::Relaxed);
        let tail = header.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        let slot = self.slot(head);
        if slot.state.load(Ordering::Acquire) != state::READY {
            return None;
        }
        slot.state.store(state::CONSUMING, Ordering::Release);

        let client_id = slot.client_id.load(Ordering::Relaxed);
        let len = slot.len.load(Ordering::Relaxed) as usize;
        let n = len.min(buf.len());
        unsafe {
            ptr::copy_nonoverlapping((*slot.payload.get()).as_ptr(), buf.as_mut_ptr(), n);
        }

        slot.state.store(state::EMPTY, Ordering::Release);
        header.head.store(head.wrapping_add(1), Ordering::Release);
        Some((client_id, n))
    }

    /// Receive, spinning until a message is available.
    #[inline]
    pub fn recv(&self, buf: &mut [u8]) -> (u32, usize) {
        loop {
            if let Some(result) = self.try_recv(buf) {
                return result;
            }
            std::hint::spin_loop();
        }
    }
}
