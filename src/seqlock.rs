//! Seqlock: wait-free publication for one writer, retry-on-conflict reads
//! for any number of readers.
//!
//! The writer brackets every publication with two sequence increments: odd
//! means a publish is in progress, even means the payload and `data_len` are
//! consistent with that sequence value. Readers copy optimistically and
//! retry when the sequence moved underneath them, so they never block the
//! writer and the writer never waits for them.

use crate::layout::CACHE_LINE;
use std::ptr;
use std::sync::atomic::{fence, AtomicU64, Ordering};

/// Seqlock region header. Followed in memory by `data_size` payload bytes.
#[repr(C, align(64))]
pub struct SeqlockHeader {
    /// Odd while a publish is in progress, even otherwise. Starts at 0.
    sequence: AtomicU64,
    /// Length of the current payload. Always <= data_size.
    data_len: AtomicU64,
    _pad: [u8; CACHE_LINE - 16],
}

const _: () = assert!(std::mem::size_of::<SeqlockHeader>() == CACHE_LINE);

impl SeqlockHeader {
    /// Initialize a header to the empty state (sequence 0, length 0).
    ///
    /// # Safety
    /// `ptr` must point to writable, 64-byte aligned memory not yet visible
    /// to any reader.
    pub unsafe fn init(ptr: *mut Self) {
        (*ptr).sequence = AtomicU64::new(0);
        (*ptr).data_len = AtomicU64::new(0);
    }
}

/// Writer side. Exactly one exists per channel, in the daemon process.
pub struct SeqlockWriter {
    header: *mut SeqlockHeader,
    data: *mut u8,
    data_size: usize,
}

// SAFETY: single writer by contract; the protocol orders all shared stores.
unsafe impl Send for SeqlockWriter {}

impl SeqlockWriter {
    /// # Safety
    /// `header` must point to an initialized [`SeqlockHeader`] with
    /// `data_size` payload bytes immediately after it, and no other writer
    /// may exist for the same region.
    pub unsafe fn from_raw(header: *mut SeqlockHeader, data: *mut u8, data_size: usize) -> Self {
        Self {
            header,
            data,
            data_size,
        }
    }

    /// Payload capacity in bytes.
    #[inline(always)]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Publish a new payload.
    ///
    /// A reader that completes after this call returns either these bytes or
    /// those of a later publication, never a mix.
    ///
    /// # Panics
    /// If `bytes.len()` exceeds the region's payload capacity. Oversize
    /// publishes are a caller bug, not a runtime condition.
    #[inline]
    pub fn publish(&self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.data_size,
            "publish of {} bytes exceeds data region of {}",
            bytes.len(),
            self.data_size
        );
        let header = unsafe { &*self.header };

        let s = header.sequence.load(Ordering::Relaxed);
        // Odd sequence: readers started after this point will retry.
        header.sequence.store(s.wrapping_add(1), Ordering::Release);
        // Keep the payload stores on the odd side of the sequence update.
        fence(Ordering::Release);

        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.data, bytes.len());
        }
        header.data_len.store(bytes.len() as u64, Ordering::Relaxed);

        // Even again: payload and data_len are consistent with s + 2.
        header.sequence.store(s.wrapping_add(2), Ordering::Release);
    }
}

/// Reader side. Any number may exist across shell processes.
pub struct SeqlockReader {
    header: *const SeqlockHeader,
    data: *const u8,
}

// SAFETY: readers never write; consistency comes from the retry protocol.
unsafe impl Send for SeqlockReader {}
unsafe impl Sync for SeqlockReader {}

impl SeqlockReader {
    /// # Safety
    /// `header` must point to an initialized [`SeqlockHeader`] with the
    /// payload region immediately after it.
    pub unsafe fn from_raw(header: *const SeqlockHeader, data: *const u8) -> Self {
        Self { header, data }
    }

    /// Copy the current payload into `buf`, retrying until consistent.
    ///
    /// Returns the number of bytes copied: the published length capped by
    /// `buf.len()`. A freshly created channel reads as length 0.
    #[inline]
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let header = unsafe { &*self.header };

        loop {
            let s1 = header.sequence.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                // Publish in progress.
                std::hint::spin_loop();
                continue;
            }

            let len = header.data_len.load(Ordering::Relaxed) as usize;
            let n = len.min(buf.len());
            unsafe {
                ptr::copy_nonoverlapping(self.data, buf.as_mut_ptr(), n);
            }

            fence(Ordering::Acquire);
            let s2 = header.sequence.load(Ordering::Acquire);
            if s1 == s2 {
                return n;
            }
            std::hint::spin_loop();
        }
    }

    /// Single-attempt read: `None` if a publish was in flight or completed
    /// underneath the copy.
    #[inline]
    pub fn try_read(&self, buf: &mut [u8]) -> Option<usize> {
        let header = unsafe { &*self.header };

        let s1 = header.sequence.load(Ordering::Acquire);
        if s1 & 1 == 1 {
            return None;
        }

        let len = header.data_len.load(Ordering::Relaxed) as usize;
        let n = len.min(buf.len());
        unsafe {
            ptr::copy_nonoverlapping(self.data, buf.as_mut_ptr(), n);
        }

        fence(Ordering::Acquire);
        let s2 = header.sequence.load(Ordering::Acquire);
        (s1 == s2).then_some(n)
    }

    /// Sequence value at this instant. Even means stable; only increases.
    #[inline]
    pub fn sequence(&self) -> u64 {
        unsafe { &*self.header }.sequence.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    struct Region {
        ptr: *mut u8,
        layout: std::alloc::Layout,
    }

    impl Region {
        fn new(data_size: usize) -> Self {
            let layout =
                std::alloc::Layout::from_size_align(size_of::<SeqlockHeader>() + data_size, 64)
                    .unwrap();
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            unsafe { SeqlockHeader::init(ptr.cast()) };
            Self { ptr, layout }
        }

        fn writer(&self, data_size: usize) -> SeqlockWriter {
            unsafe {
                SeqlockWriter::from_raw(
                    self.ptr.cast(),
                    self.ptr.add(size_of::<SeqlockHeader>()),
                    data_size,
                )
            }
        }

        fn reader(&self) -> SeqlockReader {
            unsafe {
                SeqlockReader::from_raw(self.ptr.cast(), self.ptr.add(size_of::<SeqlockHeader>()))
            }
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            unsafe { std::alloc::dealloc(self.ptr, self.layout) };
        }
    }

    // Tests share one Region across threads the way processes share the
    // mapping; the seqlock protocol is the synchronization.
    unsafe impl Send for Region {}
    unsafe impl Sync for Region {}

    #[test]
    fn fresh_region_reads_empty() {
        let region = Region::new(256);
        let reader = region.reader();
        let mut buf = [0u8; 256];
        assert_eq!(reader.read(&mut buf), 0);
        assert_eq!(reader.sequence(), 0);
    }

    #[test]
    fn publish_then_read_roundtrip() {
        let region = Region::new(256);
        let writer = region.writer(256);
        let reader = region.reader();

        writer.publish(b"hello");
        let mut buf = [0u8; 256];
        assert_eq!(reader.read(&mut buf), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn latest_publication_wins() {
        let region = Region::new(64);
        let writer = region.writer(64);
        let reader = region.reader();

        writer.publish(b"A");
        writer.publish(b"BB");
        writer.publish(b"CCC");

        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf), 3);
        assert_eq!(&buf[..3], b"CCC");
    }

    #[test]
    fn zero_length_publish_reads_zero() {
        let region = Region::new(64);
        let writer = region.writer(64);
        let reader = region.reader();

        writer.publish(b"something");
        writer.publish(b"");
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf), 0);
    }

    #[test]
    fn full_capacity_publish_roundtrips() {
        let region = Region::new(64);
        let writer = region.writer(64);
        let reader = region.reader();

        let payload = [0x5Au8; 64];
        writer.publish(&payload);
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf), 64);
        assert_eq!(buf, payload);
    }

    #[test]
    fn small_buffer_caps_returned_length() {
        let region = Region::new(64);
        let writer = region.writer(64);
        let reader = region.reader();

        writer.publish(b"0123456789");
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf), 4);
        assert_eq!(&buf, b"0123");
    }

    #[test]
    #[should_panic(expected = "exceeds data region")]
    fn oversize_publish_panics() {
        let region = Region::new(8);
        let writer = region.writer(8);
        writer.publish(&[0u8; 9]);
    }

    /// Payloads encode a counter in every byte; a torn read would surface as
    /// a buffer whose bytes disagree with each other.
    #[test]
    fn concurrent_readers_never_observe_torn_payloads() {
        const DATA_SIZE: usize = 1024;
        const READERS: usize = 4;

        let region = Arc::new(Region::new(DATA_SIZE));
        let stop = Arc::new(AtomicBool::new(false));

        // Region owns raw pointers; hand each thread its own reader.
        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let region = Arc::clone(&region);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let reader = region.reader();
                    let mut buf = [0u8; DATA_SIZE];
                    let mut observed = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        let n = reader.read(&mut buf);
                        if n == 0 {
                            continue;
                        }
                        assert_eq!(n, DATA_SIZE);
                        let first = buf[0];
                        assert!(
                            buf.iter().all(|&b| b == first),
                            "torn read: mixed payload bytes"
                        );
                        observed += 1;
                    }
                    observed
                })
            })
            .collect();

        let writer_region = Arc::clone(&region);
        let writer = thread::spawn(move || {
            let writer = writer_region.writer(DATA_SIZE);
            for i in 0..20_000u32 {
                writer.publish(&[(i % 251) as u8; DATA_SIZE]);
            }
        });

        writer.join().unwrap();
        stop.store(true, Ordering::Relaxed);
        let observed: u64 = readers.into_iter().map(|r| r.join().unwrap()).sum();
        assert!(observed > 0, "no reader completed a successful read");
    }
}
