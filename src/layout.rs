//! Wire layout of a channel: header format, region offsets, validation.
//!
//! Shells are compiled independently of the daemon, so nothing about the
//! geometry is hard-coded on the attach side: the creator writes the concrete
//! offsets and sizes into the [`ChannelHeader`] and attachers read them back,
//! rejecting anything that does not match this build's expectations.
//!
//! The layout is fixed little-endian, 64-bit, natural alignment:
//!
//! ```text
//! offset 0                : ChannelHeader
//! offset seqlock_offset   : SeqlockHeader (64 B) + data_size payload bytes
//! offset cmd_ring_offset  : RingHeader (64 B) + cmd_slots * SLOT_SIZE
//! ```
//!
//! Each region starts on a 64-byte boundary.

use crate::error::{ChannelError, Result};
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

/// Cache line size the layout is padded to.
pub const CACHE_LINE: usize = 64;

/// Four ASCII bytes "VNOM" as seen in memory (little-endian u32).
pub const CHANNEL_MAGIC: u32 = 0x4D4F_4E56;

/// Layout revision. Attachers reject anything else.
pub const CHANNEL_VERSION: u32 = 1;

/// Fixed size of one command slot, metadata included. One cache line.
pub const SLOT_SIZE: usize = 64;

/// Round `n` up to the next multiple of the cache line size.
#[inline(always)]
pub const fn align_up(n: usize) -> usize {
    (n + CACHE_LINE - 1) & !(CACHE_LINE - 1)
}

/// Channel geometry requested at creation time.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Payload capacity of the seqlock data region in bytes.
    pub data_size: usize,
    /// Number of command slots; rounded up to the next power of two.
    pub cmd_slots: usize,
    /// Advisory peer count; the channel itself does not track liveness.
    pub max_clients: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            data_size: 64 * 1024,
            cmd_slots: 32,
            max_clients: 16,
        }
    }
}

/// Fixed-size prefix of every channel, written once by the creator.
///
/// All fields except `next_client_id` are immutable after initialization.
#[repr(C)]
pub struct ChannelHeader {
    magic: u32,
    version: u32,
    data_size: u64,
    seqlock_offset: u64,
    cmd_ring_offset: u64,
    cmd_slots: u64,
    slot_size: u64,
    next_client_id: AtomicU32,
    _reserved: [u8; 28],
}

const _: () = assert!(size_of::<ChannelHeader>() == 80);

impl ChannelHeader {
    /// Claim a fresh client id. Wrap-around after 2^32 attaches is accepted.
    #[inline]
    pub fn claim_client_id(&self) -> u32 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Concrete region geometry of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub data_size: usize,
    pub cmd_slots: usize,
    pub seqlock_offset: usize,
    pub cmd_ring_offset: usize,
    pub total_size: usize,
}

impl ChannelLayout {
    /// Compute the geometry for a configuration.
    ///
    /// `cmd_slots` is rounded up to a power of two; every region lands on a
    /// cache-line boundary.
    pub fn for_config(config: &ChannelConfig) -> Self {
        let cmd_slots = config.cmd_slots.max(1).next_power_of_two();
        let seqlock_offset = align_up(size_of::<ChannelHeader>());
        let seqlock_region = align_up(CACHE_LINE + config.data_size);
        let cmd_ring_offset = seqlock_offset + seqlock_region;
        let total_size = cmd_ring_offset + CACHE_LINE + cmd_slots * SLOT_SIZE;
        Self {
            data_size: config.data_size,
            cmd_slots,
            seqlock_offset,
            cmd_ring_offset,
            total_size,
        }
    }

    /// Initialize the header of a freshly created, zero-filled mapping.
    ///
    /// # Safety
    /// `base` must point to a writable region of at least `self.total_size`
    /// bytes that no other process is using yet.
    pub unsafe fn write_header(&self, base: *mut u8) {
        let header = base.cast::<ChannelHeader>();
        std::ptr::write(
            header,
            ChannelHeader {
                magic: CHANNEL_MAGIC,
                version: CHANNEL_VERSION,
                data_size: self.data_size as u64,
                seqlock_offset: self.seqlock_offset as u64,
                cmd_ring_offset: self.cmd_ring_offset as u64,
                cmd_slots: self.cmd_slots as u64,
                slot_size: SLOT_SIZE as u64,
                next_client_id: AtomicU32::new(1),
                _reserved: [0; 28],
            },
        );
    }

    /// Read and validate the geometry from an attached mapping.
    ///
    /// # Safety
    /// `base` must point to a mapped region of `mapped_size` bytes.
    pub unsafe fn from_mapping(base: *const u8, mapped_size: usize) -> Result<Self> {
        if mapped_size < size_of::<ChannelHeader>() {
            return Err(ChannelError::InvalidLayout {
                reason: "object smaller than channel header",
            });
        }

        let header = &*base.cast::<ChannelHeader>();
        if header.magic != CHANNEL_MAGIC {
            return Err(ChannelError::InvalidMagic {
                expected: CHANNEL_MAGIC,
                got: header.magic,
            });
        }
        if header.version != CHANNEL_VERSION {
            return Err(ChannelError::VersionMismatch {
                expected: CHANNEL_VERSION,
                got: header.version,
            });
        }
        if header.slot_size != SLOT_SIZE as u64 {
            return Err(ChannelError::InvalidLayout {
                reason: "command slot size mismatch",
            });
        }

        let layout = Self {
            data_size: header.data_size as usize,
            cmd_slots: header.cmd_slots as usize,
            seqlock_offset: header.seqlock_offset as usize,
            cmd_ring_offset: header.cmd_ring_offset as usize,
            total_size: mapped_size,
        };

        if layout.cmd_slots == 0 || !layout.cmd_slots.is_power_of_two() {
            return Err(ChannelError::InvalidLayout {
                reason: "command slot count is not a power of two",
            });
        }
        if layout.seqlock_offset % CACHE_LINE != 0 || layout.cmd_ring_offset % CACHE_LINE != 0 {
            return Err(ChannelError::InvalidLayout {
                reason: "region offset is not cache-line aligned",
            });
        }
        if layout.seqlock_offset < size_of::<ChannelHeader>() {
            return Err(ChannelError::InvalidLayout {
                reason: "seqlock region overlaps channel header",
            });
        }
        let seqlock_end = layout
            .seqlock_offset
            .checked_add(CACHE_LINE + layout.data_size)
            .ok_or(ChannelError::InvalidLayout {
                reason: "seqlock region overflows",
            })?;
        if seqlock_end > layout.cmd_ring_offset {
            return Err(ChannelError::InvalidLayout {
                reason: "seqlock region overlaps command ring",
            });
        }
        let ring_end = layout
            .cmd_ring_offset
            .checked_add(CACHE_LINE)
            .and_then(|n| n.checked_add(layout.cmd_slots.checked_mul(SLOT_SIZE)?))
            .ok_or(ChannelError::InvalidLayout {
                reason: "command ring overflows",
            })?;
        if ring_end > mapped_size {
            return Err(ChannelError::InvalidLayout {
                reason: "command ring extends past mapped object",
            });
        }

        Ok(layout)
    }

    /// Reference to the channel header inside a mapping with this layout.
    ///
    /// # Safety
    /// `base` must point to a mapping whose header this layout was written
    /// to or validated against.
    #[inline(always)]
    pub unsafe fn header<'a>(&self, base: *const u8) -> &'a ChannelHeader {
        &*base.cast::<ChannelHeader>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cache-line aligned scratch region standing in for a mapping.
    struct Region {
        ptr: *mut u8,
        layout: std::alloc::Layout,
    }

    impl Region {
        fn new(size: usize) -> Self {
            let layout = std::alloc::Layout::from_size_align(size, CACHE_LINE).unwrap();
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            Self { ptr, layout }
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            unsafe { std::alloc::dealloc(self.ptr, self.layout) };
        }
    }

    #[test]
    fn header_field_offsets_match_wire_format() {
        let header = std::mem::MaybeUninit::<ChannelHeader>::uninit();
        let ptr = header.as_ptr();
        let base = ptr as usize;

        unsafe {
            assert_eq!(std::ptr::addr_of!((*ptr).magic) as usize - base, 0);
            assert_eq!(std::ptr::addr_of!((*ptr).version) as usize - base, 4);
            assert_eq!(std::ptr::addr_of!((*ptr).data_size) as usize - base, 8);
            assert_eq!(std::ptr::addr_of!((*ptr).seqlock_offset) as usize - base, 16);
            assert_eq!(std::ptr::addr_of!((*ptr).cmd_ring_offset) as usize - base, 24);
            assert_eq!(std::ptr::addr_of!((*ptr).cmd_slots) as usize - base, 32);
            assert_eq!(std::ptr::addr_of!((*ptr).slot_size) as usize - base, 40);
            assert_eq!(std::ptr::addr_of!((*ptr).next_client_id) as usize - base, 48);
        }
    }

    #[test]
    fn layout_regions_are_aligned_and_disjoint() {
        let layout = ChannelLayout::for_config(&ChannelConfig {
            data_size: 100,
            cmd_slots: 5,
            max_clients: 4,
        });

        assert_eq!(layout.cmd_slots, 8, "slot count rounds up to power of two");
        assert_eq!(layout.seqlock_offset % CACHE_LINE, 0);
        assert_eq!(layout.cmd_ring_offset % CACHE_LINE, 0);
        assert!(layout.seqlock_offset >= size_of::<ChannelHeader>());
        assert!(layout.seqlock_offset + CACHE_LINE + layout.data_size <= layout.cmd_ring_offset);
        assert_eq!(
            layout.total_size,
            layout.cmd_ring_offset + CACHE_LINE + 8 * SLOT_SIZE
        );
    }

    #[test]
    fn roundtrip_through_header() {
        let config = ChannelConfig {
            data_size: 4096,
            cmd_slots: 16,
            max_clients: 8,
        };
        let layout = ChannelLayout::for_config(&config);

        let region = Region::new(layout.total_size);
        unsafe { layout.write_header(region.ptr) };

        let parsed =
            unsafe { ChannelLayout::from_mapping(region.ptr, layout.total_size) }.unwrap();
        assert_eq!(parsed, layout);
    }

    #[test]
    fn rejects_bad_magic() {
        let layout = ChannelLayout::for_config(&ChannelConfig::default());
        let region = Region::new(layout.total_size);
        unsafe {
            layout.write_header(region.ptr);
            *region.ptr ^= 0xFF;
        }

        match unsafe { ChannelLayout::from_mapping(region.ptr, layout.total_size) } {
            Err(ChannelError::InvalidMagic { expected, .. }) => {
                assert_eq!(expected, CHANNEL_MAGIC);
            }
            other => panic!("expected InvalidMagic, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_version() {
        let layout = ChannelLayout::for_config(&ChannelConfig::default());
        let region = Region::new(layout.total_size);
        unsafe {
            layout.write_header(region.ptr);
            *region.ptr.add(4) = 99;
        }

        assert!(matches!(
            unsafe { ChannelLayout::from_mapping(region.ptr, layout.total_size) },
            Err(ChannelError::VersionMismatch { got: 99, .. })
        ));
    }

    #[test]
    fn rejects_truncated_object() {
        let layout = ChannelLayout::for_config(&ChannelConfig::default());
        let region = Region::new(layout.total_size);
        unsafe { layout.write_header(region.ptr) };

        assert!(matches!(
            unsafe { ChannelLayout::from_mapping(region.ptr, layout.total_size / 2) },
            Err(ChannelError::InvalidLayout { .. })
        ));
        assert!(matches!(
            unsafe { ChannelLayout::from_mapping(region.ptr, 8) },
            Err(ChannelError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn client_ids_are_unique() {
        let layout = ChannelLayout::for_config(&ChannelConfig::default());
        let region = Region::new(layout.total_size);
        unsafe { layout.write_header(region.ptr) };

        let header = unsafe { layout.header(region.ptr) };
        assert_eq!(header.claim_client_id(), 1);
        assert_eq!(header.claim_client_id(), 2);
        assert_eq!(header.claim_client_id(), 3);
    }
}
