//! Daemon and shell handles over one shared-memory channel.
//!
//! The daemon creates the mapping, lays out the regions, and is the only
//! process that publishes state or consumes commands. Shells attach to the
//! existing mapping, claim a client id, and get the reader/producer ends.
//! Dropping the daemon unlinks the backing object; dropping a shell only
//! unmaps it.

use crate::cmd_ring::{CmdConsumer, CmdProducer, RingHeader, SendStatus};
use crate::error::Result;
use crate::layout::{ChannelConfig, ChannelLayout, CACHE_LINE};
use crate::seqlock::{SeqlockHeader, SeqlockReader, SeqlockWriter};
use crate::shm::ShmMapping;
use tracing::debug;

/// Writer-and-consumer side of a channel. One per channel name.
pub struct DaemonChannel {
    shm: ShmMapping,
    layout: ChannelLayout,
    publisher: SeqlockWriter,
    commands: CmdConsumer,
}

// SAFETY: single publisher and single consumer by contract; the handle is
// moved to whichever thread runs the daemon loop.
unsafe impl Send for DaemonChannel {}

impl DaemonChannel {
    /// Create the channel, replacing any stale object of the same name.
    pub fn create(name: &str, config: ChannelConfig) -> Result<Self> {
        let layout = ChannelLayout::for_config(&config);
        let shm = ShmMapping::create(name, layout.total_size)?;
        let base = shm.as_ptr();

        unsafe {
            layout.write_header(base);

            let seqlock = base.add(layout.seqlock_offset).cast::<SeqlockHeader>();
            SeqlockHeader::init(seqlock);

            let ring = base.add(layout.cmd_ring_offset).cast::<RingHeader>();
            RingHeader::init(ring, layout.cmd_slots as u64);

            let data = base.add(layout.seqlock_offset + CACHE_LINE);
            let publisher = SeqlockWriter::from_raw(seqlock, data, layout.data_size);
            let commands = CmdConsumer::from_raw(ring);

            debug!(
                name,
                data_size = layout.data_size,
                cmd_slots = layout.cmd_slots,
                total_size = layout.total_size,
                "channel created"
            );

            Ok(Self {
                shm,
                layout,
                publisher,
                commands,
            })
        }
    }

    /// Publish a new state payload for all shells.
    ///
    /// # Panics
    /// If `bytes` exceeds the configured `data_size`.
    #[inline]
    pub fn write_data(&self, bytes: &[u8]) {
        self.publisher.publish(bytes);
    }

    /// Deliver the oldest pending command, if any. Non-blocking.
    ///
    /// Returns the originating client id and the number of bytes copied
    /// into `buf`.
    #[inline]
    pub fn try_recv_command(&self, buf: &mut [u8]) -> Option<(u32, usize)> {
        self.commands.try_recv(buf)
    }

    /// Receive a command, spinning until one arrives.
    #[inline]
    pub fn recv_command(&self, buf: &mut [u8]) -> (u32, usize) {
        self.commands.recv(buf)
    }

    /// Commands claimed by producers but not yet consumed.
    #[inline]
    pub fn pending_commands(&self) -> u64 {
        self.commands.pending()
    }

    /// Payload capacity of the data region.
    #[inline]
    pub fn data_size(&self) -> usize {
        self.layout.data_size
    }

    /// Logical channel name.
    pub fn name(&self) -> &str {
        self.shm.name()
    }

    /// Base pointer of the mapping, for diagnostics.
    pub fn as_ptr(&self) -> *mut u8 {
        self.shm.as_ptr()
    }
}

// The owning ShmMapping unmaps and unlinks on drop; nothing else to release.

/// Reader-and-producer side of a channel. Any number per channel name.
pub struct ShellChannel {
    shm: ShmMapping,
    layout: ChannelLayout,
    state: SeqlockReader,
    commands: CmdProducer,
    client_id: u32,
}

// SAFETY: every operation on the shell side is independently atomic; the
// seqlock reader and ring producer tolerate concurrent calls.
unsafe impl Send for ShellChannel {}
unsafe impl Sync for ShellChannel {}

impl ShellChannel {
    /// Attach to an existing channel and claim a unique client id.
    ///
    /// Rejects objects whose header does not match this build's layout; on
    /// rejection the mapping is dropped and nothing is retained.
    pub fn connect(name: &str) -> Result<Self> {
        let shm = ShmMapping::attach(name)?;
        let base = shm.as_ptr();

        let (layout, client_id) = unsafe {
            let layout = ChannelLayout::from_mapping(base, shm.size())?;
            let client_id = layout.header(base).claim_client_id();
            (layout, client_id)
        };

        let (state, commands) = unsafe {
            let seqlock = base.add(layout.seqlock_offset).cast::<SeqlockHeader>();
            let data = base.add(layout.seqlock_offset + CACHE_LINE);
            let ring = base.add(layout.cmd_ring_offset).cast::<RingHeader>();
            (
                SeqlockReader::from_raw(seqlock, data),
                CmdProducer::from_raw(ring),
            )
        };

        debug!(name, client_id, "attached to channel");

        Ok(Self {
            shm,
            layout,
            state,
            commands,
            client_id,
        })
    }

    /// Id assigned to this attach. Unique across the channel's lifetime.
    #[inline]
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Copy the current state payload into `buf`, retrying across
    /// in-flight publishes. Returns the copied length.
    #[inline]
    pub fn read_data(&self, buf: &mut [u8]) -> usize {
        self.state.read(buf)
    }

    /// Single-attempt read: `None` while a publish is in flight.
    #[inline]
    pub fn try_read_data(&self, buf: &mut [u8]) -> Option<usize> {
        self.state.try_read(buf)
    }

    /// Submit a command to the daemon. Non-blocking.
    ///
    /// Returns `false` when the ring is full or the message exceeds the
    /// slot payload size.
    #[inline]
    pub fn try_send_command(&self, msg: &[u8]) -> bool {
        self.commands.try_send(self.client_id, msg) == SendStatus::Accepted
    }

    /// Submit a command, spinning while the ring is full. Returns `false`
    /// only for an oversize message.
    #[inline]
    pub fn send_command(&self, msg: &[u8]) -> bool {
        self.commands.send(self.client_id, msg)
    }

    /// Payload capacity of the data region.
    #[inline]
    pub fn data_size(&self) -> usize {
        self.layout.data_size
    }

    /// Logical channel name.
    pub fn name(&self) -> &str {
        self.shm.name()
    }

    /// Base pointer of the mapping, for diagnostics.
    pub fn as_ptr(&self) -> *const u8 {
        self.shm.as_ptr()
    }
}
