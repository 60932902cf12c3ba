//! Lock-free single-writer / multiple-reader shared-memory IPC.
//!
//! One privileged process (the *daemon*) publishes a mutable byte-blob of
//! state that any number of peer processes (the *shells*) read without
//! kernel mediation, and every shell can submit short command messages back
//! to the daemon. Both directions stay lock-free after setup:
//!
//! - **Data path**: a seqlock. The daemon publishes with two atomic
//!   sequence increments around a payload copy; shells copy optimistically
//!   and retry if the sequence moved, so a successful read is never a torn
//!   mix of two publications.
//! - **Command path**: a bounded MPSC ring of cache-line slots. Shells
//!   claim slots by CAS on a shared tail cursor and commit them with a
//!   per-slot state word; the daemon drains in commit order.
//!
//! # Example
//!
//! ```no_run
//! use venom_channel::{ChannelConfig, DaemonChannel, ShellChannel};
//!
//! // Daemon process
//! let daemon = DaemonChannel::create("mixer", ChannelConfig::default())?;
//! daemon.write_data(b"volume=40");
//!
//! // Shell process
//! let shell = ShellChannel::connect("mixer")?;
//! let mut buf = [0u8; 64];
//! let n = shell.read_data(&mut buf);
//! assert_eq!(&buf[..n], b"volume=40");
//! shell.try_send_command(b"set-volume 55");
//! # Ok::<(), venom_channel::ChannelError>(())
//! ```
//!
//! # Trust model
//!
//! Peers are cooperative: there is no authentication, and a producer that
//! dies while filling a claimed slot stalls the command ring at that slot.

pub mod bindings;
pub mod channel;
pub mod cmd_ring;
pub mod error;
pub mod layout;
pub mod seqlock;
pub mod shm;

pub use channel::{DaemonChannel, ShellChannel};
pub use cmd_ring::{SendStatus, SLOT_PAYLOAD};
pub use error::{ChannelError, Result};
pub use layout::{ChannelConfig, CHANNEL_MAGIC, CHANNEL_VERSION};
