//! POSIX shared-memory mapping primitive.
//!
//! One [`ShmMapping`] is one `shm_open` object mapped read/write into this
//! process. The creator owns the name: dropping an owning mapping unlinks the
//! backing object, dropping an attached mapping only unmaps it.

use crate::error::{ChannelError, Result};
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;
use tracing::debug;

/// OS-level name prefix for all channel objects.
const SHM_PREFIX: &str = "/venom_";

/// POSIX shm names are limited to NAME_MAX including our prefix.
const MAX_NAME_LEN: usize = 255 - SHM_PREFIX.len();

fn shm_path(name: &str) -> CString {
    // Prefix and name are both free of interior NULs.
    CString::new(format!("{SHM_PREFIX}{name}")).expect("shm name contains NUL")
}

/// A named shared-memory object mapped into this process.
#[derive(Debug)]
pub struct ShmMapping {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping itself is plain memory; all cross-process coordination
// inside it goes through atomics owned by the higher layers.
unsafe impl Send for ShmMapping {}
unsafe impl Sync for ShmMapping {}

impl ShmMapping {
    /// Create a shared-memory object of exactly `size` bytes and map it.
    ///
    /// Any pre-existing object of the same name is unlinked first so the new
    /// mapping starts from a clean, zero-filled layout.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(ChannelError::NameTooLong {
                max: MAX_NAME_LEN,
                got: name.len(),
            });
        }

        let path = shm_path(name);

        // Stale objects from a previous run would leak their old geometry
        // into our mapping; unlink unconditionally before creating.
        let _ = shm_unlink(path.as_c_str());

        let fd = shm_open(
            path.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH,
        )
        .map_err(|e| {
            if e == Errno::EXIST {
                ChannelError::NameExists {
                    name: name.to_string(),
                }
            } else {
                ChannelError::MappingFailed {
                    op: "create",
                    name: name.to_string(),
                    source: e.into(),
                }
            }
        })?;

        ftruncate(&fd, size as u64).map_err(|e| ChannelError::MappingFailed {
            op: "size",
            name: name.to_string(),
            source: e.into(),
        })?;

        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
            .map_err(|e| ChannelError::MappingFailed {
                op: "map",
                name: name.to_string(),
                source: e.into(),
            })?
        };
        let addr = NonNull::new(addr.cast::<u8>()).expect("mmap returned null");

        // ftruncate already zeroes fresh pages, but an explicit fill keeps
        // the create contract independent of the filesystem backing shm.
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        debug!(name, size, "created shared memory object");

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    /// Attach to an existing shared-memory object, mapping its full size.
    pub fn attach(name: &str) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(ChannelError::NameTooLong {
                max: MAX_NAME_LEN,
                got: name.len(),
            });
        }

        let path = shm_path(name);

        let fd = shm_open(path.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            if e == Errno::NOENT {
                ChannelError::NotFound {
                    name: name.to_string(),
                }
            } else {
                ChannelError::MappingFailed {
                    op: "open",
                    name: name.to_string(),
                    source: e.into(),
                }
            }
        })?;

        let stat = fstat(&fd).map_err(|e| ChannelError::MappingFailed {
            op: "stat",
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;

        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
            .map_err(|e| ChannelError::MappingFailed {
                op: "map",
                name: name.to_string(),
                source: e.into(),
            })?
        };
        let addr = NonNull::new(addr.cast::<u8>()).expect("mmap returned null");

        debug!(name, size, "attached to shared memory object");

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    /// Unlink a shared-memory object by name.
    ///
    /// Existing mappings stay valid until their processes unmap them.
    pub fn remove(name: &str) {
        let _ = shm_unlink(shm_path(name).as_c_str());
    }

    /// Base pointer of the mapped region.
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Size of the mapped region in bytes.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Logical name of the object (without the OS prefix).
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this mapping created (and will unlink) the backing object.
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }
}

impl Drop for ShmMapping {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }
        if self.is_owner {
            debug!(name = %self.name, "unlinking shared memory object");
            Self::remove(&self.name);
        }
    }
}
