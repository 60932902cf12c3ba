//! C ABI over the daemon and shell handles.
//!
//! Handles cross the FFI boundary as opaque boxed pointers; constructor
//! failures map to null, hot-path failures to `0` / `false`. Built into the
//! cdylib so C, C++, and anything with a C FFI can join a channel.

use crate::channel::{DaemonChannel, ShellChannel};
use crate::layout::ChannelConfig;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::slice;

/// Opaque daemon handle.
pub struct VenomDaemonHandle(DaemonChannel);
/// Opaque shell handle.
pub struct VenomShellHandle(ShellChannel);

/// Channel geometry, mirrored for C callers.
#[repr(C)]
pub struct VenomChannelConfig {
    pub data_size: usize,
    pub cmd_slots: usize,
    pub max_clients: usize,
}

unsafe fn name_from_c<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

// --- Daemon side ---

/// Create a channel. Returns null on failure.
///
/// # Safety
/// `name` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn venom_daemon_create(
    name: *const c_char,
    config: VenomChannelConfig,
) -> *mut VenomDaemonHandle {
    let Some(name) = name_from_c(name) else {
        return ptr::null_mut();
    };
    let config = ChannelConfig {
        data_size: config.data_size,
        cmd_slots: config.cmd_slots,
        max_clients: config.max_clients,
    };
    match DaemonChannel::create(name, config) {
        Ok(daemon) => Box::into_raw(Box::new(VenomDaemonHandle(daemon))),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroy a daemon handle: unmaps and unlinks the channel.
///
/// # Safety
/// `handle` must come from [`venom_daemon_create`] and not be used after.
#[no_mangle]
pub unsafe extern "C" fn venom_daemon_destroy(handle: *mut VenomDaemonHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Publish a state payload.
///
/// # Safety
/// `handle` must be a live daemon handle; `data` must point to `len`
/// readable bytes no larger than the channel's data region.
#[no_mangle]
pub unsafe extern "C" fn venom_daemon_write_data(
    handle: *mut VenomDaemonHandle,
    data: *const u8,
    len: usize,
) {
    let daemon = &(*handle).0;
    daemon.write_data(slice::from_raw_parts(data, len));
}

/// Non-blocking command receive. Returns the copied length, 0 when the
/// ring is empty. The sender's client id is written to `out_client_id`.
///
/// # Safety
/// `handle` must be a live daemon handle; `buf` must point to `max_len`
/// writable bytes.
#[no_mangle]
pub unsafe extern "C" fn venom_daemon_try_recv_command(
    handle: *mut VenomDaemonHandle,
    buf: *mut u8,
    max_len: usize,
    out_client_id: *mut u32,
) -> usize {
    let daemon = &(*handle).0;
    match daemon.try_recv_command(slice::from_raw_parts_mut(buf, max_len)) {
        Some((client_id, len)) => {
            if !out_client_id.is_null() {
                *out_client_id = client_id;
            }
            len
        }
        None => 0,
    }
}

/// Base pointer of the mapping, for zero-copy protocols layered on top.
///
/// # Safety
/// `handle` must be a live daemon handle.
#[no_mangle]
pub unsafe extern "C" fn venom_daemon_get_shm_ptr(handle: *mut VenomDaemonHandle) -> *mut u8 {
    (*handle).0.as_ptr()
}

// --- Shell side ---

/// Attach to an existing channel. Returns null on failure.
///
/// # Safety
/// `name` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn venom_shell_connect(name: *const c_char) -> *mut VenomShellHandle {
    let Some(name) = name_from_c(name) else {
        return ptr::null_mut();
    };
    match ShellChannel::connect(name) {
        Ok(shell) => Box::into_raw(Box::new(VenomShellHandle(shell))),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroy a shell handle: unmaps only, the channel stays up.
///
/// # Safety
/// `handle` must come from [`venom_shell_connect`] and not be used after.
#[no_mangle]
pub unsafe extern "C" fn venom_shell_destroy(handle: *mut VenomShellHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Copy the current state payload into `buf`. Returns the copied length.
///
/// # Safety
/// `handle` must be a live shell handle; `buf` must point to `max_len`
/// writable bytes.
#[no_mangle]
pub unsafe extern "C" fn venom_shell_read_data(
    handle: *mut VenomShellHandle,
    buf: *mut u8,
    max_len: usize,
) -> usize {
    let shell = &(*handle).0;
    shell.read_data(slice::from_raw_parts_mut(buf, max_len))
}

/// Single-attempt read. Returns `true` and writes the copied length to
/// `out_len` on success, `false` while a publish is in flight.
///
/// # Safety
/// Same as [`venom_shell_read_data`]; `out_len` may be null.
#[no_mangle]
pub unsafe extern "C" fn venom_shell_try_read_data(
    handle: *mut VenomShellHandle,
    buf: *mut u8,
    max_len: usize,
    out_len: *mut usize,
) -> bool {
    let shell = &(*handle).0;
    match shell.try_read_data(slice::from_raw_parts_mut(buf, max_len)) {
        Some(len) => {
            if !out_len.is_null() {
                *out_len = len;
            }
            true
        }
        None => false,
    }
}

/// Non-blocking command send. `false` when the ring is full or the
/// message does not fit a slot.
///
/// # Safety
/// `handle` must be a live shell handle; `cmd` must point to `len`
/// readable bytes.
#[no_mangle]
pub unsafe extern "C" fn venom_shell_try_send_command(
    handle: *mut VenomShellHandle,
    cmd: *const u8,
    len: usize,
) -> bool {
    let shell = &(*handle).0;
    shell.try_send_command(slice::from_raw_parts(cmd, len))
}

/// Client id claimed by this attach.
///
/// # Safety
/// `handle` must be a live shell handle.
#[no_mangle]
pub unsafe extern "C" fn venom_shell_id(handle: *mut VenomShellHandle) -> u32 {
    (*handle).0.client_id()
}

/// Base pointer of the mapping, for zero-copy protocols layered on top.
///
/// # Safety
/// `handle` must be a live shell handle.
#[no_mangle]
pub unsafe extern "C" fn venom_shell_get_shm_ptr(handle: *mut VenomShellHandle) -> *const u8 {
    (*handle).0.as_ptr()
}
