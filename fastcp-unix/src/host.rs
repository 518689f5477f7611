//! Host facts: kernel identity, uptime, load and filesystem usage.

use std::ffi::{CStr, CString};
use std::io;
use std::path::Path;

/// Subset of `uname(2)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uname {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub machine: String,
}

fn field(raw: &[libc::c_char]) -> String {
    // SAFETY: uname fills NUL-terminated arrays.
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

pub fn uname() -> io::Result<Uname> {
    let mut raw: libc::utsname = unsafe { std::mem::zeroed() };
    // SAFETY: `raw` is a valid, writable utsname.
    if unsafe { libc::uname(&mut raw) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Uname {
        sysname: field(&raw.sysname),
        nodename: field(&raw.nodename),
        release: field(&raw.release),
        machine: field(&raw.machine),
    })
}

/// Total and used bytes of the filesystem holding `path`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
}

pub fn disk_usage(path: &Path) -> io::Result<DiskUsage> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: valid C string and writable statvfs.
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let frsize = st.f_frsize as u64;
    let total = st.f_blocks as u64 * frsize;
    let free = st.f_bfree as u64 * frsize;
    Ok(DiskUsage {
        total,
        used: total.saturating_sub(free),
    })
}

/// Uptime in seconds and 1-minute load average.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Load {
    pub uptime_secs: i64,
    pub load1: f64,
}

#[cfg(target_os = "linux")]
pub fn load() -> io::Result<Load> {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is a valid, writable sysinfo struct.
    if unsafe { libc::sysinfo(&mut info) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Load {
        uptime_secs: info.uptime as i64,
        // Kernel load averages are fixed point with 16 fractional bits
        load1: info.loads[0] as f64 / 65536.0,
    })
}

#[cfg(not(target_os = "linux"))]
pub fn load() -> io::Result<Load> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "sysinfo is linux only"))
}

#[cfg(test)]
mod tests;
