//! POSIX named shared-memory segments.
//!
//! A segment is created (or reopened) with `shm_open`, sized with
//! `ftruncate`, and mapped read-write with `MAP_SHARED`. Dropping a
//! [`ShmSegment`] unmaps and closes the descriptor but never unlinks the
//! name: the segment outliving its last attacher is the point.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use crate::Region;

/// A mapped POSIX shared-memory object.
pub struct ShmSegment {
    ptr: *mut u8,
    len: usize,
    name: String,
    // Held only to keep the descriptor alive until unmap; some tooling
    // (fstat on /proc) also wants it open.
    #[allow(dead_code)]
    fd: OwnedFd,
}

impl ShmSegment {
    /// Open the named segment read-write, creating it if absent.
    ///
    /// If the object was just created, or its current size differs from
    /// `size`, it is truncated to `size` (a fresh object reads as all
    /// zeroes). The mapping is `MAP_SHARED`, so stores are visible to every
    /// other attacher immediately.
    ///
    /// `name` must start with `/` and contain no further slashes, per
    /// `shm_open(3)`.
    pub fn open(name: &str, size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "segment size must be > 0",
            ));
        }
        let c_name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "segment name contains NUL"))?;

        let raw = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o666 as libc::mode_t,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if st.st_size as usize != size {
            if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            len: size,
            name: name.to_owned(),
            fd,
        })
    }

    /// Get a [`Region`] view of the mapping.
    #[inline]
    pub fn region(&self) -> Region {
        unsafe { Region::from_raw(self.ptr, self.len) }
    }

    /// Mapping size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mapping is empty (never the case after `open`).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The segment name this mapping was opened with.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the named object from the system.
    ///
    /// Existing mappings stay valid; the kernel frees the memory once the
    /// last one goes away. This is an explicit operation for tests and
    /// operator tooling; dropping a segment never unlinks.
    pub fn unlink(name: &str) -> io::Result<()> {
        let c_name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "segment name contains NUL"))?;
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

// SAFETY: the mapping stays valid for the struct's lifetime; concurrent
// access is governed by the semaphore contract one level up.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}
