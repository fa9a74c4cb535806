//! POSIX named counting semaphores.
//!
//! Named semaphores are the cross-process mutual-exclusion primitive for
//! the store: one per composite subtree, plus one guarding first-time
//! segment initialization. Handles are opened (never destroyed) by each
//! attacher; dropping a handle closes it without unlinking the name.

use std::ffi::CString;
use std::io;
use std::time::Duration;

/// A handle to a named POSIX semaphore.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

impl NamedSemaphore {
    /// Open the named semaphore, creating it with `initial` permits if it
    /// does not exist yet.
    ///
    /// `name` must start with `/` and contain no further slashes, per
    /// `sem_open(3)`.
    pub fn open(name: &str, initial: u32) -> io::Result<Self> {
        let c_name = CString::new(name).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "semaphore name contains NUL")
        })?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: name.to_owned(),
        })
    }

    /// The name this handle was opened with.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until a permit is available, then take it.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    /// Wait for a permit for at most `timeout`.
    ///
    /// Returns `Ok(true)` if the permit was taken, `Ok(false)` on timeout.
    pub fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = realtime_deadline(timeout)?;
        loop {
            if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    /// Release one permit.
    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Remove the named semaphore from the system.
    ///
    /// Open handles stay usable. Only tests and operator tooling call this;
    /// the store itself leaves semaphores in place alongside their segment.
    pub fn unlink(name: &str) -> io::Result<()> {
        let c_name = CString::new(name).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "semaphore name contains NUL")
        })?;
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

// SAFETY: sem_wait/sem_post are thread-safe on a shared sem_t; the handle
// itself is only closed on drop.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

/// Absolute CLOCK_REALTIME deadline `timeout` from now, as required by
/// `sem_timedwait(3)`.
fn realtime_deadline(timeout: Duration) -> io::Result<libc::timespec> {
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut sec = now.tv_sec + timeout.as_secs() as libc::time_t;
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec += 1;
    }
    Ok(libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_name(tag: &str) -> String {
        format!("/shmtree_sem_{}_{}", tag, std::process::id())
    }

    #[test]
    fn wait_and_post() {
        let name = scratch_name("basic");
        let _ = NamedSemaphore::unlink(&name);

        let sem = NamedSemaphore::open(&name, 1).unwrap();
        sem.wait().unwrap();
        sem.post().unwrap();

        drop(sem);
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn timed_wait_times_out_when_empty() {
        let name = scratch_name("timeout");
        let _ = NamedSemaphore::unlink(&name);

        let sem = NamedSemaphore::open(&name, 0).unwrap();
        let got = sem.timed_wait(Duration::from_millis(20)).unwrap();
        assert!(!got);

        drop(sem);
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn second_open_sees_same_counter() {
        let name = scratch_name("shared");
        let _ = NamedSemaphore::unlink(&name);

        let a = NamedSemaphore::open(&name, 1).unwrap();
        let b = NamedSemaphore::open(&name, 1).unwrap();

        a.wait().unwrap();
        // permit is gone for b as well
        assert!(!b.timed_wait(Duration::from_millis(20)).unwrap());
        a.post().unwrap();
        assert!(b.timed_wait(Duration::from_millis(200)).unwrap());
        b.post().unwrap();

        drop(a);
        drop(b);
        NamedSemaphore::unlink(&name).unwrap();
    }
}
