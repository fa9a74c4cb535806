//! The monotonic millisecond clock used for update timestamps.

/// Milliseconds from `CLOCK_MONOTONIC`, with nanoseconds rounded to the
/// nearest millisecond: `sec * 1000 + (nsec + 500_000) / 1_000_000`.
///
/// The epoch is boot-relative, so values are comparable between processes
/// on one host but carry no wall-clock meaning. Zero is reserved to mean
/// "never updated" by the timestamp slots; the clock itself only returns 0
/// in the first half-millisecond after boot.
pub fn monotonic_ms() -> u64 {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // clock_gettime(CLOCK_MONOTONIC) cannot fail with a valid timespec.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1000 + ((ts.tv_nsec as u64) + 500_000) / 1_000_000
}
