//! OS-level building blocks for the shmtree shared-memory store.
//!
//! This crate knows nothing about schemas or node trees. It provides:
//!
//! - [`Region`] / [`PayloadBuf`]: offset-addressed byte views with
//!   little-endian typed load/store helpers
//! - [`ShmSegment`]: a POSIX named shared-memory object mapped read-write
//! - [`NamedSemaphore`]: a POSIX named counting semaphore
//! - [`monotonic_ms`]: the millisecond monotonic clock used for update
//!   timestamps

mod clock;
mod region;
mod sem;
mod shm;

pub use clock::monotonic_ms;
pub use region::{PayloadBuf, Region};
pub use sem::NamedSemaphore;
pub use shm::ShmSegment;
