//! Shared test support: unique segment names and teardown.
//!
//! Segments and semaphores are named objects that outlive the process, so
//! every test derives a unique name from its tag and the pid, scrubs any
//! leftovers from a previous crashed run, and unlinks everything on drop.

use shmtree::{NamedSemaphore, ShmSegment};

pub struct Scratch {
    pub segment: String,
}

impl Scratch {
    pub fn new(tag: &str) -> Self {
        init_tracing();
        let segment = format!("/shmtree_test_{}_{}", tag, std::process::id());
        cleanup(&segment);
        Self { segment }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        cleanup(&self.segment);
    }
}

fn cleanup(segment: &str) {
    let _ = ShmSegment::unlink(segment);
    let prefix = segment.trim_start_matches('/');
    let _ = NamedSemaphore::unlink(&format!("/{prefix}_init"));
    for i in 0..64 {
        let _ = NamedSemaphore::unlink(&format!("/{prefix}_{i}"));
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
