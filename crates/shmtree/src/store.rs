//! The attached store: segment lifecycle, init handshake, locks and
//! update timestamps.
//!
//! Opening a store compiles the schema, opens (creating if needed) the
//! named segment at the computed size, opens the per-composite semaphores,
//! and then settles who initializes:
//!
//! - a segment whose validity byte reads `0xA5` and whose header checks out
//!   is attached as-is, no payload byte touched
//! - a segment mid-initialization (`0x5A`) is waited on via the init
//!   semaphore, with a bounded timeout
//! - anything else (fresh zeroes, failed validation) is initialized here:
//!   the init semaphore is taken, the validity byte is re-checked in case
//!   someone else won the race, and only then are defaults written
//!
//! A corrupt header is logged and recovered by re-initializing, never an
//! error; only segment or semaphore open failures abort the attach.

use std::io;
use std::path::Path;
use std::time::Duration;

use shmtree_primitives::{NamedSemaphore, Region, ShmSegment, monotonic_ms};

use crate::access;
use crate::bridge::{json_to_bool, json_to_f64, json_to_i64, json_to_string};
use crate::error::StoreError;
use crate::header;
use crate::layout::HEADER_SIZE;
use crate::node::{Node, NodeId, NodeTree};
use crate::schema::{Kind, Schema};

/// How long an attacher waits for someone else's in-flight initialization.
const INIT_WAIT: Duration = Duration::from_millis(400);

/// Polling interval of [`SharedTree::wait_for_update`].
const UPDATE_POLL: Duration = Duration::from_micros(50);

/// A schema-defined structured store attached to a named shared-memory
/// segment.
///
/// All reads and writes go through paths or [`NodeId`]s resolved against
/// the compiled tree; see the generic accessors (`read`, `write`, `value`,
/// `update`) driven by the [`Scalar`](crate::Scalar) trait.
pub struct SharedTree {
    tree: NodeTree,
    shm: ShmSegment,
    /// Subtree semaphores, indexed by `Node::sem`.
    sems: Vec<NamedSemaphore>,
    init_sem: NamedSemaphore,
    initialized: bool,
}

impl SharedTree {
    /// Attach to `segment`, creating and initializing it if no valid
    /// instance exists.
    ///
    /// `segment` is a POSIX shared-memory name such as `"/sysdata"`.
    pub fn open(schema: &Schema, segment: &str) -> Result<Self, StoreError> {
        let tree = NodeTree::build(schema)?;
        let size = tree.payload_size();

        let shm = ShmSegment::open(segment, size).map_err(StoreError::SegmentOpen)?;

        let prefix = sem_prefix(segment);
        let init_name = format!("/{prefix}_init");
        let init_sem = open_sem(&init_name)?;
        let mut sems = Vec::with_capacity(tree.num_semaphores() as usize);
        for i in 0..tree.num_semaphores() {
            sems.push(open_sem(&format!("/{prefix}_{i}"))?);
        }

        let mut store = Self {
            tree,
            shm,
            sems,
            init_sem,
            initialized: false,
        };
        store.settle_initialization();
        Ok(store)
    }

    /// Like [`open`](Self::open), but runs `f` if this attacher was the one
    /// that initialized the segment.
    ///
    /// There is usually no telling which process attaches first, so every
    /// process that depends on the extra initialization should use this
    /// form with the same callback.
    pub fn open_with<F>(schema: &Schema, segment: &str, f: F) -> Result<Self, StoreError>
    where
        F: FnOnce(&SharedTree),
    {
        let store = Self::open(schema, segment)?;
        if store.initialized {
            f(&store);
        }
        Ok(store)
    }

    /// Read the schema from a JSON file, then [`open`](Self::open).
    pub fn open_file<P: AsRef<Path>>(schema_path: P, segment: &str) -> Result<Self, StoreError> {
        let schema = Schema::from_file(schema_path).map_err(StoreError::Schema)?;
        Self::open(&schema, segment)
    }

    /// True if this attacher wrote the defaults.
    #[inline]
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// The compiled node tree.
    #[inline]
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// The segment name this store is attached to.
    #[inline]
    pub fn segment_name(&self) -> &str {
        self.shm.name()
    }

    /// Total payload size `S` in bytes.
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.tree.payload_size()
    }

    /// Resolve a `.`- or `/`-separated path from the root.
    #[inline]
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        self.tree.resolve(path)
    }

    /// Resolve a path relative to `base`.
    #[inline]
    pub fn resolve_from(&self, base: NodeId, path: &str) -> Option<NodeId> {
        self.tree.resolve_from(base, path)
    }

    /// Child of a composite by position.
    #[inline]
    pub fn child_at(&self, node: NodeId, idx: usize) -> Option<NodeId> {
        self.tree.child_at(node, idx)
    }

    pub(crate) fn region(&self) -> Region {
        self.shm.region()
    }

    // ── locking ─────────────────────────────────────────────────────────────

    /// Take the subtree semaphore governing `node`.
    ///
    /// Pair with [`unlock`](Self::unlock); between the two, access the
    /// subtree's primitives with `protect = false`. Never take a second
    /// semaphore while holding one.
    pub fn lock(&self, node: NodeId) -> bool {
        let sem = &self.sems[self.tree.node(node).sem as usize];
        match sem.wait() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(sem = sem.name(), error = %e, "semaphore wait failed");
                false
            }
        }
    }

    /// Release the subtree semaphore governing `node`.
    pub fn unlock(&self, node: NodeId) -> bool {
        let sem = &self.sems[self.tree.node(node).sem as usize];
        match sem.post() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(sem = sem.name(), error = %e, "semaphore post failed");
                false
            }
        }
    }

    /// Resolve `path` and take its subtree semaphore.
    pub fn lock_at(&self, path: &str) -> bool {
        match self.tree.resolve(path) {
            Some(id) => self.lock(id),
            None => {
                tracing::warn!(path, "lock of unresolvable path");
                false
            }
        }
    }

    /// Resolve `path` and release its subtree semaphore.
    pub fn unlock_at(&self, path: &str) -> bool {
        match self.tree.resolve(path) {
            Some(id) => self.unlock(id),
            None => {
                tracing::warn!(path, "unlock of unresolvable path");
                false
            }
        }
    }

    /// Acquire the subtree semaphore governing `node` as an RAII guard.
    pub(crate) fn guard(&self, node: &Node) -> io::Result<SemGuard<'_>> {
        SemGuard::acquire(&self.sems[node.sem as usize])
    }

    /// [`guard`](Self::guard) when `protect` is set, nothing otherwise.
    ///
    /// The error is the failed `sem_wait`; callers drop the access rather
    /// than touching the subtree unlocked.
    pub(crate) fn guard_for<'a>(
        &'a self,
        node: &Node,
        protect: bool,
    ) -> io::Result<Option<SemGuard<'a>>> {
        if protect {
            self.guard(node).map(Some)
        } else {
            Ok(None)
        }
    }

    // ── update timestamps ───────────────────────────────────────────────────

    /// A node's last-update time in monotonic milliseconds; 0 means never.
    ///
    /// For composites this is the maximum over all descendant primitives.
    pub fn update_time(&self, node: NodeId) -> u64 {
        let n = self.tree.node(node);
        if n.kind.is_composite() {
            n.children
                .iter()
                .map(|&c| self.update_time(c))
                .max()
                .unwrap_or(0)
        } else {
            self.region().read_u64(n.time_offset as usize)
        }
    }

    /// Stamp a primitive's update slot with the current time without
    /// changing its value.
    pub fn set_update_time(&self, node: NodeId) -> bool {
        let n = self.tree.node(node);
        if n.kind.is_composite() {
            tracing::debug!(name = %n.name, "set_update_time on a composite");
            return false;
        }
        self.stamp(n);
        true
    }

    /// [`update_time`](Self::update_time) for a path; 0 if it does not
    /// resolve.
    pub fn update_time_at(&self, path: &str) -> u64 {
        match self.tree.resolve(path) {
            Some(id) => self.update_time(id),
            None => {
                tracing::warn!(path, "update_time of unresolvable path");
                0
            }
        }
    }

    pub(crate) fn stamp(&self, node: &Node) {
        self.region()
            .write_u64(node.time_offset as usize, monotonic_ms());
    }

    /// Poll a primitive's update slot until it exceeds `start_ms`.
    ///
    /// `start_ms` of 0 means "from now". Polls every 50 µs; returns false
    /// once `timeout_ms` elapses without an update.
    pub fn wait_for_update(&self, node: NodeId, start_ms: u64, timeout_ms: u64) -> bool {
        let n = self.tree.node(node);
        if n.kind.is_composite() {
            tracing::debug!(name = %n.name, "wait_for_update on a composite");
            return false;
        }
        let now = monotonic_ms();
        let start = if start_ms == 0 { now } else { start_ms };
        let deadline = now + timeout_ms;
        let region = self.region();
        loop {
            if region.read_u64_volatile(n.time_offset as usize) > start {
                return true;
            }
            if monotonic_ms() >= deadline {
                return false;
            }
            std::thread::sleep(UPDATE_POLL);
        }
    }

    /// [`wait_for_update`](Self::wait_for_update) for a path; false if it
    /// does not resolve.
    pub fn wait_for_update_at(&self, path: &str, start_ms: u64, timeout_ms: u64) -> bool {
        match self.tree.resolve(path) {
            Some(id) => self.wait_for_update(id, start_ms, timeout_ms),
            None => {
                tracing::warn!(path, "wait_for_update of unresolvable path");
                false
            }
        }
    }

    // ── initialization ──────────────────────────────────────────────────────

    fn settle_initialization(&mut self) {
        let region = self.region();
        let mut validity = region.read_u8(0);

        if validity == header::INITIALIZING {
            // someone else is mid-initialization; give them a moment
            std::thread::sleep(Duration::from_millis(1));
            match self.init_sem.timed_wait(INIT_WAIT) {
                Ok(true) => {
                    let _ = self.init_sem.post();
                }
                Ok(false) => {
                    tracing::warn!(
                        segment = self.shm.name(),
                        "timed out waiting for segment initialization"
                    );
                }
                Err(e) => {
                    tracing::warn!(segment = self.shm.name(), error = %e, "init wait failed");
                }
            }
            validity = region.read_u8(0);
        }

        match validity {
            header::VALID => match header::validate(&region) {
                Ok(()) => return,
                Err(reason) => {
                    tracing::warn!(
                        segment = self.shm.name(),
                        reason,
                        "segment header invalid; re-initializing"
                    );
                }
            },
            header::INITIALIZING => {
                tracing::warn!(
                    segment = self.shm.name(),
                    "segment still initializing after wait; treating as corrupt"
                );
            }
            _ => {}
        }

        // We believe the segment needs initializing. Take the init
        // semaphore so exactly one attacher writes, then re-check: the
        // winner of the race may have finished while we waited.
        let got = match self.init_sem.timed_wait(INIT_WAIT) {
            Ok(got) => got,
            Err(e) => {
                tracing::warn!(segment = self.shm.name(), error = %e, "init acquire failed");
                false
            }
        };
        if !got {
            tracing::warn!(
                segment = self.shm.name(),
                "init semaphore unavailable; initializing anyway"
            );
        }

        if region.read_u8(0) == header::VALID && header::validate(&region).is_ok() {
            let _ = self.init_sem.post();
            return;
        }

        self.write_defaults();
        self.initialized = true;
        let _ = self.init_sem.post();
    }

    /// Initializer path: mark the segment in-flight, zero the payload,
    /// write every primitive's default, then publish the header and flip
    /// the validity byte last.
    fn write_defaults(&self) {
        let region = self.region();
        let size = self.tree.payload_size();

        region.write_u8(0, header::INITIALIZING);
        region.fill(HEADER_SIZE, size - HEADER_SIZE, 0);

        for id in self.tree.ids() {
            let n = self.tree.node(id);
            match n.kind {
                Kind::F64 => {
                    access::store_f64(&region, n, json_to_f64(&n.default));
                }
                Kind::I64 | Kind::I32 | Kind::I16 | Kind::I8 => {
                    access::store_i64(&region, n, json_to_i64(&n.default));
                }
                Kind::Bool => {
                    access::store_bool(&region, n, json_to_bool(&n.default));
                }
                Kind::FixedStr => {
                    region.write_cstr(
                        n.data_offset as usize,
                        n.size as usize,
                        &json_to_string(&n.default),
                    );
                }
                Kind::Unit | Kind::Array => {}
            }
        }

        header::fill(&region);
        region.write_u8(0, header::VALID);
        tracing::debug!(
            segment = self.shm.name(),
            size,
            primitives = self.tree.plan().num_primitives(),
            "segment initialized"
        );
    }
}

/// RAII hold of one subtree semaphore.
///
/// A guard only exists after a successful wait, so dropping it posts
/// exactly once per acquired permit; a failed wait surfaces as an error
/// and never reaches the post.
pub(crate) struct SemGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl<'a> SemGuard<'a> {
    fn acquire(sem: &'a NamedSemaphore) -> io::Result<Self> {
        sem.wait()?;
        Ok(Self { sem })
    }
}

impl Drop for SemGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.post() {
            tracing::error!(sem = self.sem.name(), error = %e, "semaphore post failed");
        }
    }
}

fn open_sem(name: &str) -> Result<NamedSemaphore, StoreError> {
    NamedSemaphore::open(name, 1).map_err(|e| StoreError::SemaphoreOpen {
        name: name.to_owned(),
        source: e,
    })
}

/// Semaphore name prefix for a segment: the segment name with the leading
/// slash dropped (any further separators flattened, to stay a legal
/// semaphore name).
fn sem_prefix(segment: &str) -> String {
    segment
        .trim_start_matches('/')
        .replace(['/', '.'], "_")
}
