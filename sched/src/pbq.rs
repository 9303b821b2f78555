//! Priority bitmap queue
//!
//! The per-CPU runnable index: a fixed array of FIFO buckets plus a bitmap
//! with bit `i` set iff bucket `i` is non-empty. Lower bucket = more urgent.
//! Bucket 0 is shared by every real-time task and kept sorted by effective
//! priority, FIFO within equal priority; all other buckets are pure FIFO
//! because the bucket index itself encodes the ordering. The idle task is
//! permanently resident in the last bucket, so `first` always succeeds.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::config::{IDLE_BUCKET, NUM_BUCKETS};
use crate::task::{Task, TaskId};

/// Bitmap over the bucket array, two 64-bit words.
#[derive(Default)]
struct BucketBitmap {
    words: [u64; 2],
}

impl BucketBitmap {
    fn set(&mut self, idx: usize) {
        self.words[idx / 64] |= 1u64 << (idx % 64);
    }

    fn clear(&mut self, idx: usize) {
        self.words[idx / 64] &= !(1u64 << (idx % 64));
    }

    fn test(&self, idx: usize) -> bool {
        (self.words[idx / 64] >> (idx % 64)) & 1 != 0
    }

    /// Lowest set bit at or above `from`.
    fn first_set_from(&self, from: usize) -> Option<usize> {
        let mut word = from / 64;
        if word >= self.words.len() {
            return None;
        }
        let mut bits = self.words[word] & (!0u64).checked_shl((from % 64) as u32).unwrap_or(0);
        loop {
            if bits != 0 {
                return Some(word * 64 + bits.trailing_zeros() as usize);
            }
            word += 1;
            if word >= self.words.len() {
                return None;
            }
            bits = self.words[word];
        }
    }
}

/// Per-CPU ordered multi-queue of runnable tasks.
pub struct PriorityBitmapQueue {
    buckets: [VecDeque<Arc<Task>>; NUM_BUCKETS],
    bitmap: BucketBitmap,
}

impl PriorityBitmapQueue {
    pub fn new() -> Self {
        Self {
            buckets: core::array::from_fn(|_| VecDeque::new()),
            bitmap: BucketBitmap::default(),
        }
    }

    /// Install the permanently resident idle task.
    pub fn init_idle(&mut self, idle: Arc<Task>) {
        debug_assert!(self.buckets[IDLE_BUCKET].is_empty());
        idle.set_queue_idx(IDLE_BUCKET);
        self.buckets[IDLE_BUCKET].push_back(idle);
        self.bitmap.set(IDLE_BUCKET);
    }

    /// Link `task` into bucket `idx`.
    ///
    /// Bucket 0 inserts in ascending effective priority, appending on ties so
    /// equal-priority real-time tasks keep FIFO order.
    pub fn insert(&mut self, task: Arc<Task>, idx: usize) {
        debug_assert!(idx < NUM_BUCKETS);
        task.set_queue_idx(idx);
        let bucket = &mut self.buckets[idx];
        if idx == 0 {
            let prio = task.prio();
            let pos = bucket
                .iter()
                .position(|t| t.prio() > prio)
                .unwrap_or(bucket.len());
            bucket.insert(pos, task);
        } else {
            bucket.push_back(task);
        }
        self.bitmap.set(idx);
    }

    /// Unlink `task` from its bucket. Returns whether it was present.
    pub fn remove(&mut self, task: &Task) -> bool {
        let idx = task.queue_idx();
        debug_assert!(idx < NUM_BUCKETS);
        let bucket = &mut self.buckets[idx];
        let Some(pos) = bucket.iter().position(|t| t.id() == task.id()) else {
            return false;
        };
        let _ = bucket.remove(pos);
        if bucket.is_empty() {
            self.bitmap.clear(idx);
        }
        true
    }

    /// Head of the lowest non-empty bucket. The resident idle task
    /// guarantees there always is one.
    pub fn first(&self) -> &Arc<Task> {
        let idx = self
            .bitmap
            .first_set_from(0)
            .expect("idle task missing from queue");
        &self.buckets[idx][0]
    }

    /// Index of the lowest non-empty bucket.
    pub fn first_bucket(&self) -> usize {
        self.bitmap
            .first_set_from(0)
            .expect("idle task missing from queue")
    }

    /// Whether `task` heads the lowest non-empty bucket.
    pub fn first_is(&self, task: &Task) -> bool {
        self.first().id() == task.id()
    }

    /// Successor of `task`: the next entry in its bucket, else the head of
    /// the next non-empty bucket. Falls back to `first` when the task is no
    /// longer linked.
    pub fn next_after(&self, task: &Task) -> &Arc<Task> {
        let idx = task.queue_idx();
        if idx < NUM_BUCKETS && self.bitmap.test(idx) {
            let bucket = &self.buckets[idx];
            if let Some(pos) = bucket.iter().position(|t| t.id() == task.id()) {
                if pos + 1 < bucket.len() {
                    return &bucket[pos + 1];
                }
                if let Some(next_idx) = self.bitmap.first_set_from(idx + 1) {
                    return &self.buckets[next_idx][0];
                }
            }
        }
        self.first()
    }

    /// Whether a task with this id is linked anywhere.
    pub fn contains(&self, id: TaskId) -> bool {
        self.buckets.iter().any(|b| b.iter().any(|t| t.id() == id))
    }

    /// Iterate runnable tasks in priority order, most urgent first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.buckets.iter().flat_map(|b| b.iter())
    }

    /// Bitmap/bucket agreement; checked after every mutation in debug builds.
    #[cfg(debug_assertions)]
    pub(crate) fn assert_consistent(&self) {
        for idx in 0..NUM_BUCKETS {
            debug_assert_eq!(
                self.bitmap.test(idx),
                !self.buckets[idx].is_empty(),
                "bitmap bit {} disagrees with bucket occupancy",
                idx
            );
        }
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn assert_consistent(&self) {}
}

impl Default for PriorityBitmapQueue {
    fn default() -> Self {
        Self::new()
    }
}
