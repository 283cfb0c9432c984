//! Task model and stripe-column carving.
//!
//! A task is an immutable unit of copy work targeting exactly one storage
//! target. Small files (at most one stripe) become a single batchable task.
//! Large files are carved along *stripe columns*: within a group of
//! `stripe_count x stripes_per_task` stripes, column `j` collects the
//! `stripes_per_task` stripes that all land on the same OST, so the task can
//! be routed to that OST's queue and read with a fixed stride.
//!
//! The carve is exact at the file tail: a column's size is the payload its
//! stripes actually hold below EOF, so the union of all tasks' projected
//! ranges partitions `[0, fsize)` with no gap, overlap, or read past EOF.

use crate::layout::Layout;

/// What a task asks the copy side to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Whole small file; eligible for pack-key batching.
    SmallBatchable,
    /// One stripe column of one group of a large file.
    LargeStripedChunk,
}

/// Immutable unit of copy work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub kind: TaskKind,
    /// Source path, bounded by [`MAX_PATH_LEN`](crate::MAX_PATH_LEN).
    pub path: String,
    /// Payload bytes of this task; always > 0.
    pub size: u64,
    /// First payload byte within the source file.
    pub offset: u64,
    /// The file's layout, carried along for FS-aware executors.
    pub layout: Layout,
    /// The single storage target this task reads from.
    pub dominant_ost: u32,
    /// Read granularity for strided tasks (the layout's stripe size).
    pub stripe_size: u64,
    /// Stripes to skip between reads, in units of `stripe_size`.
    pub stripe_step: u32,
    /// True when the payload is one contiguous byte run.
    pub is_logically_contiguous: bool,
    /// Advisory grouping key for small-file batching; empty for chunks.
    pub pack_key: String,
}

impl Task {
    /// Projects the task back onto logical file byte ranges.
    ///
    /// Contiguous tasks yield one `(offset, len)` pair; strided tasks yield
    /// one pair per stripe, hopping `stripe_step * stripe_size` bytes, with
    /// the final stripe clipped to the remaining payload.
    pub fn covered_ranges(&self) -> CoveredRanges {
        let (run, hop) = if self.is_logically_contiguous {
            (self.size, 0)
        } else {
            (
                self.stripe_size,
                u64::from(self.stripe_step) * self.stripe_size,
            )
        };
        CoveredRanges {
            pos: self.offset,
            remaining: self.size,
            run,
            hop,
        }
    }
}

/// Iterator over a task's projected `(offset, len)` byte ranges.
#[derive(Debug)]
pub struct CoveredRanges {
    pos: u64,
    remaining: u64,
    run: u64,
    hop: u64,
}

impl Iterator for CoveredRanges {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<(u64, u64)> {
        if self.remaining == 0 {
            return None;
        }
        let len = self.run.min(self.remaining);
        let range = (self.pos, len);
        self.remaining -= len;
        self.pos += self.hop;
        Some(range)
    }
}

/// Pack key grouping small files by parent directory and storage target.
pub(crate) fn small_pack_key(path: &str, dominant_ost: u32) -> String {
    let parent = path.rsplit_once('/').map_or("", |(dir, _)| dir);
    format!("dir:{parent}|ost:{dominant_ost}")
}

/// Carves one file into tasks.
///
/// The caller validates the layout first; `stripes_per_task` comes from the
/// configuration and is at least 1. Zero-byte files carve to nothing.
pub fn carve_file(path: &str, fsize: u64, layout: &Layout, stripes_per_task: u32) -> CarvedTasks {
    let stripe_size = layout.stripe_size;
    let small = fsize <= stripe_size;
    CarvedTasks {
        path: path.to_owned(),
        fsize,
        layout: layout.clone(),
        stripes_per_task: u64::from(stripes_per_task),
        small,
        column: 0,
        group_base: 0,
        done: fsize == 0,
    }
}

/// Streaming task iterator for one file.
///
/// Producers dispatch tasks as they are produced, so a very large file never
/// materializes its whole task list.
#[derive(Debug)]
pub struct CarvedTasks {
    path: String,
    fsize: u64,
    layout: Layout,
    stripes_per_task: u64,
    small: bool,
    /// Stripe column within the current group.
    column: u32,
    /// Byte offset of the current group's first stripe.
    group_base: u64,
    done: bool,
}

impl CarvedTasks {
    fn small_task(&self) -> Task {
        let dominant_ost = self.layout.ost_for_stripe(0);
        Task {
            kind: TaskKind::SmallBatchable,
            path: self.path.clone(),
            size: self.fsize,
            offset: 0,
            dominant_ost,
            stripe_size: self.layout.stripe_size,
            stripe_step: 1,
            is_logically_contiguous: true,
            pack_key: small_pack_key(&self.path, dominant_ost),
            layout: self.layout.clone(),
        }
    }

    fn column_task(&self, offset: u64) -> Task {
        let stripe_size = self.layout.stripe_size;
        let stride = u64::from(self.layout.stripe_count) * stripe_size;

        // Exact payload of this column below EOF: full stripes while they
        // fit, then the clipped remainder of the stripe holding EOF.
        let mut size = 0;
        for k in 0..self.stripes_per_task {
            let stripe_off = offset + k * stride;
            if stripe_off >= self.fsize {
                break;
            }
            size += stripe_size.min(self.fsize - stripe_off);
        }
        debug_assert!(size > 0, "column emitted past EOF");

        // A single remaining run reads contiguously; so does any column of a
        // one-wide layout, whose stripes are adjacent.
        let is_logically_contiguous = size <= stripe_size || self.layout.stripe_count == 1;

        Task {
            kind: TaskKind::LargeStripedChunk,
            path: self.path.clone(),
            size,
            offset,
            dominant_ost: self.layout.ost_for_stripe(u64::from(self.column)),
            stripe_size,
            stripe_step: self.layout.stripe_count,
            is_logically_contiguous,
            pack_key: String::new(),
            layout: self.layout.clone(),
        }
    }
}

impl Iterator for CarvedTasks {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        if self.done {
            return None;
        }
        if self.small {
            self.done = true;
            return Some(self.small_task());
        }

        let offset = self.group_base + u64::from(self.column) * self.layout.stripe_size;
        if offset >= self.fsize {
            // Columns only move right within a group and groups only move
            // right in the file, so nothing further can hold data.
            self.done = true;
            return None;
        }
        let task = self.column_task(offset);

        self.column += 1;
        if self.column == self.layout.stripe_count {
            self.column = 0;
            self.group_base +=
                u64::from(self.layout.stripe_count) * self.stripes_per_task * self.layout.stripe_size;
        }
        Some(task)
    }
}
