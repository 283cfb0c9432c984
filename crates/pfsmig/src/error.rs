//! Error types for the migration pipeline.
//!
//! The taxonomy mirrors how failures propagate at runtime: per-entry walk and
//! layout errors stay local to the producer that hit them (logged, entry
//! skipped), while config, wire, and transport errors are fatal to the whole
//! world.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration / topology errors. Surface as exit code 2.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// OST count outside `[1, MAX_OST]`.
    #[error("invalid topology: {side} OST count {count} not in [1, {max}]")]
    InvalidOstCount {
        side: &'static str,
        count: u32,
        max: u32,
    },

    /// Ring capacity must hold at least one task.
    #[error("ring capacity must be >= 1 (got {0})")]
    InvalidRingCapacity(u32),

    /// Large-file carve granularity must be at least one stripe.
    #[error("stripes per task must be >= 1 (got {0})")]
    InvalidStripesPerTask(u32),

    /// Root paths are bounded by the task path limit.
    #[error("{which} path exceeds {max} bytes")]
    PathTooLong { which: &'static str, max: usize },
}

/// Role planning failures. Fatal: the world cannot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Need at least one rank per role band.
    #[error("world size {0} too small: need at least 3 ranks (one per role)")]
    WorldTooSmall(usize),
}

/// Wire codec failures. A corrupt payload is a protocol-level bug and aborts
/// the world.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("payload truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("unknown message tag {0}")]
    BadTag(u32),

    #[error("unknown task kind {0}")]
    BadKind(u8),

    #[error("unknown file system kind {0}")]
    BadFsKind(u8),

    #[error("path field of {0} bytes exceeds the wire limit")]
    PathTooLong(usize),

    #[error("layout carries {0} OST ids, above the supported maximum")]
    TooManyOsts(u32),

    #[error("string field is not valid UTF-8")]
    BadUtf8,
}

/// Message-layer failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The destination endpoint has been torn down.
    #[error("peer rank {0} is disconnected")]
    Disconnected(usize),

    /// Destination rank outside `[0, world)`.
    #[error("rank {rank} outside world of size {world}")]
    BadRank { rank: usize, world: usize },
}

/// Per-entry tree-walk failure. Logged and skipped; never crosses a process
/// boundary.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("cannot read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The simulated tree has no such directory.
    #[error("no such directory: {0}")]
    NotFound(PathBuf),
}

/// Per-file layout retrieval failure. Logged and the file skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Zero stripe size or count, or an OST table that does not match the
    /// stripe count.
    #[error("invalid layout geometry for {path}: {detail}")]
    InvalidGeometry { path: PathBuf, detail: String },

    #[error("layout retrieval failed for {path}: {detail}")]
    Retrieval { path: PathBuf, detail: String },
}

/// Copy execution failure, reported per task by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("copy of {path} [{offset}, +{size}) failed: {detail}")]
pub struct CopyError {
    pub path: PathBuf,
    pub offset: u64,
    pub size: u64,
    pub detail: String,
}

/// Top-level pipeline failure returned by [`run_world`](crate::run_world).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A rank thread panicked; the world is unrecoverable.
    #[error("rank {0} panicked")]
    RankPanicked(usize),
}
