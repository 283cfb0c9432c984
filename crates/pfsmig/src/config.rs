//! Run configuration: file format, defaults, validation, broadcast codec.
//!
//! The on-disk format is line-oriented `KEY = VALUE` text. Blank lines and
//! `#` comments are ignored, unknown keys warn, malformed lines warn and are
//! skipped, and a missing file warns and falls back to defaults — a run
//! should never die on a cosmetic config problem. Hard topology violations
//! (OST count out of range, zero ring capacity) are a different matter and
//! fail validation before the world starts.
//!
//! The record is built once on the coordinator and broadcast to every rank
//! as an explicitly encoded byte string (fixed field order, fixed widths,
//! little-endian), then immutable for the run.

use crate::error::{ConfigError, WireError};
use crate::wire::{Reader, Writer};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Maximum storage targets per side.
pub const MAX_OST: u32 = 512;

/// Maximum path length carried in tasks and configuration.
pub const MAX_PATH_LEN: usize = 4096;

/// Validated, immutable run configuration.
///
/// Role counts of zero mean "unset"; the role planner substitutes its
/// default split unless all three are supplied and sum to the world size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    pub num_p: u32,
    pub num_q: u32,
    pub num_c: u32,

    pub num_source_mdt: u32,
    pub num_source_ost: u32,
    pub num_target_mdt: u32,
    pub num_target_ost: u32,

    pub source_path: String,
    pub target_path: String,

    /// Per-OST ring queue capacity, in tasks.
    pub ring_capacity: u32,
    /// Stripes per large-file column task.
    pub stripes_per_task: u32,
    /// Small-file coalescing bound; 1 disables batching.
    pub max_tasks_per_batch: u32,

    /// Simulated write cost, ms per MiB.
    pub time_write: u32,
    /// Simulated read cost, ms per MiB.
    pub time_read: u32,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            num_p: 0,
            num_q: 0,
            num_c: 0,
            num_source_mdt: 1,
            num_source_ost: 8,
            num_target_mdt: 1,
            num_target_ost: 8,
            source_path: String::new(),
            target_path: String::new(),
            ring_capacity: 20_000,
            stripes_per_task: 16,
            max_tasks_per_batch: 32,
            time_write: 1,
            time_read: 1,
        }
    }
}

impl MigrateConfig {
    /// Loads from `path`, falling back to defaults when the file is absent.
    ///
    /// Only the coordinator rank calls this; everyone else receives the
    /// record over the wire.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) => {
                warn!(path = %path.display(), %err, "config file not readable, using defaults");
                Self::default()
            }
        }
    }

    /// Parses the `KEY = VALUE` text, skipping anything it cannot use.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for (lineno, raw) in text.lines().enumerate() {
            // Strip trailing comment, then surrounding whitespace.
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(lineno = lineno + 1, line = raw, "config line has no '=', skipped");
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if let Err(err) = config.apply(key, value) {
                warn!(lineno = lineno + 1, key, value, %err, "config line skipped");
            }
        }
        config
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ParseFieldError> {
        fn int(value: &str) -> Result<u32, ParseFieldError> {
            value.parse().map_err(|_| ParseFieldError::NotAnInteger)
        }
        match key {
            "NUM_P" => self.num_p = int(value)?,
            "NUM_Q" => self.num_q = int(value)?,
            "NUM_C" => self.num_c = int(value)?,
            "NUM_SOURCE_MDT" => self.num_source_mdt = int(value)?,
            "NUM_SOURCE_OST" => self.num_source_ost = int(value)?,
            "NUM_TARGET_MDT" => self.num_target_mdt = int(value)?,
            "NUM_TARGET_OST" => self.num_target_ost = int(value)?,
            "SOURCE_PATH" => self.source_path = value.to_owned(),
            "TARGET_PATH" => self.target_path = value.to_owned(),
            "CAP_RING" => self.ring_capacity = int(value)?,
            "STRIPES_PER_TASK" => self.stripes_per_task = int(value)?,
            "MAX_TASKS_PER_BATCH" => self.max_tasks_per_batch = int(value)?,
            "TIME_WRITE" => self.time_write = int(value)?,
            "TIME_READ" => self.time_read = int(value)?,
            _ => return Err(ParseFieldError::UnknownKey),
        }
        Ok(())
    }

    /// Checks the hard topology invariants. Violations abort the run
    /// before any rank thread starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_source_ost == 0 || self.num_source_ost > MAX_OST {
            return Err(ConfigError::InvalidOstCount {
                side: "source",
                count: self.num_source_ost,
                max: MAX_OST,
            });
        }
        if self.num_target_ost == 0 || self.num_target_ost > MAX_OST {
            return Err(ConfigError::InvalidOstCount {
                side: "target",
                count: self.num_target_ost,
                max: MAX_OST,
            });
        }
        if self.ring_capacity == 0 {
            return Err(ConfigError::InvalidRingCapacity(self.ring_capacity));
        }
        if self.stripes_per_task == 0 {
            return Err(ConfigError::InvalidStripesPerTask(self.stripes_per_task));
        }
        if self.source_path.len() > MAX_PATH_LEN {
            return Err(ConfigError::PathTooLong {
                which: "source",
                max: MAX_PATH_LEN,
            });
        }
        if self.target_path.len() > MAX_PATH_LEN {
            return Err(ConfigError::PathTooLong {
                which: "target",
                max: MAX_PATH_LEN,
            });
        }
        Ok(())
    }

    /// Role counts, when all three are supplied.
    pub fn explicit_roles(&self) -> Option<(u32, u32, u32)> {
        (self.num_p > 0 && self.num_q > 0 && self.num_c > 0)
            .then_some((self.num_p, self.num_q, self.num_c))
    }

    // ---------------------------------------------------------------------
    // Broadcast codec
    // ---------------------------------------------------------------------

    /// Encodes for the coordinator broadcast.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.num_p);
        w.put_u32(self.num_q);
        w.put_u32(self.num_c);
        w.put_u32(self.num_source_mdt);
        w.put_u32(self.num_source_ost);
        w.put_u32(self.num_target_mdt);
        w.put_u32(self.num_target_ost);
        w.put_u32(self.ring_capacity);
        w.put_u32(self.stripes_per_task);
        w.put_u32(self.max_tasks_per_batch);
        w.put_u32(self.time_write);
        w.put_u32(self.time_read);
        w.put_str(&self.source_path);
        w.put_str(&self.target_path);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let config = Self {
            num_p: r.get_u32()?,
            num_q: r.get_u32()?,
            num_c: r.get_u32()?,
            num_source_mdt: r.get_u32()?,
            num_source_ost: r.get_u32()?,
            num_target_mdt: r.get_u32()?,
            num_target_ost: r.get_u32()?,
            ring_capacity: r.get_u32()?,
            stripes_per_task: r.get_u32()?,
            max_tasks_per_batch: r.get_u32()?,
            time_write: r.get_u32()?,
            time_read: r.get_u32()?,
            source_path: r.get_str()?,
            target_path: r.get_str()?,
        };
        Ok(config)
    }
}

/// Where the coordinator gets its configuration.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Load `KEY = VALUE` text from this path (missing file -> defaults).
    File(std::path::PathBuf),
    /// Use an already-built record.
    Value(MigrateConfig),
}

impl ConfigSource {
    pub(crate) fn resolve(&self) -> MigrateConfig {
        match self {
            Self::File(path) => MigrateConfig::load_or_default(path),
            Self::Value(config) => config.clone(),
        }
    }
}

#[derive(Debug)]
enum ParseFieldError {
    UnknownKey,
    NotAnInteger,
}

impl fmt::Display for ParseFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey => write!(f, "unknown key"),
            Self::NotAnInteger => write!(f, "value is not an integer"),
        }
    }
}
