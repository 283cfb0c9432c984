//! Deterministic simulation harness for the migration pipeline.
//!
//! Provides in-memory stand-ins for every external boundary the core talks
//! to — a virtual directory tree ([`SimTree`]), a deterministic layout
//! provider ([`FixedLayouts`]), and a recording copy executor
//! ([`RecordingCopy`]) — plus [`run_sim`], which wires them into a full
//! in-process world. End-to-end scenario tests live in `tests/`.

use pfsmig::{
    run_world, ConfigSource, CopyError, CopyExecutor, EntryKind, FsKind, Layout, LayoutProvider,
    LayoutError, MigrateConfig, PipelineError, RankCaps, Task, WalkEntry, WalkError, Walker,
    WorldReport,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

// ---------------------------------------------------------------------
// Virtual directory tree
// ---------------------------------------------------------------------

/// Builds a [`SimTree`] from flat `(path, size)` declarations; parent
/// directories materialize automatically.
#[derive(Debug, Default)]
pub struct SimTreeBuilder {
    dirs: BTreeMap<PathBuf, Vec<WalkEntry>>,
}

impl SimTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares one regular file.
    pub fn file(mut self, path: &str, size: u64) -> Self {
        let path = PathBuf::from(path);
        let parent = path.parent().unwrap_or(Path::new("/")).to_path_buf();
        self.ensure_dir(&parent);
        if let Some(entries) = self.dirs.get_mut(&parent) {
            entries.push(WalkEntry {
                path,
                kind: EntryKind::File,
                size,
            });
        }
        self
    }

    fn ensure_dir(&mut self, dir: &Path) {
        if self.dirs.contains_key(dir) {
            return;
        }
        self.dirs.insert(dir.to_path_buf(), Vec::new());
        if let Some(parent) = dir.parent() {
            self.ensure_dir(parent);
            if let Some(entries) = self.dirs.get_mut(parent) {
                entries.push(WalkEntry {
                    path: dir.to_path_buf(),
                    kind: EntryKind::Dir,
                    size: 0,
                });
            }
        }
    }

    pub fn build(self) -> SimTree {
        SimTree {
            dirs: Arc::new(self.dirs),
        }
    }
}

/// Immutable in-memory directory tree; cheap to clone across rank threads.
#[derive(Debug, Clone)]
pub struct SimTree {
    dirs: Arc<BTreeMap<PathBuf, Vec<WalkEntry>>>,
}

impl Walker for SimTree {
    fn list_dir(&self, dir: &Path) -> Result<Vec<WalkEntry>, WalkError> {
        self.dirs
            .get(dir)
            .cloned()
            .ok_or_else(|| WalkError::NotFound(dir.to_path_buf()))
    }
}

// ---------------------------------------------------------------------
// Deterministic layouts
// ---------------------------------------------------------------------

/// How a file's stripe start is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Stable path hash, the default placement of real striped file systems
    /// approximated without one.
    Hash,
    /// Every file starts on the same target; scenario setups use this to
    /// make dominant OSTs exactly predictable.
    Fixed(u32),
    /// Trailing decimal digits of the file name modulo the OST count;
    /// `f0..f99` spread exactly uniformly.
    FileIndex,
}

/// Layout provider with fixed geometry and a deterministic start policy.
#[derive(Debug, Clone)]
pub struct FixedLayouts {
    pub num_ost: u32,
    pub stripe_size: u64,
    pub stripe_count: u32,
    pub start: StartMode,
}

impl FixedLayouts {
    fn start_of(&self, path: &Path) -> u32 {
        let hash = || (pfsmig::djb2(path.to_string_lossy().as_bytes()) % u64::from(self.num_ost)) as u32;
        match self.start {
            StartMode::Hash => hash(),
            StartMode::Fixed(start) => start % self.num_ost,
            StartMode::FileIndex => {
                let stem = path.file_name().map(|n| n.to_string_lossy().into_owned());
                let digits: String = stem
                    .unwrap_or_default()
                    .chars()
                    .rev()
                    .take_while(char::is_ascii_digit)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                match digits.parse::<u32>() {
                    Ok(index) => index % self.num_ost,
                    Err(_) => hash(),
                }
            }
        }
    }
}

impl LayoutProvider for FixedLayouts {
    fn layout_of(&self, path: &Path, _size: u64) -> Result<Layout, LayoutError> {
        let start = self.start_of(path);
        let ost_ids = (0..self.stripe_count)
            .map(|slot| (start + slot) % self.num_ost)
            .collect();
        Ok(Layout {
            fs: FsKind::Generic,
            stripe_size: self.stripe_size,
            stripe_count: self.stripe_count,
            stripe_start: 0,
            ost_ids,
        })
    }
}

// ---------------------------------------------------------------------
// Recording executor
// ---------------------------------------------------------------------

/// One executed task, as the consumer saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub path: String,
    pub offset: u64,
    pub size: u64,
    pub dominant_ost: u32,
    /// The task's projected file ranges, for coverage assertions.
    pub ranges: Vec<(u64, u64)>,
}

/// Copy executor that records every task, optionally sleeping a fixed
/// per-task delay to emulate a slow consumer.
#[derive(Debug, Clone, Default)]
pub struct RecordingCopy {
    records: Arc<Mutex<Vec<CopyRecord>>>,
    delay: Option<Duration>,
}

impl RecordingCopy {
    pub fn new(delay: Option<Duration>) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            delay,
        }
    }

    /// Snapshot of everything executed so far, across all consumers.
    pub fn records(&self) -> Vec<CopyRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl CopyExecutor for RecordingCopy {
    fn execute(&mut self, task: &Task) -> Result<(), CopyError> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let record = CopyRecord {
            path: task.path.clone(),
            offset: task.offset,
            size: task.size,
            dominant_ost: task.dominant_ost,
            ranges: task.covered_ranges().collect(),
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Whole-world harness
// ---------------------------------------------------------------------

/// Runs a full world against the simulated boundaries and returns the
/// report plus every executed task.
pub fn run_sim(
    world: usize,
    config: MigrateConfig,
    tree: SimTree,
    layouts: FixedLayouts,
    delay: Option<Duration>,
) -> Result<(WorldReport, Vec<CopyRecord>), PipelineError> {
    let recorder = RecordingCopy::new(delay);
    let executor = recorder.clone();
    let report = run_world(world, ConfigSource::Value(config), move |_rank, _role, _cfg| {
        RankCaps {
            walker: Box::new(tree.clone()),
            layouts: Box::new(layouts.clone()),
            executor: Box::new(executor.clone()),
        }
    })?;
    Ok((report, recorder.records()))
}

/// Asserts that `records` for `path` exactly partition `[0, fsize)` once
/// projected to file ranges.
pub fn assert_full_coverage(records: &[CopyRecord], path: &str, fsize: u64) {
    let mut ranges: Vec<(u64, u64)> = records
        .iter()
        .filter(|r| r.path == path)
        .flat_map(|r| r.ranges.iter().copied())
        .collect();
    ranges.sort_unstable();
    let mut cursor = 0;
    for (off, len) in ranges {
        assert_eq!(off, cursor, "gap or overlap in coverage of {path} at {off}");
        cursor = off + len;
    }
    assert_eq!(cursor, fsize, "coverage of {path} stops short of EOF");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_tree_lists_children() {
        let tree = SimTreeBuilder::new()
            .file("/src/a/x.dat", 10)
            .file("/src/a/y.dat", 20)
            .file("/src/b/z.dat", 30)
            .build();
        let root = tree.list_dir(Path::new("/src")).unwrap();
        assert_eq!(root.len(), 2);
        assert!(root.iter().all(|e| e.kind == EntryKind::Dir));
        let a = tree.list_dir(Path::new("/src/a")).unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|e| e.kind == EntryKind::File));
        assert!(tree.list_dir(Path::new("/src/c")).is_err());
    }

    #[test]
    fn test_file_index_start_mode() {
        let layouts = FixedLayouts {
            num_ost: 4,
            stripe_size: 1 << 20,
            stripe_count: 1,
            start: StartMode::FileIndex,
        };
        for i in 0..8u32 {
            let path = PathBuf::from(format!("/src/f{i}"));
            let layout = layouts.layout_of(&path, 1).unwrap();
            assert_eq!(layout.ost_ids, vec![i % 4]);
        }
    }

    #[test]
    fn test_recording_copy_captures_ranges() {
        let mut recorder = RecordingCopy::new(None);
        let layouts = FixedLayouts {
            num_ost: 2,
            stripe_size: 100,
            stripe_count: 2,
            start: StartMode::Fixed(0),
        };
        let layout = layouts.layout_of(Path::new("/f"), 500).unwrap();
        for task in pfsmig::carve_file("/f", 500, &layout, 2) {
            recorder.execute(&task).unwrap();
        }
        let records = recorder.records();
        assert!(!records.is_empty());
        assert_full_coverage(&records, "/f", 500);
    }
}
