//! Producer engine: partitioned tree walk, task carving, synchronous dispatch.
//!
//! Each producer enumerates the whole directory structure but carves only
//! the files whose parent directory hashes to its band index. Every task is
//! routed to the queue owner of its dominant OST and delivered with a
//! synchronous send, so a congested owner stalls the walk instead of letting
//! tasks pile up in memory.
//!
//! Small files sharing a pack key (parent directory + dominant OST) are
//! coalesced into batches of up to `max_tasks_per_batch`; batching is purely
//! a message-count optimization and collapses to single sends when the bound
//! is 1.

use crate::config::MigrateConfig;
use crate::error::PipelineError;
use crate::layout::LayoutProvider;
use crate::roles::{OstOwnerMap, RolePlan};
use crate::task::{carve_file, Task, TaskKind};
use crate::transport::Transport;
use crate::walk::{dir_owner, EntryKind, Walker};
use crate::wire::{encode_task, encode_task_batch, Tag};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What one producer did, reported after its walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Regular files this producer owned and carved.
    pub files_seen: u64,
    /// Files dropped on stat/layout/path errors.
    pub files_skipped: u64,
    pub tasks_sent: u64,
    /// Multi-task batch messages shipped.
    pub batches_sent: u64,
    pub bytes_dispatched: u64,
    /// Wall time from walk start to the last finished-notice send.
    pub elapsed: Duration,
}

/// Walks, carves, and dispatches; one per producer rank.
pub struct ProducerEngine<'a, T: Transport> {
    transport: &'a T,
    plan: &'a RolePlan,
    map: &'a OstOwnerMap,
    config: &'a MigrateConfig,
    walker: &'a dyn Walker,
    layouts: &'a dyn LayoutProvider,
    my_index: usize,
    /// Open small-file batches, keyed by pack key.
    pending: HashMap<String, Vec<Task>>,
    report: ProducerReport,
}

impl<'a, T: Transport> ProducerEngine<'a, T> {
    pub fn new(
        transport: &'a T,
        plan: &'a RolePlan,
        map: &'a OstOwnerMap,
        config: &'a MigrateConfig,
        walker: &'a dyn Walker,
        layouts: &'a dyn LayoutProvider,
    ) -> Self {
        let my_index = plan.band_index(plan.my_rank);
        Self {
            transport,
            plan,
            map,
            config,
            walker,
            layouts,
            my_index,
            pending: HashMap::new(),
            report: ProducerReport::default(),
        }
    }

    /// Walks the source tree, dispatches every owned file's tasks, then
    /// notifies every queue owner that this producer is finished.
    pub fn run(mut self) -> Result<ProducerReport, PipelineError> {
        let started = Instant::now();

        if self.config.source_path.is_empty() {
            warn!(rank = self.plan.my_rank, "no source path configured; producer has nothing to walk");
        } else {
            self.walk(PathBuf::from(&self.config.source_path))?;
        }

        self.flush_all()?;
        for owner in self.plan.owner_ranks() {
            self.transport.ssend(owner, Tag::FinProd, Vec::new())?;
        }

        self.report.elapsed = started.elapsed();
        Ok(self.report)
    }

    /// Iterative structural walk. Directory enumeration happens on every
    /// producer; file carving only on the owner of the file's directory.
    fn walk(&mut self, root: PathBuf) -> Result<(), PipelineError> {
        let mut stack = vec![root];
        while let Some(dir) = stack.pop() {
            let mine = dir_owner(&dir, self.plan.num_p) == self.my_index;
            let entries = match self.walker.list_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(dir = %dir.display(), %err, "directory unreadable, subtree skipped");
                    continue;
                }
            };
            for entry in entries {
                match entry.kind {
                    EntryKind::Dir => stack.push(entry.path),
                    EntryKind::File if mine => self.process_file(&entry.path, entry.size)?,
                    EntryKind::File => {}
                    EntryKind::Other => {
                        debug!(path = %entry.path.display(), "not a regular file or directory, skipped");
                    }
                }
            }
        }
        Ok(())
    }

    fn process_file(&mut self, path: &Path, size: u64) -> Result<(), PipelineError> {
        let Some(path_str) = path.to_str() else {
            warn!(path = %path.display(), "path is not valid UTF-8, file skipped");
            self.report.files_skipped += 1;
            return Ok(());
        };

        let layout = match self.layouts.layout_of(path, size) {
            Ok(layout) => layout,
            Err(err) => {
                warn!(path = path_str, %err, "layout unavailable, file skipped");
                self.report.files_skipped += 1;
                return Ok(());
            }
        };
        if let Err(err) = layout.validate(path) {
            warn!(path = path_str, %err, "layout rejected, file skipped");
            self.report.files_skipped += 1;
            return Ok(());
        }

        self.report.files_seen += 1;
        if size == 0 {
            debug!(path = path_str, "zero-byte file produces no copy work");
            return Ok(());
        }

        for task in carve_file(path_str, size, &layout, self.config.stripes_per_task) {
            self.dispatch(task)?;
        }
        Ok(())
    }

    /// Routes one task to its dominant OST's owner.
    fn dispatch(&mut self, task: Task) -> Result<(), PipelineError> {
        if task.dominant_ost >= self.map.num_ost() {
            warn!(
                path = %task.path,
                ost = task.dominant_ost,
                "task targets an OST outside the configured topology, dropped"
            );
            return Ok(());
        }

        if task.kind == TaskKind::SmallBatchable && self.config.max_tasks_per_batch > 1 {
            let key = task.pack_key.clone();
            let batch = self.pending.entry(key.clone()).or_default();
            batch.push(task);
            if batch.len() >= self.config.max_tasks_per_batch as usize {
                if let Some(tasks) = self.pending.remove(&key) {
                    self.ship_batch(tasks)?;
                }
            }
            return Ok(());
        }

        self.ship_one(task)
    }

    fn ship_one(&mut self, task: Task) -> Result<(), PipelineError> {
        let dst = self.map.owner_of(task.dominant_ost);
        let payload = encode_task(&task)?;
        self.transport.ssend(dst, Tag::TaskPut, payload)?;
        self.report.tasks_sent += 1;
        self.report.bytes_dispatched += task.size;
        Ok(())
    }

    fn ship_batch(&mut self, tasks: Vec<Task>) -> Result<(), PipelineError> {
        let mut tasks = tasks;
        if tasks.len() == 1 {
            if let Some(task) = tasks.pop() {
                return self.ship_one(task);
            }
            return Ok(());
        }
        // All tasks in a batch share a pack key, hence a dominant OST.
        let dst = self.map.owner_of(tasks[0].dominant_ost);
        let payload = encode_task_batch(&tasks)?;
        self.transport.ssend(dst, Tag::TaskBatchPut, payload)?;
        self.report.batches_sent += 1;
        self.report.tasks_sent += tasks.len() as u64;
        self.report.bytes_dispatched += tasks.iter().map(|t| t.size).sum::<u64>();
        Ok(())
    }

    /// Ships every open batch; called once the walk is complete.
    fn flush_all(&mut self) -> Result<(), PipelineError> {
        let mut keys: Vec<String> = self.pending.keys().cloned().collect();
        keys.sort_unstable();
        for key in keys {
            if let Some(tasks) = self.pending.remove(&key) {
                self.ship_batch(tasks)?;
            }
        }
        Ok(())
    }
}
