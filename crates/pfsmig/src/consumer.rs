//! Consumer engine: affinity-first pull loop and copy execution.
//!
//! A consumer pins a primary OST (band index modulo OST count) and keeps
//! pulling from it while tasks flow — stripe-aligned carving makes that the
//! cache- and locality-friendly choice. On a miss it advances round-robin
//! through the other OSTs, a light form of work stealing, with a short sleep
//! so an idle tail of the run does not burn a core.
//!
//! Completion notices are tracked per owner: a `DONE` from an owner masks
//! that owner's OSTs from the scan, and the consumer exits once every owner
//! has reported. While a pull is outstanding to owner X, a `DONE` from X
//! resolves the pull as a miss (the pair-FIFO order rules out a response
//! arriving later); a `DONE` from any other owner is recorded without
//! abandoning the pull, so a task already popped for us is never lost.

use crate::config::MigrateConfig;
use crate::error::{CopyError, PipelineError};
use crate::roles::{OstOwnerMap, Role, RolePlan};
use crate::task::Task;
use crate::transport::Transport;
use crate::wire::{decode_get_resp, encode_get_req, Tag};
use crossbeam_utils::Backoff;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Sleep between unsuccessful scan steps once the backoff is spent.
const MISS_SLEEP: Duration = Duration::from_micros(500);

/// Capability: perform (or simulate) the copy a task describes.
pub trait CopyExecutor {
    fn execute(&mut self, task: &Task) -> Result<(), CopyError>;
}

/// Default executor: sleeps in proportion to the payload size.
///
/// Models a read-then-write transfer at the configured ms-per-MiB costs;
/// useful for scheduling experiments without any storage attached.
#[derive(Debug, Clone)]
pub struct SimulatedCopy {
    ms_per_mib: u64,
}

impl SimulatedCopy {
    pub fn new(ms_per_mib: u64) -> Self {
        Self { ms_per_mib }
    }

    pub fn from_config(config: &MigrateConfig) -> Self {
        Self::new(u64::from(config.time_read) + u64::from(config.time_write))
    }
}

impl CopyExecutor for SimulatedCopy {
    fn execute(&mut self, task: &Task) -> Result<(), CopyError> {
        if self.ms_per_mib == 0 {
            return Ok(());
        }
        const MIB: u64 = 1 << 20;
        let ms = (task.size * self.ms_per_mib).div_ceil(MIB);
        thread::sleep(Duration::from_millis(ms));
        Ok(())
    }
}

/// What one consumer did, reported at exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub tasks_executed: u64,
    pub bytes_copied: u64,
    /// Tasks pulled from a non-primary OST.
    pub steals: u64,
    /// Empty pull responses.
    pub misses: u64,
    /// Tasks whose execution failed (logged and counted, not retried).
    pub copy_errors: u64,
    /// Completion notices received; one per owner by exit.
    pub dones_seen: u32,
}

/// Pulls tasks and runs them through the executor; one per consumer rank.
pub struct ConsumerEngine<'a, T: Transport> {
    transport: &'a T,
    plan: &'a RolePlan,
    map: &'a OstOwnerMap,
    executor: &'a mut dyn CopyExecutor,
    /// Owners that have broadcast completion, indexed by rank.
    owner_done: Vec<bool>,
    report: ConsumerReport,
}

impl<'a, T: Transport> ConsumerEngine<'a, T> {
    pub fn new(
        transport: &'a T,
        plan: &'a RolePlan,
        map: &'a OstOwnerMap,
        executor: &'a mut dyn CopyExecutor,
    ) -> Self {
        let world = plan.world();
        Self {
            transport,
            plan,
            map,
            executor,
            owner_done: vec![false; world],
            report: ConsumerReport::default(),
        }
    }

    /// Pull loop; returns once every owner has reported completion.
    pub fn run(mut self) -> Result<ConsumerReport, PipelineError> {
        let num_ost = self.map.num_ost();
        let primary = (self.plan.band_index(self.plan.my_rank) as u32) % num_ost;
        let mut cur = primary;
        let mut idle = Backoff::new();

        loop {
            while let Some(env) = self.transport.try_recv() {
                self.note_control(env.src, env.tag);
            }
            if self.all_owners_done() {
                break;
            }

            let owner = self.map.owner_of(cur);
            if self.owner_done[owner] {
                // Nothing will ever come from this OST again.
                cur = (cur + 1) % num_ost;
                continue;
            }

            self.transport
                .send(owner, Tag::GetReq, encode_get_req(cur, 1))?;
            match self.await_response(owner)? {
                Some(task) => {
                    if cur != primary {
                        self.report.steals += 1;
                    }
                    self.execute(&task);
                    // Sticky affinity: keep draining the same OST.
                    idle.reset();
                }
                None => {
                    self.report.misses += 1;
                    cur = (cur + 1) % num_ost;
                    if idle.is_completed() {
                        thread::sleep(MISS_SLEEP);
                    } else {
                        idle.snooze();
                    }
                }
            }
        }

        Ok(self.report)
    }

    /// Waits for the response to the single outstanding pull.
    fn await_response(&mut self, owner: usize) -> Result<Option<Task>, PipelineError> {
        loop {
            let env = self.transport.recv()?;
            match env.tag {
                Tag::GetResp if env.src == owner => {
                    return Ok(decode_get_resp(&env.payload)?);
                }
                Tag::Done => {
                    self.note_control(env.src, Tag::Done);
                    if env.src == owner {
                        // The owner exited after broadcasting; its mailbox
                        // order guarantees our pull was never served.
                        return Ok(None);
                    }
                }
                tag => debug!(src = env.src, ?tag, "unexpected message at a consumer, drained"),
            }
        }
    }

    fn note_control(&mut self, src: usize, tag: Tag) {
        if tag != Tag::Done {
            debug!(src, ?tag, "unexpected message at a consumer, drained");
            return;
        }
        if self.plan.role_of(src) != Role::QueueOwner {
            warn!(src, "DONE from a non-owner rank, ignored");
            return;
        }
        if !self.owner_done[src] {
            self.owner_done[src] = true;
            self.report.dones_seen += 1;
        }
    }

    fn all_owners_done(&self) -> bool {
        self.report.dones_seen as usize == self.plan.num_q
    }

    fn execute(&mut self, task: &Task) {
        match self.executor.execute(task) {
            Ok(()) => {
                self.report.tasks_executed += 1;
                self.report.bytes_copied += task.size;
            }
            Err(err) => {
                warn!(%err, "copy failed");
                self.report.copy_errors += 1;
            }
        }
    }
}
