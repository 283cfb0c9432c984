//! Queue owner engine: per-OST ring queues behind a message loop.
//!
//! An owner buffers tasks for the storage targets the OST map assigns to it
//! and serves consumer pull requests. It is a single-threaded, message-driven
//! server: poll, dispatch by tag, brief sleep when idle.
//!
//! Backpressure: a task envelope is held (keeping the producer's synchronous
//! send pending) until the task lands in its ring. While a ring is full the
//! owner keeps serving pull requests — a pull is the only thing that can
//! free a slot — and defers any further task envelopes, whose producers
//! simply remain blocked.
//!
//! Termination: once every producer has sent its finished notice and every
//! local ring is empty, no task can ever arrive again; the owner tells every
//! consumer it is done, answers any straggling pulls with empty responses,
//! and exits.

use crate::config::MigrateConfig;
use crate::error::PipelineError;
use crate::invariants::debug_assert_fin_bound;
use crate::ring::{PushError, RingQueue};
use crate::roles::{OstOwnerMap, RolePlan};
use crate::task::Task;
use crate::transport::{Envelope, Transport};
use crate::wire::{decode_get_req, decode_task, decode_task_batch, encode_get_resp, Tag};
use crossbeam_utils::Backoff;
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Idle poll sleep once the adaptive backoff is spent.
const IDLE_SLEEP: Duration = Duration::from_millis(1);
/// Retry sleep while a destination ring is full.
const PUSH_RETRY_SLEEP: Duration = Duration::from_millis(1);

/// What one owner did, reported at exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerReport {
    pub osts_owned: u32,
    /// Tasks accepted into local rings (single puts and batch members).
    pub tasks_enqueued: u64,
    /// Tasks handed to consumers.
    pub tasks_served: u64,
    /// Pull misses answered with an empty response.
    pub empty_responses: u64,
    /// Puts or pulls that targeted an OST this owner does not manage.
    pub misrouted: u64,
    /// Producer finished-notices received.
    pub fins_seen: u32,
}

/// Owns the ring queues for a set of OSTs; one per queue-owner rank.
pub struct QueueOwnerEngine<'a, T: Transport> {
    transport: &'a T,
    plan: &'a RolePlan,
    /// `(ost_id, ring)` in ascending OST order; at most a few hundred
    /// entries, so lookup is a linear scan.
    queues: Vec<(u32, RingQueue<Task>)>,
    /// Task envelopes taken off the mailbox while a ring was full. Their
    /// producers stay blocked until the tasks land.
    deferred: VecDeque<Envelope>,
    fins_seen: u32,
    report: OwnerReport,
}

impl<'a, T: Transport> QueueOwnerEngine<'a, T> {
    pub fn new(
        transport: &'a T,
        plan: &'a RolePlan,
        map: &'a OstOwnerMap,
        config: &'a MigrateConfig,
    ) -> Self {
        let queues: Vec<(u32, RingQueue<Task>)> = map
            .osts_owned_by(plan.my_rank)
            .map(|ost| (ost, RingQueue::with_capacity(config.ring_capacity as usize)))
            .collect();
        let report = OwnerReport {
            osts_owned: queues.len() as u32,
            ..OwnerReport::default()
        };
        Self {
            transport,
            plan,
            queues,
            deferred: VecDeque::new(),
            fins_seen: 0,
            report,
        }
    }

    /// Serves until the pipeline drains, then broadcasts completion.
    pub fn run(mut self) -> Result<OwnerReport, PipelineError> {
        let mut idle = Backoff::new();
        loop {
            let next = match self.deferred.pop_front() {
                Some(env) => Some(env),
                None => self.transport.try_recv(),
            };
            match next {
                Some(env) => {
                    self.handle(env)?;
                    idle.reset();
                }
                None => {
                    if self.drained() {
                        break;
                    }
                    if idle.is_completed() {
                        thread::sleep(IDLE_SLEEP);
                    } else {
                        idle.snooze();
                    }
                }
            }
        }

        for consumer in self.plan.consumer_ranks() {
            self.transport.send(consumer, Tag::Done, Vec::new())?;
        }
        self.final_drain()?;

        self.report.fins_seen = self.fins_seen;
        Ok(self.report)
    }

    /// All producers finished and nothing is buffered: no task can arrive
    /// ever again.
    fn drained(&self) -> bool {
        self.fins_seen as usize == self.plan.num_p
            && self.deferred.is_empty()
            && self.queues.iter().all(|(_, q)| q.is_empty())
    }

    fn handle(&mut self, env: Envelope) -> Result<(), PipelineError> {
        match env.tag {
            Tag::TaskPut => {
                let task = decode_task(&env.payload)?;
                self.accept(task)?;
                // `env` drops here, releasing the producer: the task is in
                // a ring now (or was dropped as misrouted).
            }
            Tag::TaskBatchPut => {
                let tasks = decode_task_batch(&env.payload)?;
                for task in tasks {
                    self.accept(task)?;
                }
            }
            Tag::GetReq => self.serve_get(&env)?,
            Tag::FinProd => {
                self.fins_seen += 1;
                debug_assert_fin_bound!(self.fins_seen as usize, self.plan.num_p);
            }
            Tag::Done => debug!(src = env.src, "unexpected DONE at a queue owner, drained"),
            tag => warn!(src = env.src, ?tag, "unexpected message at a queue owner, drained"),
        }
        Ok(())
    }

    fn queue_index(&self, ost: u32) -> Option<usize> {
        self.queues.iter().position(|&(id, _)| id == ost)
    }

    /// Buffers one task, blocking until its ring has room.
    fn accept(&mut self, task: Task) -> Result<(), PipelineError> {
        let Some(index) = self.queue_index(task.dominant_ost) else {
            warn!(
                path = %task.path,
                ost = task.dominant_ost,
                "task routed to the wrong owner, dropped"
            );
            self.report.misrouted += 1;
            return Ok(());
        };

        let mut task = task;
        let mut backoff = Backoff::new();
        loop {
            match self.queues[index].1.push(task) {
                Ok(()) => {
                    self.report.tasks_enqueued += 1;
                    return Ok(());
                }
                Err(PushError(rejected)) => task = rejected,
            }

            // The ring is full; only a consumer pull can free a slot, so
            // keep serving pulls. Further task envelopes are deferred with
            // their producers still blocked on them.
            while let Some(env) = self.transport.try_recv() {
                match env.tag {
                    Tag::GetReq => self.serve_get(&env)?,
                    Tag::FinProd => {
                        self.fins_seen += 1;
                        debug_assert_fin_bound!(self.fins_seen as usize, self.plan.num_p);
                    }
                    Tag::TaskPut | Tag::TaskBatchPut => self.deferred.push_back(env),
                    Tag::Done => debug!(src = env.src, "unexpected DONE, drained"),
                    tag => warn!(src = env.src, ?tag, "unexpected message, drained"),
                }
            }

            if backoff.is_completed() {
                thread::sleep(PUSH_RETRY_SLEEP);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Answers one pull: a task when the requested OST is owned here and
    /// non-empty, an empty response otherwise.
    fn serve_get(&mut self, env: &Envelope) -> Result<(), PipelineError> {
        let (ost, _want) = decode_get_req(&env.payload)?;
        let task = match self.queue_index(ost) {
            Some(index) => self.queues[index].1.pop(),
            None => {
                warn!(src = env.src, ost, "pull for an OST this owner does not manage");
                self.report.misrouted += 1;
                None
            }
        };
        match &task {
            Some(_) => self.report.tasks_served += 1,
            None => self.report.empty_responses += 1,
        }
        let payload = encode_get_resp(task.as_ref())?;
        self.transport.send(env.src, Tag::GetResp, payload)?;
        Ok(())
    }

    /// Empties the mailbox after the completion broadcast so no straggling
    /// pull is left waiting on a response that would never come.
    fn final_drain(&mut self) -> Result<(), PipelineError> {
        while let Some(env) = self.transport.try_recv() {
            match env.tag {
                Tag::GetReq => self.serve_get(&env)?,
                tag => debug!(src = env.src, ?tag, "drained at owner exit"),
            }
        }
        Ok(())
    }
}
