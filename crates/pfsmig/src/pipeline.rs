//! World driver: config broadcast, role dispatch, report aggregation.
//!
//! [`run_world`] stands in for the process launcher: it spins up one thread
//! per rank over a [`LocalWorld`], has rank 0 broadcast the validated
//! configuration, plans roles on every rank, runs the startup barrier, each
//! rank's role engine, and the shutdown barrier, then joins everything into
//! a [`WorldReport`].
//!
//! Fatal problems (bad topology, world too small) surface before any rank
//! thread starts.

use crate::config::{ConfigSource, MigrateConfig};
use crate::consumer::{ConsumerEngine, ConsumerReport, CopyExecutor, SimulatedCopy};
use crate::error::PipelineError;
use crate::layout::{LayoutProvider, SyntheticLayoutProvider};
use crate::owner::{OwnerReport, QueueOwnerEngine};
use crate::producer::{ProducerEngine, ProducerReport};
use crate::roles::{OstOwnerMap, Role, RolePlan};
use crate::transport::{LocalEndpoint, LocalWorld, Transport};
use crate::walk::{FsWalker, Walker};
use crate::wire::Tag;
use std::thread;
use tracing::{info, warn};

/// Default synthetic stripe geometry for runs without a real layout probe.
const DEFAULT_STRIPE_SIZE: u64 = 4 << 20;
const DEFAULT_STRIPE_COUNT: u32 = 4;

/// Capabilities handed to one rank. Producers use the walker and layout
/// provider, consumers the executor; owners need none of them.
pub struct RankCaps {
    pub walker: Box<dyn Walker + Send>,
    pub layouts: Box<dyn LayoutProvider + Send>,
    pub executor: Box<dyn CopyExecutor + Send>,
}

impl RankCaps {
    /// Real-filesystem walk, synthetic layouts, simulated copy: the default
    /// wiring of the shipped binary.
    pub fn local_fs(config: &MigrateConfig) -> Self {
        Self {
            walker: Box::new(FsWalker),
            layouts: Box::new(SyntheticLayoutProvider::new(
                config.num_source_ost,
                DEFAULT_STRIPE_SIZE,
                DEFAULT_STRIPE_COUNT,
            )),
            executor: Box::new(SimulatedCopy::from_config(config)),
        }
    }
}

/// Per-rank outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankReport {
    Producer(ProducerReport),
    Owner(OwnerReport),
    Consumer(ConsumerReport),
}

/// Aggregated outcome of a whole run.
#[derive(Debug, Clone)]
pub struct WorldReport {
    pub plan: RolePlan,
    pub producers: Vec<ProducerReport>,
    pub owners: Vec<OwnerReport>,
    pub consumers: Vec<ConsumerReport>,
}

impl WorldReport {
    pub fn tasks_sent(&self) -> u64 {
        self.producers.iter().map(|p| p.tasks_sent).sum()
    }

    pub fn tasks_executed(&self) -> u64 {
        self.consumers.iter().map(|c| c.tasks_executed).sum()
    }

    pub fn bytes_copied(&self) -> u64 {
        self.consumers.iter().map(|c| c.bytes_copied).sum()
    }

    /// Wrong-owner puts and pulls across all owners; zero in a healthy run.
    pub fn misrouted(&self) -> u64 {
        self.owners.iter().map(|o| o.misrouted).sum()
    }
}

/// Runs a full migration world of `world` ranks in-process.
pub fn run_world<F>(
    world: usize,
    source: ConfigSource,
    caps: F,
) -> Result<WorldReport, PipelineError>
where
    F: Fn(usize, Role, &MigrateConfig) -> RankCaps + Send + Sync,
{
    // Coordinator work: load, validate, and make sure a plan exists, all
    // before any thread starts.
    let config = source.resolve();
    config.validate()?;
    let plan = RolePlan::plan(&config, 0, world)?;

    let endpoints = LocalWorld::endpoints(world);
    let caps = &caps;
    let coordinator_config = &config;

    let mut results: Vec<Option<Result<RankReport, PipelineError>>> =
        (0..world).map(|_| None).collect();

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(world);
        for (rank, endpoint) in endpoints.into_iter().enumerate() {
            let handle = thread::Builder::new()
                .name(format!("pfsmig-rank{rank}"))
                .spawn_scoped(scope, move || {
                    rank_main(rank, world, &endpoint, coordinator_config, caps)
                })
                .map_err(|_| PipelineError::RankPanicked(rank));
            handles.push(handle);
        }
        for (rank, handle) in handles.into_iter().enumerate() {
            let outcome = match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or(Err(PipelineError::RankPanicked(rank))),
                Err(err) => Err(err),
            };
            results[rank] = Some(outcome);
        }
    });

    let mut report = WorldReport {
        plan,
        producers: Vec::new(),
        owners: Vec::new(),
        consumers: Vec::new(),
    };
    for outcome in results.into_iter().flatten() {
        match outcome? {
            RankReport::Producer(p) => report.producers.push(p),
            RankReport::Owner(o) => report.owners.push(o),
            RankReport::Consumer(c) => report.consumers.push(c),
        }
    }
    Ok(report)
}

/// One rank's whole life: config, plan, barriers, role engine.
fn rank_main<F>(
    rank: usize,
    world: usize,
    endpoint: &LocalEndpoint,
    coordinator_config: &MigrateConfig,
    caps: &F,
) -> Result<RankReport, PipelineError>
where
    F: Fn(usize, Role, &MigrateConfig) -> RankCaps + Send + Sync,
{
    let setup = setup_rank(rank, world, endpoint, coordinator_config);

    // Both barriers run regardless of setup success so a failing rank never
    // wedges its peers.
    endpoint.barrier();
    let outcome = match setup {
        Ok((config, plan, map)) => run_role(endpoint, &config, &plan, &map, caps),
        Err(err) => Err(err),
    };
    endpoint.barrier();
    outcome
}

type RankSetup = (MigrateConfig, RolePlan, OstOwnerMap);

fn setup_rank(
    rank: usize,
    world: usize,
    endpoint: &LocalEndpoint,
    coordinator_config: &MigrateConfig,
) -> Result<RankSetup, PipelineError> {
    let config = if rank == 0 {
        let payload = coordinator_config.encode();
        for peer in 1..world {
            endpoint.send(peer, Tag::CfgBcast, payload.clone())?;
        }
        coordinator_config.clone()
    } else {
        loop {
            let env = endpoint.recv()?;
            if env.tag == Tag::CfgBcast {
                break MigrateConfig::decode(&env.payload)?;
            }
            warn!(rank, src = env.src, tag = ?env.tag, "message before configuration, drained");
        }
    };

    let plan = RolePlan::plan(&config, rank, world)?;
    let map = OstOwnerMap::new(config.num_source_ost, &plan);

    if rank == 0 {
        info!(
            world,
            num_p = plan.num_p,
            num_q = plan.num_q,
            num_c = plan.num_c,
            base_p = plan.base_p,
            base_q = plan.base_q,
            base_c = plan.base_c,
            num_source_ost = config.num_source_ost,
            "role plan"
        );
    }
    Ok((config, plan, map))
}

fn run_role<F>(
    endpoint: &LocalEndpoint,
    config: &MigrateConfig,
    plan: &RolePlan,
    map: &OstOwnerMap,
    caps: &F,
) -> Result<RankReport, PipelineError>
where
    F: Fn(usize, Role, &MigrateConfig) -> RankCaps + Send + Sync,
{
    match plan.my_role {
        Role::Producer => {
            let rank_caps = caps(plan.my_rank, Role::Producer, config);
            let engine = ProducerEngine::new(
                endpoint,
                plan,
                map,
                config,
                rank_caps.walker.as_ref(),
                rank_caps.layouts.as_ref(),
            );
            engine.run().map(RankReport::Producer)
        }
        Role::QueueOwner => {
            let engine = QueueOwnerEngine::new(endpoint, plan, map, config);
            engine.run().map(RankReport::Owner)
        }
        Role::Consumer => {
            let mut rank_caps = caps(plan.my_rank, Role::Consumer, config);
            let engine = ConsumerEngine::new(endpoint, plan, map, rank_caps.executor.as_mut());
            engine.run().map(RankReport::Consumer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrateConfig;
    use crate::error::ConfigError;

    #[test]
    fn test_invalid_topology_fails_before_spawn() {
        let mut config = MigrateConfig::default();
        config.num_source_ost = 0;
        let err = run_world(3, ConfigSource::Value(config), |_, _, cfg| {
            RankCaps::local_fs(cfg)
        })
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::InvalidOstCount { .. })
        ));
    }

    #[test]
    fn test_world_too_small_rejected() {
        let config = MigrateConfig::default();
        let err = run_world(2, ConfigSource::Value(config), |_, _, cfg| {
            RankCaps::local_fs(cfg)
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::Plan(_)));
    }

    #[test]
    fn test_empty_source_world_drains_cleanly() {
        // No source path: producers emit nothing, owners broadcast DONE
        // immediately, consumers exit. The run must still terminate.
        let config = MigrateConfig::default();
        let report = run_world(4, ConfigSource::Value(config), |_, _, cfg| {
            RankCaps::local_fs(cfg)
        })
        .unwrap();
        assert_eq!(report.tasks_sent(), 0);
        assert_eq!(report.tasks_executed(), 0);
        assert_eq!(report.misrouted(), 0);
        for consumer in &report.consumers {
            assert_eq!(consumer.dones_seen as usize, report.plan.num_q);
        }
    }
}
