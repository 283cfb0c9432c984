//! Role planning and OST-to-owner routing.
//!
//! The world `[0, W)` is split into three contiguous bands — producers,
//! queue owners, consumers — in that order. The split is either supplied by
//! the configuration (all three counts, summing to `W`) or derived from the
//! default policy. Every rank computes the identical plan, so no plan ever
//! crosses the wire.

use crate::config::MigrateConfig;
use crate::error::PlanError;

/// The three role bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    QueueOwner,
    Consumer,
}

/// Band sizes, band bases, and this rank's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePlan {
    pub num_p: usize,
    pub num_q: usize,
    pub num_c: usize,
    pub base_p: usize,
    pub base_q: usize,
    pub base_c: usize,
    pub my_rank: usize,
    pub my_role: Role,
}

impl RolePlan {
    /// Plans roles for `rank` in a world of `world` ranks.
    ///
    /// Config-supplied counts are taken verbatim when all three are at least
    /// one and sum to the world size; otherwise the default split applies:
    /// owners get `min(num_source_ost, max(1, W/8))` ranks (clamped so
    /// producers and consumers each keep at least one), producers a quarter
    /// of the rest, consumers everything left over.
    pub fn plan(config: &MigrateConfig, rank: usize, world: usize) -> Result<Self, PlanError> {
        if world < 3 {
            return Err(PlanError::WorldTooSmall(world));
        }

        let (num_p, num_q, num_c) = match config.explicit_roles() {
            Some((p, q, c)) if (p + q + c) as usize == world => {
                (p as usize, q as usize, c as usize)
            }
            _ => Self::default_split(world, config.num_source_ost as usize),
        };
        debug_assert_eq!(num_p + num_q + num_c, world);

        let base_p = 0;
        let base_q = num_p;
        let base_c = num_p + num_q;
        let my_role = if rank < base_q {
            Role::Producer
        } else if rank < base_c {
            Role::QueueOwner
        } else {
            Role::Consumer
        };

        Ok(Self {
            num_p,
            num_q,
            num_c,
            base_p,
            base_q,
            base_c,
            my_rank: rank,
            my_role,
        })
    }

    fn default_split(world: usize, num_source_ost: usize) -> (usize, usize, usize) {
        let num_q = num_source_ost
            .min((world / 8).max(1))
            .clamp(1, world - 2);
        let mut num_p = ((world - num_q) / 4).max(1);
        let mut num_c = world - num_p - num_q;
        if num_c < 1 {
            num_c = 1;
            if num_p > 1 {
                num_p -= 1;
            }
        }
        (num_p, num_q, num_c)
    }

    /// Role of an arbitrary rank under this plan.
    pub fn role_of(&self, rank: usize) -> Role {
        if rank < self.base_q {
            Role::Producer
        } else if rank < self.base_c {
            Role::QueueOwner
        } else {
            Role::Consumer
        }
    }

    /// Index of `rank` within its band.
    pub fn band_index(&self, rank: usize) -> usize {
        match self.role_of(rank) {
            Role::Producer => rank - self.base_p,
            Role::QueueOwner => rank - self.base_q,
            Role::Consumer => rank - self.base_c,
        }
    }

    /// World size.
    pub fn world(&self) -> usize {
        self.num_p + self.num_q + self.num_c
    }

    pub fn producer_ranks(&self) -> std::ops::Range<usize> {
        self.base_p..self.base_p + self.num_p
    }

    pub fn owner_ranks(&self) -> std::ops::Range<usize> {
        self.base_q..self.base_q + self.num_q
    }

    pub fn consumer_ranks(&self) -> std::ops::Range<usize> {
        self.base_c..self.base_c + self.num_c
    }
}

/// Deterministic round-robin map from storage target to owning rank.
///
/// Known to every rank: producers route task puts with it, consumers route
/// pull requests, owners derive their queue set from it. Load differs by at
/// most one OST across owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OstOwnerMap {
    owners: Vec<usize>,
}

impl OstOwnerMap {
    pub fn new(num_source_ost: u32, plan: &RolePlan) -> Self {
        let owners = (0..num_source_ost as usize)
            .map(|ost| plan.base_q + ost % plan.num_q)
            .collect();
        Self { owners }
    }

    /// Owning rank of `ost`.
    #[inline]
    pub fn owner_of(&self, ost: u32) -> usize {
        self.owners[ost as usize]
    }

    /// Storage targets owned by `rank`, in ascending order.
    pub fn osts_owned_by(&self, rank: usize) -> impl Iterator<Item = u32> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |&(_, &owner)| owner == rank)
            .map(|(ost, _)| ost as u32)
    }

    pub fn num_ost(&self) -> u32 {
        self.owners.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_source_ost: u32) -> MigrateConfig {
        MigrateConfig {
            num_source_ost,
            ..MigrateConfig::default()
        }
    }

    #[test]
    fn test_minimum_world() {
        let plan = RolePlan::plan(&config(4), 0, 3).unwrap();
        assert_eq!((plan.num_p, plan.num_q, plan.num_c), (1, 1, 1));
        assert_eq!(plan.my_role, Role::Producer);
        assert_eq!(RolePlan::plan(&config(4), 1, 3).unwrap().my_role, Role::QueueOwner);
        assert_eq!(RolePlan::plan(&config(4), 2, 3).unwrap().my_role, Role::Consumer);
    }

    #[test]
    fn test_world_too_small() {
        assert!(matches!(
            RolePlan::plan(&config(1), 0, 2),
            Err(PlanError::WorldTooSmall(2))
        ));
    }

    #[test]
    fn test_explicit_roles_taken_verbatim() {
        let mut cfg = config(8);
        cfg.num_p = 2;
        cfg.num_q = 3;
        cfg.num_c = 7;
        let plan = RolePlan::plan(&cfg, 4, 12).unwrap();
        assert_eq!((plan.num_p, plan.num_q, plan.num_c), (2, 3, 7));
        assert_eq!(plan.my_role, Role::QueueOwner);
        assert_eq!(plan.band_index(4), 2);
    }

    #[test]
    fn test_explicit_roles_ignored_when_sum_mismatches() {
        let mut cfg = config(8);
        cfg.num_p = 2;
        cfg.num_q = 3;
        cfg.num_c = 7;
        // 2 + 3 + 7 != 16: fall back to the default split.
        let plan = RolePlan::plan(&cfg, 0, 16).unwrap();
        assert_eq!(plan.world(), 16);
        assert_eq!(plan.num_q, 2); // min(8, 16/8) = 2
    }

    #[test]
    fn test_bands_are_contiguous_and_ordered() {
        let plan = RolePlan::plan(&config(6), 0, 24).unwrap();
        assert_eq!(plan.base_p, 0);
        assert_eq!(plan.base_q, plan.num_p);
        assert_eq!(plan.base_c, plan.num_p + plan.num_q);
        assert_eq!(plan.world(), 24);
        for rank in plan.producer_ranks() {
            assert_eq!(plan.role_of(rank), Role::Producer);
        }
        for rank in plan.owner_ranks() {
            assert_eq!(plan.role_of(rank), Role::QueueOwner);
        }
        for rank in plan.consumer_ranks() {
            assert_eq!(plan.role_of(rank), Role::Consumer);
        }
    }

    #[test]
    fn test_map_round_robin_and_balance() {
        let plan = RolePlan::plan(&config(10), 0, 12).unwrap();
        let map = OstOwnerMap::new(10, &plan);
        for ost in 0..10 {
            let owner = map.owner_of(ost);
            assert!(plan.owner_ranks().contains(&owner));
            assert_eq!(owner, plan.base_q + ost as usize % plan.num_q);
        }
        // Every owner's share differs by at most one.
        let counts: Vec<usize> = plan
            .owner_ranks()
            .map(|rank| map.osts_owned_by(rank).count())
            .collect();
        let (min, max) = (counts.iter().min().unwrap(), counts.iter().max().unwrap());
        assert!(max - min <= 1, "unbalanced: {counts:?}");
        assert_eq!(counts.iter().sum::<usize>(), 10);
    }
}
