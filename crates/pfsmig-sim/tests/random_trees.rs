//! Randomized whole-pipeline coverage runs.
//!
//! Seeded `SmallRng` trees with nested directories and ragged file sizes,
//! multiple producers and owners: every byte of every file must be executed
//! exactly once, no matter how the walk was partitioned or the tasks
//! interleaved.

use pfsmig::MigrateConfig;
use pfsmig_sim::{assert_full_coverage, run_sim, FixedLayouts, SimTreeBuilder, StartMode};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const KIB: u64 = 1 << 10;

fn random_tree(rng: &mut SmallRng, files: usize) -> (pfsmig_sim::SimTree, Vec<(String, u64)>) {
    let mut builder = SimTreeBuilder::new();
    let mut expected = Vec::new();
    for i in 0..files {
        let dir = match rng.gen_range(0..4) {
            0 => "/src".to_owned(),
            1 => format!("/src/d{}", rng.gen_range(0..3)),
            2 => format!("/src/d{}/sub{}", rng.gen_range(0..3), rng.gen_range(0..2)),
            _ => format!("/src/deep/d{}", rng.gen_range(0..2)),
        };
        let path = format!("{dir}/f{i}");
        // Bias toward awkward sizes around stripe boundaries; keep some
        // zero-byte files, which must simply vanish.
        let size = match rng.gen_range(0..5) {
            0 => 0,
            1 => rng.gen_range(1..4 * KIB),
            2 => 256 * KIB * rng.gen_range(1..5),
            3 => 256 * KIB * rng.gen_range(1..8) + rng.gen_range(1..KIB),
            _ => rng.gen_range(1..2 * 1024 * KIB),
        };
        builder = builder.file(&path, size);
        expected.push((path, size));
    }
    (builder.build(), expected)
}

#[test]
fn random_trees_are_fully_covered() {
    for seed in 0..4u64 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let (tree, expected) = random_tree(&mut rng, 40);

        let config = MigrateConfig {
            num_p: 2,
            num_q: 2,
            num_c: 3,
            num_source_ost: 6,
            source_path: "/src".into(),
            target_path: "/dst".into(),
            stripes_per_task: 2,
            ring_capacity: 8,
            max_tasks_per_batch: 4,
            ..MigrateConfig::default()
        };
        let layouts = FixedLayouts {
            num_ost: 6,
            stripe_size: 256 * KIB,
            stripe_count: 3,
            start: StartMode::Hash,
        };

        let (report, records) = run_sim(7, config, tree, layouts, None).unwrap();

        let expected_bytes: u64 = expected.iter().map(|&(_, size)| size).sum();
        assert_eq!(report.bytes_copied(), expected_bytes, "seed {seed}");
        assert_eq!(report.misrouted(), 0, "seed {seed}");

        for (path, size) in &expected {
            if *size == 0 {
                assert!(
                    records.iter().all(|r| &r.path != path),
                    "zero-byte {path} produced work (seed {seed})"
                );
            } else {
                assert_full_coverage(&records, path, *size);
            }
        }
    }
}
