//! End-to-end pipeline scenarios over the simulated boundaries.
//!
//! Each test runs a complete world (producers, queue owners, consumers) in
//! process and asserts on the recorded copy executions and the per-rank
//! reports.

use pfsmig::MigrateConfig;
use pfsmig_sim::{
    assert_full_coverage, run_sim, FixedLayouts, SimTreeBuilder, StartMode,
};
use std::collections::BTreeMap;
use std::time::Duration;

const MIB: u64 = 1 << 20;

fn config(p: u32, q: u32, c: u32, num_source_ost: u32) -> MigrateConfig {
    MigrateConfig {
        num_p: p,
        num_q: q,
        num_c: c,
        num_source_ost,
        source_path: "/src".into(),
        target_path: "/dst".into(),
        ..MigrateConfig::default()
    }
}

fn layouts(num_ost: u32, stripe_size: u64, stripe_count: u32, start: StartMode) -> FixedLayouts {
    FixedLayouts {
        num_ost,
        stripe_size,
        stripe_count,
        start,
    }
}

#[test]
fn trivial_single_small_file() {
    let cfg = config(1, 1, 1, 4);
    let tree = SimTreeBuilder::new().file("/src/one.dat", 1024).build();
    let (report, records) = run_sim(
        3,
        cfg,
        tree,
        layouts(4, 4 * MIB, 4, StartMode::Fixed(0)),
        None,
    )
    .unwrap();

    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.path, "/src/one.dat");
    assert_eq!((r.offset, r.size), (0, 1024));
    assert_eq!(r.dominant_ost, 0);

    assert_eq!(report.tasks_sent(), 1);
    assert_eq!(report.tasks_executed(), 1);
    assert_eq!(report.misrouted(), 0);
    assert_eq!(report.consumers[0].dones_seen, 1);
}

#[test]
fn stripe_aligned_large_file() {
    // 8 stripes over 4 columns of 2: one full group, one task per column.
    let mut cfg = config(1, 1, 2, 4);
    cfg.stripes_per_task = 2;
    let tree = SimTreeBuilder::new().file("/src/big.bin", 8 * MIB).build();
    let (report, records) = run_sim(
        4,
        cfg,
        tree,
        layouts(4, MIB, 4, StartMode::Fixed(0)),
        None,
    )
    .unwrap();

    assert_eq!(records.len(), 4);
    let mut doms: Vec<u32> = records.iter().map(|r| r.dominant_ost).collect();
    doms.sort_unstable();
    assert_eq!(doms, vec![0, 1, 2, 3], "columns must cover every OST once");

    let total: u64 = records.iter().map(|r| r.size).sum();
    assert_eq!(total, 8 * MIB);
    assert_full_coverage(&records, "/src/big.bin", 8 * MIB);
    assert_eq!(report.tasks_executed(), 4);
}

#[test]
fn tail_truncated_large_file() {
    // 5 stripes: column 0 holds stripes {0, 4}, columns 1..4 one stripe
    // each, nothing past EOF.
    let mut cfg = config(1, 1, 2, 4);
    cfg.stripes_per_task = 2;
    let tree = SimTreeBuilder::new().file("/src/tail.bin", 5 * MIB).build();
    let (_report, records) = run_sim(
        4,
        cfg,
        tree,
        layouts(4, MIB, 4, StartMode::Fixed(0)),
        None,
    )
    .unwrap();

    let mut sizes: Vec<u64> = records.iter().map(|r| r.size).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![MIB, MIB, MIB, 2 * MIB]);

    for r in &records {
        if r.size == 2 * MIB {
            // The full column is strided: two separate stripe reads.
            assert_eq!(r.ranges.len(), 2);
        } else {
            // Tail-clipped columns collapse to one contiguous run.
            assert_eq!(r.ranges.len(), 1);
        }
    }
    assert_full_coverage(&records, "/src/tail.bin", 5 * MIB);
}

#[test]
fn backpressure_limits_producer_rate() {
    // One-slot ring and a 10 ms consumer: the k-th synchronous send cannot
    // complete before the (k-1)-th task left the ring, so ten tasks hold
    // the producer for at least eight drain periods.
    let mut cfg = config(1, 1, 1, 1);
    cfg.ring_capacity = 1;
    cfg.max_tasks_per_batch = 1;
    let mut tree = SimTreeBuilder::new();
    for i in 0..10 {
        tree = tree.file(&format!("/src/f{i}.dat"), 1024);
    }
    let (report, records) = run_sim(
        3,
        cfg,
        tree.build(),
        layouts(1, 4 * MIB, 1, StartMode::Fixed(0)),
        Some(Duration::from_millis(10)),
    )
    .unwrap();

    assert_eq!(records.len(), 10);
    let producer = &report.producers[0];
    assert_eq!(producer.tasks_sent, 10);
    assert!(
        producer.elapsed >= Duration::from_millis(80),
        "producer outran the consumer drain rate: {:?}",
        producer.elapsed
    );
}

#[test]
fn multi_owner_routing_is_balanced_and_exact() {
    // 100 small files spread exactly uniformly over 4 OSTs; two owners
    // split the OSTs round-robin, so each buffers exactly 50 tasks.
    let cfg = config(1, 2, 2, 4);
    let mut tree = SimTreeBuilder::new();
    for i in 0..100 {
        tree = tree.file(&format!("/src/f{i}"), 512);
    }
    let (report, records) = run_sim(
        5,
        cfg,
        tree.build(),
        layouts(4, 4 * MIB, 1, StartMode::FileIndex),
        None,
    )
    .unwrap();

    assert_eq!(records.len(), 100);
    assert_eq!(report.misrouted(), 0, "a task reached the wrong owner");
    assert_eq!(report.owners.len(), 2);
    for owner in &report.owners {
        assert_eq!(owner.tasks_enqueued, 50);
        assert_eq!(owner.tasks_served, 50);
    }

    let mut per_ost: BTreeMap<u32, u64> = BTreeMap::new();
    for r in &records {
        *per_ost.entry(r.dominant_ost).or_default() += 1;
    }
    assert_eq!(per_ost.len(), 4);
    assert!(per_ost.values().all(|&n| n == 25), "skewed: {per_ost:?}");
}

#[test]
fn termination_reaches_every_consumer() {
    let cfg = config(1, 2, 3, 4);
    let mut tree = SimTreeBuilder::new();
    for i in 0..20 {
        tree = tree.file(&format!("/src/f{i}"), 2048);
    }
    let (report, records) = run_sim(
        6,
        cfg,
        tree.build(),
        layouts(4, 4 * MIB, 1, StartMode::FileIndex),
        None,
    )
    .unwrap();

    // Nothing is stranded on a slower owner: every dispatched task ran
    // before the consumers went home.
    assert_eq!(records.len(), 20);
    assert_eq!(report.tasks_executed(), report.tasks_sent());
    assert_eq!(report.consumers.len(), 3);
    for consumer in &report.consumers {
        assert_eq!(
            consumer.dones_seen, 2,
            "a consumer exited without hearing from every owner"
        );
    }
    let enqueued: u64 = report.owners.iter().map(|o| o.tasks_enqueued).sum();
    let served: u64 = report.owners.iter().map(|o| o.tasks_served).sum();
    assert_eq!(enqueued, 20);
    assert_eq!(served, 20);
}

#[test]
fn batched_small_files_collapse_to_single_task_semantics() {
    // Same tree, batching on and off: identical execution records.
    let run = |max_tasks_per_batch: u32| {
        let mut cfg = config(1, 1, 2, 2);
        cfg.max_tasks_per_batch = max_tasks_per_batch;
        let mut tree = SimTreeBuilder::new();
        for i in 0..37 {
            tree = tree.file(&format!("/src/pack/f{i}"), 256);
        }
        let (report, mut records) = run_sim(
            4,
            cfg,
            tree.build(),
            layouts(2, 4 * MIB, 1, StartMode::FileIndex),
            None,
        )
        .unwrap();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        (report, records)
    };

    let (batched_report, batched) = run(8);
    let (single_report, single) = run(1);
    assert_eq!(batched, single);
    assert_eq!(batched_report.tasks_sent(), 37);
    assert_eq!(single_report.tasks_sent(), 37);
    // 37 files over 2 pack keys with batches of 8 means at least one
    // multi-task message actually traveled.
    let batch_messages: u64 = batched_report.producers.iter().map(|p| p.batches_sent).sum();
    assert!(batch_messages > 0, "batching path never exercised");
    assert_eq!(
        single_report.producers.iter().map(|p| p.batches_sent).sum::<u64>(),
        0
    );
}
