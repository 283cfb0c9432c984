//! Simulated migration demo.
//!
//! Builds a small virtual tree, runs a 6-rank world (1 producer, 2 queue
//! owners, 3 consumers) against simulated boundaries, and prints what moved
//! where.
//!
//! Run with: `cargo run -p pfsmig-sim --bin demo`

use pfsmig::MigrateConfig;
use pfsmig_sim::{run_sim, FixedLayouts, SimTreeBuilder, StartMode};
use std::collections::BTreeMap;
use std::time::Duration;

const MIB: u64 = 1 << 20;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::INFO)
        .init();

    let config = MigrateConfig {
        num_p: 1,
        num_q: 2,
        num_c: 3,
        num_source_ost: 4,
        source_path: "/src".into(),
        target_path: "/dst".into(),
        stripes_per_task: 2,
        ..MigrateConfig::default()
    };

    let mut tree = SimTreeBuilder::new()
        .file("/src/model/weights.bin", 24 * MIB)
        .file("/src/model/optimizer.bin", 9 * MIB + 512 * 1024)
        .file("/src/logs/run.log", 80 * 1024);
    for i in 0..64 {
        tree = tree.file(&format!("/src/shards/part{i:03}"), 4096);
    }

    let layouts = FixedLayouts {
        num_ost: 4,
        stripe_size: 2 * MIB,
        stripe_count: 4,
        start: StartMode::Hash,
    };

    println!("=== pfsmig simulated migration ===\n");
    let (report, records) = run_sim(
        6,
        config,
        tree.build(),
        layouts,
        Some(Duration::from_micros(200)),
    )?;

    println!(
        "world: {} producers / {} owners / {} consumers",
        report.plan.num_p, report.plan.num_q, report.plan.num_c
    );
    println!(
        "dispatched {} tasks, executed {}, {} bytes\n",
        report.tasks_sent(),
        report.tasks_executed(),
        report.bytes_copied()
    );

    let mut per_ost: BTreeMap<u32, (u64, u64)> = BTreeMap::new();
    for r in &records {
        let slot = per_ost.entry(r.dominant_ost).or_default();
        slot.0 += 1;
        slot.1 += r.size;
    }
    println!("per-OST traffic:");
    for (ost, (tasks, bytes)) in &per_ost {
        println!("  ost {ost}: {tasks} tasks, {bytes} bytes");
    }

    println!("\nconsumers:");
    for (i, c) in report.consumers.iter().enumerate() {
        println!(
            "  consumer {i}: {} tasks ({} stolen), {} misses",
            c.tasks_executed, c.steals, c.misses
        );
    }
    Ok(())
}
