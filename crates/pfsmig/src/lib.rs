//! Layout-aware parallel file system migration pipeline.
//!
//! A world of `W` peer ranks is statically partitioned into three contiguous
//! role bands: **producers** walk the source tree and carve per-file work
//! along stripe columns, **queue owners** buffer tasks in per-OST ring
//! queues, and **consumers** pull tasks with OST affinity and hand them to a
//! [`CopyExecutor`]. Every task targets exactly one storage target (its
//! *dominant OST*), so routing a task to the owner of that OST's queue keeps
//! copy traffic aligned with the underlying stripe layout.
//!
//! # Backpressure
//!
//! Producers dispatch with a *synchronous* (rendezvous) send: the call
//! completes only once the destination owner has taken the task into a ring
//! queue. A full queue therefore stalls the producer directly — no credit or
//! flow-control messages exist anywhere in the protocol.
//!
//! # External boundaries
//!
//! Directory enumeration ([`Walker`]), stripe-layout retrieval
//! ([`LayoutProvider`]), and the byte-level copy ([`CopyExecutor`]) are
//! capability traits; the pipeline core never touches the file system
//! directly. The message layer is the [`Transport`] trait; [`LocalWorld`]
//! realizes it in-process with one thread per rank.
//!
//! # Example
//!
//! ```ignore
//! use pfsmig::{run_world, ConfigSource, MigrateConfig, RankCaps, Role};
//!
//! let mut config = MigrateConfig::default();
//! config.num_source_ost = 4;
//! config.source_path = "/mnt/src".into();
//!
//! let report = run_world(6, ConfigSource::Value(config), |_rank, _role, cfg| {
//!     RankCaps::local_fs(cfg)
//! })?;
//! println!("copied {} bytes", report.bytes_copied());
//! ```

mod invariants;

pub mod config;
pub mod consumer;
pub mod error;
pub mod layout;
pub mod owner;
pub mod pipeline;
pub mod producer;
pub mod ring;
pub mod roles;
pub mod task;
pub mod transport;
pub mod walk;
pub mod wire;

pub use config::{ConfigSource, MigrateConfig, MAX_OST, MAX_PATH_LEN};
pub use consumer::{ConsumerEngine, ConsumerReport, CopyExecutor, SimulatedCopy};
pub use error::{
    ConfigError, CopyError, LayoutError, PipelineError, PlanError, TransportError, WalkError,
    WireError,
};
pub use layout::{FsKind, Layout, LayoutProvider, SyntheticLayoutProvider};
pub use owner::{OwnerReport, QueueOwnerEngine};
pub use pipeline::{run_world, RankCaps, RankReport, WorldReport};
pub use producer::{ProducerEngine, ProducerReport};
pub use ring::{PushError, RingQueue};
pub use roles::{OstOwnerMap, Role, RolePlan};
pub use task::{carve_file, CarvedTasks, Task, TaskKind};
pub use transport::{Envelope, LocalWorld, Transport};
pub use walk::{djb2, dir_owner, EntryKind, FsWalker, WalkEntry, Walker};
pub use wire::Tag;
