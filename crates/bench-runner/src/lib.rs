//! Orchestration and measurement core for the encrypted ML inference
//! benchmark.
//!
//! Every pipeline stage (dataset export, key generation, encryption,
//! encrypted compute, decryption, cleartext reference) is an external
//! program; this crate only sequences them, measures latency and artifact
//! sizes, scores predictions and writes one JSON report per run.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod quality;
pub mod report;
pub mod seed;
pub mod telemetry;

pub use config::{resolve, DirectoryLayout, InstanceConfig, InstanceSize};
pub use dispatch::{
    ExecutableResolver, NoopResolver, ScriptResolver, StageDispatcher, StageInvocation,
    StageOutcome, StageOwner, StageResolver,
};
pub use error::{BenchError, Result};
pub use orchestrator::{run_benchmark, BenchOptions, BenchOutcome, Orchestrator, Phase};
pub use quality::{QualityMap, QualityScore};
pub use report::RunReport;
pub use seed::{derive_run_seed, RunSeed, SeedSchedule};
pub use telemetry::{human_readable_size, Telemetry};
