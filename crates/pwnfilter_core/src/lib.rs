pub mod consts;
pub mod errors;
pub mod utils;
pub mod hash;
pub mod filter;
pub mod planner;
pub mod router;
pub mod config;
pub mod ingest;
pub mod container;
pub mod build;

pub use build::{build_filter, BuildReport};
pub use config::BuildConfig;
pub use container::{read_container, write_container};
pub use errors::{PwnError, Result, Stage};
pub use filter::{Bloom, ShardSet};
pub use ingest::{ingest, CancelToken, CorpusLines, IngestStats, PipelineConfig, Progress};
pub use planner::{plan, PlanInput, ShardPlan};
pub use router::ShardRouter;
