pub mod action;
pub mod backpressure;
pub mod breaker;
pub mod cache;
pub mod collectors;
pub mod config;
pub mod network;
pub mod pipeline;
pub mod rate_limiter;
pub mod scorer;
pub mod store;
pub mod types;

pub use action::{ActionEngine, ExecutionResult, PlatformAdapter, PlatformError};
pub use config::FloodgateConfig;
pub use pipeline::{MessagePipeline, PipelineOutcome};
pub use scorer::RiskScorer;
pub use types::{MessageContext, RiskResult, ThreatType, Verdict};
