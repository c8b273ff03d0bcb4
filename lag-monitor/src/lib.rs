pub mod config;
pub mod metrics;
pub mod monitor;
pub mod rules;
pub mod sample;
pub mod sampler;
pub mod window;

pub use config::MonitorConfig;
pub use monitor::{LagMonitor, LoggingVerdictHandler, VerdictHandler};
pub use rules::{classify, Verdict};
pub use sample::PartitionProgress;
pub use sampler::{ProgressSampler, SamplerError};
pub use window::SampleWindow;
