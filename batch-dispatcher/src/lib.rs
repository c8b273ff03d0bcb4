pub mod config;
pub mod dispatcher;
pub mod handle;
pub mod message;
pub mod metric_consts;
pub mod processor;
pub mod tracker;

pub use config::DispatcherConfig;
pub use dispatcher::{BatchDispatcher, StartError};
pub use handle::{DispatcherHandle, DispatcherState};
pub use message::{Batch, DecodedMessage};
pub use processor::BatchProcessor;
