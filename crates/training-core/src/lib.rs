pub mod error;
pub mod filter;
pub mod job;
pub mod types;

pub use error::TrainError;
pub use filter::{FilterConfig, FilterStats};
pub use job::{JobRequest, TrainedConfiguration, TrainingJob};
pub use types::*;
