pub mod cancel;
pub mod config;
pub mod progress;
pub mod queue;
pub mod store;
pub mod submit;
pub mod worker;

pub use cancel::cancel_job;
pub use config::WorkerConfig;
pub use queue::TrainingQueue;
pub use store::JobStore;
pub use submit::{get_job, submit_job};
pub use worker::Worker;
