pub mod app;
pub mod jobs;

pub use app::{build_router, AppState};
pub use jobs::{spawn_scheduler, JobError, JobQueue, JobWorker, RetryPolicy, Schedule};
