pub mod jobs;
pub mod repository;

pub use jobs::{JobRecord, JobResultRecord};
pub use repository::{EasypostStorage, StorageConfig};
