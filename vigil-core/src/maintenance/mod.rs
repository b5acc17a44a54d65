pub mod bulk_delete;
pub mod criteria;
pub mod evaluator;
pub mod sync;

pub use evaluator::MaintenanceEvaluator;
pub use sync::{sync_key, SyncManager};
