pub mod core;
pub mod deferred;
pub mod heap;

pub use self::core::JobScheduler;
pub use deferred::{DeferredJob, MAX_DEFERRED_TRIALS};
pub use heap::{SystemEntry, SystemHeap};
