pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod jobtype;
pub mod queue;
pub mod scheduler;
pub mod shutdown;
pub mod spawn;
pub mod store;
pub mod worker;
