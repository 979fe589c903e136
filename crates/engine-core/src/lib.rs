pub mod connections;
pub mod error;
pub mod job;
pub mod progress;
pub mod retry;
