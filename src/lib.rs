// Re-export modules for benchmarking and testing
pub mod database;
pub mod dataset;
pub mod error;
pub mod parallel_processor;
pub mod processor;
pub mod server;
pub mod session;
pub mod types;
pub mod users;
