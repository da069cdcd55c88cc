pub mod client;
pub mod error;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod utils;

// Re-export common items
pub use error::{Result, SelfTestError};
pub use report::generate_report;
pub use runner::run_selftest;
