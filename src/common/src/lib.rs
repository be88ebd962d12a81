pub mod config;
pub mod storage;
pub mod telemetry;

pub use config::Configuration;
