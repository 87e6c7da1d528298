//! Runtime glue: configuration, the error taxonomy, the processor contract,
//! telemetry, and the signal-driven runner.

pub mod config;
pub mod error;
pub mod processor;
pub mod runner;
pub mod telemetry;
