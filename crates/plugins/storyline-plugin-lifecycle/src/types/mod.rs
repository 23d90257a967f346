//! Configuration and table types for the lifecycle engine

mod config;
mod tables;

pub use config::*;
pub use tables::*;
