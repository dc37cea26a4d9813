//! Pitching-change analysis: Statcast acquisition, plate-appearance
//! aggregation, padded sequence preparation, model inference and a small
//! dashboard.

pub mod acquisition;
pub mod batch;
pub mod columns;
pub mod config;
pub mod error;
pub mod features;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod processing;
pub mod types;
pub mod webapp;

pub use error::{Error, Result};
