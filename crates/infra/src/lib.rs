//! Infrastructure for the batch field-update engine: durable store
//! backends, downstream adapters, call throttling and the job engine.

pub mod downstream;
pub mod jobs;
pub mod store;
pub mod throttle;

#[cfg(test)]
mod integration_tests;
