//! Confidential two-party model evaluation.
//!
//! A model developer uploads a model bundle to its [`developer`] coordinator, which seals it with
//! a shared key and sends it to the [`evaluator`] coordinator of the data owner. The evaluator
//! scores the model against a private labelled dataset and sends back anonymized
//! [`metrics`], sealed with the same key. Neither the dataset nor the individual predictions
//! ever leave the evaluator.

#[macro_use]
extern crate tracing;

pub mod bundle;
pub mod client;
pub mod common;
pub mod crypto;
pub mod dataset;
pub mod developer;
pub mod evaluator;
pub mod metrics;
pub mod model;
pub mod request;
pub mod rest;
pub mod settings;
pub mod storage;
pub mod task;

#[cfg(test)]
pub(crate) mod tests;
