//! # Watchtower worker
//!
//! The worker half of Watchtower: environment [`config`], and the
//! [`dispatcher`] loop that pulls jobs off the three priority queues and
//! drives the analysis, profiling, storage, and auto-bump crates.

pub mod config;
pub mod dispatcher;
