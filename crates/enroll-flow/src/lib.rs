//! Core library for the enrollment platform's application progression
//! engine.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
