//! # flowpath parallel
//!
//! Scheduling of independent per-outlet work.
//!
//! This crate provides:
//! - `ProcessingMode`: sequential, Rayon global pool, or a dedicated pool
//! - `CancellationToken`: cooperative cancellation checked between items

pub mod cancel;
pub mod strategy;

pub use cancel::CancellationToken;
pub use strategy::{num_cpus, ParallelStrategy, ProcessingMode};
