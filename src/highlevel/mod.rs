//! High-level convenience API.
//!
//! This layer provides [`MotifTracker`], which owns a set of training
//! sub-models, a [`ParallelUpdater`](crate::parallel::ParallelUpdater) and an
//! [`Ensemble`](crate::memory::Ensemble), and runs the whole per-window
//! pipeline including promotion.
//!
//! For production or library code that needs its own promotion policy,
//! drive [`trainer`](crate::trainer) and [`memory`](crate::memory) directly.

pub mod client;

pub use client::{MotifTracker, StepReport};
