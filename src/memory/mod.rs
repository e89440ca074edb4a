//! Memory layer: stability tracking and the promoted-motif ensemble.
//!
//! This module provides:
//!
//! - [`StabilityHistory`]: a fixed-depth rolling record of which motifs held
//!   their shape on each cycle, firing once per stable streak.
//!
//! - [`Ensemble`]: a deduplicated, content-addressed catalogue of promoted
//!   single-motif models with shift-invariant proximity queries.
//!
//! # Usage
//!
//! ```rust
//! use seqmotif::memory::StabilityHistory;
//!
//! let mut history = StabilityHistory::new(3, 2);
//! history.record(&[0.95, 0.2], 0.9);
//! history.record(&[0.97, 0.95], 0.9);
//! let fired = history.record(&[0.99, 0.96], 0.9);
//! assert_eq!(fired, vec![true, false]);
//! ```

pub mod ensemble;
pub mod stability;

pub use ensemble::{Ensemble, EnsembleEntry, EntrySnapshot};
pub use stability::StabilityHistory;
