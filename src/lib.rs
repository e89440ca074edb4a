//! # seqmotif: online convolutional motif discovery
//!
//! seqmotif learns short multi-channel temporal patterns (motifs) from a
//! stream of non-negative feature windows by convolutional non-negative
//! matrix factorization, tracks when each motif stops changing, scores it
//! against permutation baselines and promotes stable, precise motifs into a
//! deduplicated ensemble.
//!
//! ## Quick Start
//!
//! ```rust
//! use seqmotif::config::{ModelConfig, TrackerConfig};
//! use seqmotif::{Matrix, MotifTracker, Signal};
//!
//! let config = TrackerConfig {
//!     model: ModelConfig { n_channels: 4, n_samples: 200, window: 10, rank: 3, ..Default::default() },
//!     ..Default::default()
//! };
//! let mut tracker = MotifTracker::new(config)?;
//!
//! let window = Signal::new(Matrix::from_data(4, 200, vec![0.1; 800]));
//! let report = tracker.step(&window)?;
//! println!("imported {} motifs", report.imported.len());
//! # Ok::<(), seqmotif::MotifError>(())
//! ```
//!
//! ## Layers
//!
//! - [`kernel`]: arrays, convolution, divergences, FFT helpers, similarity
//! - [`model`], [`deconv`], [`trainer`], [`precision`]: one factorization
//!   and its training cycle
//! - [`memory`]: stability history and the ensemble
//! - [`parallel`]: fan-out of training calls across sub-models
//! - [`highlevel`]: the [`MotifTracker`] façade

pub mod config;
pub mod deconv;
pub mod error;
pub mod highlevel;
pub mod kernel;
pub mod memory;
pub mod model;
pub mod parallel;
pub mod precision;
pub mod signal;
pub mod trainer;

// Re-exports for convenience
pub use config::{ModelConfig, Penalties, TrackerConfig, TrainerConfig};
pub use deconv::{DecayParams, DeconvolutionStage};
pub use error::{MotifError, Result};
pub use highlevel::{MotifTracker, StepReport};
pub use kernel::{Matrix, Metric, Similarity, Tensor3};
pub use memory::{Ensemble, EnsembleEntry, StabilityHistory};
pub use model::{ModelBuilder, MotifHash, MotifModel};
pub use parallel::{ParallelUpdater, SubModel, TrainingCall};
pub use precision::{PermutationDraw, PrecisionRecord};
pub use signal::Signal;
pub use trainer::{CycleReport, TrainerState};
