//! Kernel layer: numeric primitives for convolutional factorization.
//!
//! - Dense arrays ([`Matrix`], [`Tensor3`])
//! - Convolutional reconstruction and adjoints ([`conv`])
//! - Beta-divergence loss and gradient split ([`divergence`])
//! - FFT cross-correlation, shifts, noise estimate ([`spectral`])
//! - Shift-invariant comparators ([`Similarity`])
//!
//! This layer has no dependencies on the model, trainer or
//! [`memory`](crate::memory) layers.
//!
//! # Example
//!
//! ```rust
//! use seqmotif::kernel::{conv, Matrix, Similarity, Tensor3};
//!
//! let mut w = Tensor3::zeros(2, 1, 5);
//! w[(0, 0, 2)] = 1.0;
//! let mut h = Matrix::zeros(1, 20);
//! h[(0, 7)] = 1.0;
//! let x = conv::reconstruct(&w, &h);
//! assert_eq!(x[(0, 7)], 1.0);
//!
//! let sim = Similarity::temporal(h.row(0), h.row(0));
//! assert!((sim - 1.0).abs() < 1e-9);
//! ```

pub mod array;
pub mod conv;
pub mod divergence;
pub mod similarity;
pub mod spectral;

pub use array::{Matrix, Tensor3};
pub use similarity::{Metric, Similarity};
