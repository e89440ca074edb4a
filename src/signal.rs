//! Input windows handed to the model by the feature-extraction collaborator.

use crate::error::{MotifError, Result};
use crate::kernel::Matrix;

/// A non-negative `[channel][time]` feature window with a validity mask.
///
/// Channels flagged invalid keep their rows but carry zero weight in every
/// loss, gradient and score.
#[derive(Clone, Debug)]
pub struct Signal {
    data: Matrix,
    valid: Vec<bool>,
}

impl Signal {
    /// Wrap a window with every channel valid.
    pub fn new(data: Matrix) -> Self {
        let valid = vec![true; data.rows()];
        Self { data, valid }
    }

    /// Wrap a window with an explicit bad-channel mask.
    pub fn with_mask(data: Matrix, valid: Vec<bool>) -> Result<Self> {
        if valid.len() != data.rows() {
            return Err(MotifError::DimensionMismatch {
                what: "channel mask",
                expected: data.rows(),
                got: valid.len(),
            });
        }
        Ok(Self { data, valid })
    }

    pub fn channels(&self) -> usize {
        self.data.rows()
    }

    pub fn samples(&self) -> usize {
        self.data.cols()
    }

    pub fn data(&self) -> &Matrix {
        &self.data
    }

    pub fn valid(&self) -> &[bool] {
        &self.valid
    }

    /// Data with invalid channels zeroed.
    pub fn masked(&self) -> Matrix {
        let mut m = self.data.clone();
        for (c, &ok) in self.valid.iter().enumerate() {
            if !ok {
                m.row_mut(c).iter_mut().for_each(|v| *v = 0.0);
            }
        }
        m
    }

    /// Check the window against a model's expected shape.
    pub fn check_shape(&self, channels: usize, samples: usize) -> Result<()> {
        if self.channels() != channels {
            return Err(MotifError::DimensionMismatch {
                what: "signal channels",
                expected: channels,
                got: self.channels(),
            });
        }
        if self.samples() != samples {
            return Err(MotifError::DimensionMismatch {
                what: "signal samples",
                expected: samples,
                got: self.samples(),
            });
        }
        Ok(())
    }
}
