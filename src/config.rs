//! Configuration records for models, trainers and the tracker façade.
//!
//! All records derive serde so an orchestrator can keep them in JSON; every
//! field has a default, so partial documents are accepted.

use crate::error::{MotifError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Regularization weights. A weight of zero disables the term.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Penalties {
    /// L1 sparsity on kernels.
    pub sparse_w: f64,
    /// L1 sparsity on activations.
    pub sparse_h: f64,
    /// Cross-motif orthogonality of lag-summed kernels.
    pub ortho_w: f64,
    /// Cross-motif orthogonality of smoothed activations.
    pub ortho_h: f64,
    /// Cross-motif orthogonality of kernel-filtered signal against activations.
    pub x_ortho: f64,
}

impl Penalties {
    /// Penalty names accepted by [`Penalties::from_map`].
    pub const NAMES: [&'static str; 5] = ["sparse_w", "sparse_h", "ortho_w", "ortho_h", "x_ortho"];

    /// Build from a `name → weight` mapping.
    pub fn from_map(map: &HashMap<String, f64>) -> Result<Self> {
        let mut p = Self::default();
        for (name, &weight) in map {
            let slot = match name.as_str() {
                "sparse_w" => &mut p.sparse_w,
                "sparse_h" => &mut p.sparse_h,
                "ortho_w" => &mut p.ortho_w,
                "ortho_h" => &mut p.ortho_h,
                "x_ortho" => &mut p.x_ortho,
                other => return Err(MotifError::UnknownPenalty(other.to_string())),
            };
            *slot = weight;
        }
        p.validate()?;
        Ok(p)
    }

    /// True if any penalty is active.
    pub fn any(&self) -> bool {
        self.sparse_w > 0.0
            || self.sparse_h > 0.0
            || self.ortho_w > 0.0
            || self.ortho_h > 0.0
            || self.x_ortho > 0.0
    }

    pub fn validate(&self) -> Result<()> {
        let weights = [self.sparse_w, self.sparse_h, self.ortho_w, self.ortho_h, self.x_ortho];
        for (name, w) in Self::NAMES.iter().zip(weights) {
            if !(w.is_finite() && w >= 0.0) {
                return Err(MotifError::Configuration(format!(
                    "penalty {} must be finite and >= 0, got {}",
                    name, w
                )));
            }
        }
        Ok(())
    }
}

/// Construction parameters for a [`MotifModel`](crate::model::MotifModel).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_channels: usize,
    pub n_samples: usize,
    /// Convolution window (kernel length in samples).
    pub window: usize,
    pub rank: usize,
    /// Apply `ln(1 + x)` compression after L1 normalization.
    pub log_normalize: bool,
    /// Exploration noise blended into kernels once per cycle, in `[0, 1]`.
    pub motif_noise: f64,
    /// Event rise time constant in seconds.
    pub tau_rise: Option<f64>,
    /// Event decay time constant in seconds.
    pub tau_decay: Option<f64>,
    /// Re-estimate decay coefficients from data every cycle.
    pub optimize_decay: bool,
    pub penalties: Penalties,
    pub sampling_rate_hz: f64,
    pub seed: u64,
    /// Projected-gradient iterations per deconvolution.
    pub deconv_iterations: usize,
    /// Spike sparsity weight, in units of the estimated noise scale.
    pub deconv_penalty_scale: f64,
    /// A motif is rehashed once its kernel's similarity to the kernel it
    /// was last hashed from drops below this.
    pub rehash_similarity: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_channels: 1,
            n_samples: 500,
            window: 50,
            rank: 3,
            log_normalize: false,
            motif_noise: 0.0,
            tau_rise: None,
            tau_decay: None,
            optimize_decay: false,
            penalties: Penalties::default(),
            sampling_rate_hz: 1000.0,
            seed: 0,
            deconv_iterations: 100,
            deconv_penalty_scale: 1.0,
            rehash_similarity: 0.8,
        }
    }
}

impl ModelConfig {
    /// Parse and validate from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate shapes, noise rate and the decay-constant pairing.
    pub fn validate(&self) -> Result<()> {
        if self.n_channels == 0 || self.n_samples == 0 || self.rank == 0 {
            return Err(MotifError::Configuration(
                "n_channels, n_samples and rank must be > 0".into(),
            ));
        }
        if self.window == 0 || self.window > self.n_samples {
            return Err(MotifError::Configuration(format!(
                "window must be in 1..={}, got {}",
                self.n_samples, self.window
            )));
        }
        if !(0.0..=1.0).contains(&self.motif_noise) {
            return Err(MotifError::Configuration(format!(
                "motif_noise must be in [0, 1], got {}",
                self.motif_noise
            )));
        }
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(MotifError::Configuration(
                "sampling_rate_hz must be finite and > 0".into(),
            ));
        }
        if !(self.deconv_penalty_scale.is_finite() && self.deconv_penalty_scale >= 0.0) {
            return Err(MotifError::Configuration(
                "deconv_penalty_scale must be finite and >= 0".into(),
            ));
        }
        if self.rehash_similarity.is_nan() || self.rehash_similarity > 1.0 {
            return Err(MotifError::Configuration(format!(
                "rehash_similarity must be <= 1, got {}",
                self.rehash_similarity
            )));
        }
        self.decay_time_constants()?;
        self.penalties.validate()
    }

    /// The validated `(rise, decay)` pair, or `None` if neither is set.
    pub fn decay_time_constants(&self) -> Result<Option<(f64, f64)>> {
        match (self.tau_rise, self.tau_decay) {
            (None, None) => Ok(None),
            (Some(_), None) | (None, Some(_)) => Err(MotifError::Configuration(
                "tau_rise and tau_decay must be set together".into(),
            )),
            (Some(rise), Some(decay)) => {
                if !(decay.is_finite() && decay > 0.0) {
                    return Err(MotifError::Configuration(format!(
                        "tau_decay must be > 0, got {}",
                        decay
                    )));
                }
                if !(rise.is_finite() && rise >= 0.0) {
                    return Err(MotifError::Configuration(format!(
                        "tau_rise must be >= 0, got {}",
                        rise
                    )));
                }
                if rise >= decay {
                    return Err(MotifError::Configuration(format!(
                        "tau_rise ({}) must be < tau_decay ({})",
                        rise, decay
                    )));
                }
                Ok(Some((rise, decay)))
            }
        }
    }
}

/// Training parameters for a [`TrainerState`](crate::trainer::TrainerState).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Step-size exponent for kernel updates.
    pub motif_lr: f64,
    /// Step-size exponent for activation updates.
    pub event_lr: f64,
    /// Beta-divergence exponent (2 = squared error, 1 = KL, 0 = IS).
    pub beta: f64,
    /// Kernel self-similarity above which a cycle counts as stable.
    pub stability_thresh: f64,
    /// Consecutive stable cycles required before a motif is stabilized.
    pub motif_uptime_thresh: usize,
    /// Kernel update steps per cycle (N_W).
    pub motif_iterations: usize,
    /// Activation update steps per cycle (N_H).
    pub event_iterations: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            motif_lr: 1.0,
            event_lr: 1.0,
            beta: 2.0,
            stability_thresh: 0.9,
            motif_uptime_thresh: 5,
            motif_iterations: 10,
            event_iterations: 20,
        }
    }
}

impl TrainerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.motif_lr > 0.0 && self.event_lr > 0.0) {
            return Err(MotifError::Configuration(
                "learning rates must be > 0".into(),
            ));
        }
        if !self.beta.is_finite() {
            return Err(MotifError::Configuration("beta must be finite".into()));
        }
        if self.motif_uptime_thresh == 0 {
            return Err(MotifError::Configuration(
                "motif_uptime_thresh must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters for the [`MotifTracker`](crate::highlevel::MotifTracker) façade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub model: ModelConfig,
    pub trainer: TrainerConfig,
    /// Number of independent sub-models trained side by side.
    pub n_models: usize,
    /// Worker threads for the update fan-out; `None` runs sequentially.
    pub workers: Option<usize>,
    /// Reject candidates whose proximity to any ensemble entry exceeds this.
    pub max_proximity: Option<f64>,
    /// Seed for permutation draws.
    pub seed: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            trainer: TrainerConfig::default(),
            n_models: 1,
            workers: None,
            max_proximity: None,
            seed: 0,
        }
    }
}

impl TrackerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_models == 0 {
            return Err(MotifError::Configuration("n_models must be >= 1".into()));
        }
        if self.workers == Some(0) {
            return Err(MotifError::Configuration("workers must be >= 1".into()));
        }
        self.model.validate()?;
        self.trainer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_pairing_rules() {
        let mut cfg = ModelConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.tau_rise = Some(0.005);
        assert!(matches!(cfg.validate(), Err(MotifError::Configuration(_))));

        cfg.tau_decay = Some(0.05);
        assert_eq!(cfg.decay_time_constants().unwrap(), Some((0.005, 0.05)));

        cfg.tau_rise = Some(0.05);
        assert!(cfg.validate().is_err(), "rise == decay must be rejected");

        cfg.tau_rise = Some(0.001);
        cfg.tau_decay = Some(0.0);
        assert!(cfg.validate().is_err(), "decay <= 0 must be rejected");
    }

    #[test]
    fn test_penalties_from_map() {
        let mut map = HashMap::new();
        map.insert("sparse_h".to_string(), 0.1);
        map.insert("x_ortho".to_string(), 0.01);
        let p = Penalties::from_map(&map).unwrap();
        assert_eq!(p.sparse_h, 0.1);
        assert_eq!(p.x_ortho, 0.01);
        assert!(p.any());

        map.insert("bogus".to_string(), 1.0);
        assert!(matches!(
            Penalties::from_map(&map),
            Err(MotifError::UnknownPenalty(_))
        ));
    }

    #[test]
    fn test_partial_json() {
        let cfg = ModelConfig::from_json(r#"{"n_channels": 8, "rank": 2}"#).unwrap();
        assert_eq!(cfg.n_channels, 8);
        assert_eq!(cfg.rank, 2);
        assert_eq!(cfg.window, 50);

        let bad = ModelConfig::from_json(r#"{"tau_rise": 0.01}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_rehash_similarity_bounds() {
        let mut cfg = ModelConfig::default();
        cfg.rehash_similarity = f64::NEG_INFINITY;
        assert!(cfg.validate().is_ok(), "-inf never rehashes");
        cfg.rehash_similarity = 1.5;
        assert!(cfg.validate().is_err());
        cfg.rehash_similarity = f64::NAN;
        assert!(cfg.validate().is_err());
    }
}
