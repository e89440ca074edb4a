//! Online training cycle and per-model training state.
//!
//! One [`TrainerState`] drives one [`MotifModel`]. Every streaming window
//! goes through [`TrainerState::online_update_and_filter`]:
//!
//! 1. blend exploration noise into the kernels
//! 2. re-fit activations from scratch with kernels held fixed
//! 3. taper and deconvolve every activation trace
//! 4. refine kernels with activations held fixed, then recenter and
//!    renormalize; motifs that moved materially take a new content hash
//! 5. measure each kernel's change since the last cycle
//! 6. advance the stability history
//!
//! [`TrainerState::online_filter`] runs step 2 alone, without penalties,
//! to score a learned model against new data.
//!
//! # Example
//!
//! ```rust
//! use seqmotif::config::TrainerConfig;
//! use seqmotif::model::ModelBuilder;
//! use seqmotif::trainer::TrainerState;
//! use seqmotif::{Matrix, Signal};
//!
//! let mut model = ModelBuilder::new(2, 100, 8, 2).seed(5).build().unwrap();
//! let mut trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
//!
//! let signal = Signal::new(Matrix::from_data(2, 100, vec![0.5; 200]));
//! let report = trainer.online_update_and_filter(&mut model, &signal).unwrap();
//! assert!(report.loss.is_finite());
//! ```

use crate::config::TrainerConfig;
use crate::error::Result;
use crate::kernel::conv;
use crate::kernel::divergence::{self, EPS};
use crate::memory::StabilityHistory;
use crate::model::MotifModel;
use crate::precision::{compute_motif_precision, PermutationDraw, PrecisionRecord};
use crate::signal::Signal;
use serde::{Deserialize, Serialize};

/// Outcome of one training call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Loss after the call (penalties included unless filtering).
    pub loss: f64,
    /// Motifs that stabilized on this cycle.
    pub stabilized: Vec<usize>,
    /// Motifs whose deconvolution failed and were zeroed.
    pub deconvolution_failures: usize,
    /// Motifs whose kernel moved far enough to take a new content hash.
    pub rehashed: Vec<usize>,
}

/// Training context owned 1:1 by a model.
#[derive(Clone, Debug)]
pub struct TrainerState {
    config: TrainerConfig,
    history: StabilityHistory,
    stabilized: Vec<bool>,
    precision: Vec<PrecisionRecord>,
    cycles: u64,
}

impl TrainerState {
    pub fn new(config: TrainerConfig, model: &MotifModel) -> Result<Self> {
        config.validate()?;
        let rank = model.rank();
        Ok(Self {
            history: StabilityHistory::new(config.motif_uptime_thresh, rank),
            stabilized: vec![false; rank],
            precision: vec![PrecisionRecord::default(); rank],
            cycles: 0,
            config,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Per-motif flags from the most recent cycle.
    pub fn stabilized(&self) -> &[bool] {
        &self.stabilized
    }

    pub fn history(&self) -> &StabilityHistory {
        &self.history
    }

    /// Records from the most recent [`TrainerState::compute_motif_precision`].
    pub fn precision(&self) -> &[PrecisionRecord] {
        &self.precision
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub(crate) fn set_precision(&mut self, records: Vec<PrecisionRecord>) {
        self.precision = records;
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Run a full training cycle on one window.
    pub fn online_update_and_filter(
        &mut self,
        model: &mut MotifModel,
        signal: &Signal,
    ) -> Result<CycleReport> {
        signal.check_shape(model.channels(), model.samples())?;

        let noise = model.config().motif_noise;
        model.inject_noise(noise);

        model.reinit_activations();
        for _ in 0..self.config.event_iterations {
            self.step_activations(model, signal, false);
        }

        model.trim_edges();
        let deconvolution_failures = model.deconvolve();

        for _ in 0..self.config.motif_iterations {
            self.step_kernels(model, signal);
        }
        model.recenter();
        model.renormalize_kernels();
        let rehashed = model.refresh_hashes();
        for &k in &rehashed {
            tracing::debug!(motif = k, hash = %model.content_hash(k), "motif rehashed");
        }

        model.update_feature_cache();
        let fired = self
            .history
            .record(model.kernel_delta(), self.config.stability_thresh);
        let stabilized: Vec<usize> = fired
            .iter()
            .enumerate()
            .filter_map(|(k, &f)| f.then_some(k))
            .collect();
        for &k in &stabilized {
            tracing::info!(motif = k, hash = %model.content_hash(k), "motif stabilized");
        }
        self.stabilized = fired;
        self.cycles += 1;

        let loss = model.compute_loss(signal, self.config.beta, false)?;
        tracing::debug!(
            cycle = self.cycles,
            loss,
            failures = deconvolution_failures,
            "online update"
        );
        Ok(CycleReport {
            loss,
            stabilized,
            deconvolution_failures,
            rehashed,
        })
    }

    /// Re-fit activations only, without penalties. Kernels are untouched.
    pub fn online_filter(&mut self, model: &mut MotifModel, signal: &Signal) -> Result<CycleReport> {
        signal.check_shape(model.channels(), model.samples())?;
        model.reinit_activations();
        for _ in 0..self.config.event_iterations {
            self.step_activations(model, signal, true);
        }
        let loss = model.compute_loss(signal, self.config.beta, true)?;
        tracing::debug!(loss, "online filter");
        Ok(CycleReport {
            loss,
            ..CycleReport::default()
        })
    }

    /// Score every motif against `signal` and keep the records.
    pub fn compute_motif_precision(
        &mut self,
        model: &MotifModel,
        signal: &Signal,
        draw: &PermutationDraw,
    ) -> Result<&[PrecisionRecord]> {
        self.precision = compute_motif_precision(model, signal, draw)?;
        Ok(&self.precision)
    }

    // =========================================================================
    // Multiplicative updates
    // =========================================================================

    fn step_activations(&self, model: &mut MotifModel, signal: &Signal, skip_penalty: bool) {
        let beta = self.config.beta;
        let recon = model.reconstruct();
        let (pos, neg) = divergence::gradient_parts(signal.data(), &recon, beta, signal.valid());
        let down = conv::correlate_kernels(model.kernels(), &pos);
        let up = conv::correlate_kernels(model.kernels(), &neg);
        let penalty = (!skip_penalty).then(|| model.activation_penalty(signal));
        let exponent = divergence::mu_exponent(beta) * self.config.event_lr;

        let h = model.activations_mut();
        for (i, v) in h.data_mut().iter_mut().enumerate() {
            let extra = penalty.as_ref().map_or(0.0, |p| p.data()[i]);
            *v *= mu_ratio(up.data()[i], down.data()[i] + extra, exponent);
        }
    }

    fn step_kernels(&self, model: &mut MotifModel, signal: &Signal) {
        let beta = self.config.beta;
        let window = model.window();
        let recon = model.reconstruct();
        let (pos, neg) = divergence::gradient_parts(signal.data(), &recon, beta, signal.valid());
        let down = conv::correlate_activations(model.activations(), &pos, window);
        let up = conv::correlate_activations(model.activations(), &neg, window);
        let penalty = model.kernel_penalty(signal);
        let exponent = divergence::mu_exponent(beta) * self.config.motif_lr;

        let rank = model.rank();
        let w = model.kernels_mut();
        for (c, &ok) in signal.valid().iter().enumerate() {
            // masked channels carry no gradient, leave them as they are
            if !ok {
                continue;
            }
            for k in 0..rank {
                let (u, d, p) = (up.lane(c, k), down.lane(c, k), penalty.lane(c, k));
                for (l, v) in w.lane_mut(c, k).iter_mut().enumerate() {
                    *v *= mu_ratio(u[l], d[l] + p[l], exponent);
                }
            }
        }
    }
}

/// `(num / den)^exponent`, or 1 when the ratio is undefined.
#[inline]
fn mu_ratio(num: f64, den: f64, exponent: f64) -> f64 {
    let r = (num.max(0.0) / (den + EPS)).powf(exponent);
    if r.is_finite() {
        r
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Penalties;
    use crate::deconv::DecayParams;
    use crate::kernel::Matrix;
    use crate::memory::Ensemble;
    use crate::model::ModelBuilder;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Non-negative window with a repeating channel sweep over noise.
    fn sweep_signal(channels: usize, samples: usize, seed: u64) -> Signal {
        sweep(channels, samples, seed, false)
    }

    /// Like [`sweep_signal`], optionally sweeping from the last channel to
    /// the first.
    fn sweep(channels: usize, samples: usize, seed: u64, reversed: bool) -> Signal {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut x = Matrix::zeros(channels, samples);
        for c in 0..channels {
            for t in 0..samples {
                x[(c, t)] = 0.05 * rng.gen::<f64>();
            }
        }
        for start in (30..samples - 30).step_by(60) {
            for c in 0..channels {
                let order = if reversed { channels - 1 - c } else { c };
                for d in 0..6 {
                    x[(c, start + 2 * order + d)] += 1.0 - d as f64 / 6.0;
                }
            }
        }
        Signal::new(x)
    }

    fn assert_kernel_mass(model: &MotifModel) {
        for k in 0..model.rank() {
            let s: f64 = model.motif_kernel(k).data().iter().sum();
            assert!((s - 1.0).abs() < 1e-6, "motif {} mass {}", k, s);
        }
    }

    #[test]
    fn test_full_cycle_rank3_window50() {
        let mut model = ModelBuilder::new(4, 500, 50, 3).seed(1).build().unwrap();
        let mut trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
        let signal = sweep_signal(4, 500, 2);

        let report = trainer.online_update_and_filter(&mut model, &signal).unwrap();

        assert!(report.loss.is_finite());
        assert_kernel_mass(&model);
        assert!(model.kernels().is_finite(), "NaN in kernels");
        assert!(model.activations().is_finite(), "NaN in activations");
        assert_eq!(trainer.cycles(), 1);
    }

    #[test]
    fn test_cycle_preserves_non_negativity_with_penalties() {
        let penalties = Penalties {
            sparse_w: 0.01,
            sparse_h: 0.01,
            ortho_w: 0.1,
            ortho_h: 0.1,
            x_ortho: 0.01,
        };
        let mut model = ModelBuilder::new(3, 240, 12, 2)
            .penalties(penalties)
            .motif_noise(0.05)
            .seed(4)
            .build()
            .unwrap();
        let mut trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
        let signal = sweep_signal(3, 240, 9);
        for _ in 0..3 {
            trainer.online_update_and_filter(&mut model, &signal).unwrap();
            assert!(model.kernels().data().iter().all(|&v| v >= 0.0));
            assert!(model.activations().data().iter().all(|&v| v >= 0.0));
            assert!(model.spike_traces().data().iter().all(|&v| v >= 0.0));
            assert_kernel_mass(&model);
        }
    }

    #[test]
    fn test_activation_steps_reduce_loss() {
        let mut model = ModelBuilder::new(3, 240, 12, 2).seed(8).build().unwrap();
        let trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
        let signal = sweep_signal(3, 240, 3);
        let before = model.compute_loss(&signal, 2.0, true).unwrap();
        for _ in 0..10 {
            trainer.step_activations(&mut model, &signal, true);
        }
        let after = model.compute_loss(&signal, 2.0, true).unwrap();
        assert!(after < before, "loss {} -> {}", before, after);
    }

    #[test]
    fn test_filter_leaves_kernels_untouched() {
        let mut model = ModelBuilder::new(3, 240, 12, 2).seed(6).build().unwrap();
        let mut trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
        let signal = sweep_signal(3, 240, 5);
        let kernels = model.kernels().clone();
        let hashes = model.hashes().to_vec();

        trainer.online_filter(&mut model, &signal).unwrap();

        assert_eq!(&kernels, model.kernels());
        assert_eq!(hashes, model.hashes());
        assert_eq!(trainer.cycles(), 0);
    }

    #[test]
    fn test_stabilization_is_an_edge() {
        let mut model = ModelBuilder::new(2, 120, 8, 2).seed(2).build().unwrap();
        let config = TrainerConfig {
            stability_thresh: f64::NEG_INFINITY,
            motif_uptime_thresh: 2,
            ..TrainerConfig::default()
        };
        let mut trainer = TrainerState::new(config, &model).unwrap();
        let signal = sweep_signal(2, 120, 1);

        let first = trainer.online_update_and_filter(&mut model, &signal).unwrap();
        assert!(first.stabilized.is_empty());
        let second = trainer.online_update_and_filter(&mut model, &signal).unwrap();
        assert_eq!(second.stabilized, vec![0, 1]);
        assert_eq!(trainer.stabilized(), &[true, true]);
        let third = trainer.online_update_and_filter(&mut model, &signal).unwrap();
        assert!(third.stabilized.is_empty());
        assert_eq!(trainer.stabilized(), &[false, false]);
    }

    #[test]
    fn test_masked_channel_kernel_rows_frozen() {
        let mut model = ModelBuilder::new(3, 240, 12, 1).seed(12).build().unwrap();
        let trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
        let base = sweep_signal(3, 240, 7);
        let signal = Signal::with_mask(base.data().clone(), vec![true, false, true]).unwrap();
        let before = model.kernels().lane(1, 0).to_vec();
        trainer.step_kernels(&mut model, &signal);
        assert_eq!(before, model.kernels().lane(1, 0));
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let mut model = ModelBuilder::new(3, 240, 12, 1).build().unwrap();
        let mut trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
        let signal = Signal::new(Matrix::zeros(3, 100));
        assert!(trainer.online_update_and_filter(&mut model, &signal).is_err());
    }

    #[test]
    fn test_reversed_pattern_takes_new_identity() {
        let mut model = ModelBuilder::new(4, 360, 16, 1)
            .motif_noise(0.02)
            .rehash_similarity(0.9)
            .seed(3)
            .build()
            .unwrap();
        let mut trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
        let forward = sweep(4, 360, 1, false);
        let backward = sweep(4, 360, 2, true);

        for _ in 0..5 {
            trainer.online_update_and_filter(&mut model, &forward).unwrap();
        }
        let mut ensemble = Ensemble::new();
        assert!(ensemble.import_to_ensemble(&model, &trainer, 0).unwrap());
        let promoted = model.content_hash(0);

        let mut rehashed = false;
        for _ in 0..15 {
            let report = trainer.online_update_and_filter(&mut model, &backward).unwrap();
            rehashed |= report.rehashed == vec![0];
            ensemble.update_ensemble(&model);
        }
        assert!(rehashed, "reversed sweep must move the kernel materially");
        assert_ne!(model.content_hash(0), promoted);

        let kept = ensemble.get_by_hash(&promoted).unwrap().kernel();
        assert_eq!(ensemble.update_ensemble(&model), 0, "promoted entry no longer tracks the factor");
        assert_eq!(ensemble.get_by_hash(&promoted).unwrap().kernel(), kept);
        assert_ne!(kept, model.motif_kernel(0));

        assert!(ensemble.import_to_ensemble(&model, &trainer, 0).unwrap());
        assert_eq!(ensemble.len(), 2);
    }

    #[test]
    fn test_failed_deconvolution_is_isolated_to_its_motif() {
        let mut model = ModelBuilder::new(3, 240, 12, 3).seed(14).build().unwrap();
        let stable = DecayParams::from_roots(0.9, 0.3);
        model.set_decay(0, Some(DecayParams { g1: 2.0, g2: 0.0 }));
        model.set_decay(1, Some(stable));
        model.set_decay(2, Some(stable));
        let mut trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
        let signal = sweep_signal(3, 240, 4);

        let report = trainer.online_update_and_filter(&mut model, &signal).unwrap();

        assert_eq!(report.deconvolution_failures, 1);
        assert!(report.loss.is_finite());
        assert!(model.spike_trace(0).iter().all(|&v| v == 0.0));
        assert!(model.activation(0).iter().all(|&v| v == 0.0));
        assert!(model.raw_trace(0).iter().any(|&v| v > 0.0), "raw trace kept");
        for k in 1..3 {
            assert!(model.activation(k).iter().any(|&v| v > 0.0), "motif {} lost its fit", k);
            assert!(model.spike_trace(k).iter().all(|&v| v.is_finite() && v >= 0.0));
            assert_eq!(model.decay_params(k), Some(stable));
        }
        assert!(model.kernels().is_finite());
        assert_kernel_mass(&model);
    }

    #[test]
    fn test_kl_and_itakura_saito_cycles_with_silent_channel() {
        let base = sweep_signal(3, 240, 8);
        let mut x = base.data().clone();
        x.row_mut(1).iter_mut().for_each(|v| *v = 0.0);
        let signal = Signal::new(x);

        for beta in [1.0, 0.0] {
            let mut model = ModelBuilder::new(3, 240, 12, 2).seed(10).build().unwrap();
            let config = TrainerConfig {
                beta,
                ..TrainerConfig::default()
            };
            let mut trainer = TrainerState::new(config, &model).unwrap();
            for _ in 0..2 {
                let report = trainer.online_update_and_filter(&mut model, &signal).unwrap();
                assert!(report.loss.is_finite(), "beta {} loss {}", beta, report.loss);
                for m in [model.activations(), model.spike_traces(), model.raw_traces()] {
                    assert!(m.data().iter().all(|&v| v.is_finite() && v >= 0.0), "beta {}", beta);
                }
                assert!(model.kernels().data().iter().all(|&v| v.is_finite() && v >= 0.0));
                assert_kernel_mass(&model);
            }
        }
    }
}
