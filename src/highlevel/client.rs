//! Streaming façade that owns a set of sub-models, their update fan-out and
//! the promoted-motif ensemble.
//!
//! For full control, drive [`TrainerState`](crate::trainer::TrainerState),
//! [`ParallelUpdater`] and [`Ensemble`] directly.

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::memory::Ensemble;
use crate::model::{ModelBuilder, MotifHash};
use crate::parallel::{ParallelUpdater, SubModel, TrainingCall, TrainingUnit};
use crate::precision::PermutationDraw;
use crate::signal::Signal;
use crate::trainer::{CycleReport, TrainerState};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// What one [`MotifTracker::step`] did.
#[derive(Clone, Debug, Default)]
pub struct StepReport {
    /// One report per sub-model, in sub-model order.
    pub cycles: Vec<CycleReport>,
    /// Hashes promoted into the ensemble this window.
    pub imported: Vec<MotifHash>,
    /// Ensemble entries refreshed from their source motif.
    pub refreshed: usize,
    /// Stabilized candidates turned away by the precision or proximity gate.
    pub rejected: usize,
}

/// Convenience wrapper over the trainer, parallel and memory layers.
///
/// Each [`step`](MotifTracker::step) consumes one window:
///
/// 1. every sub-model runs a full online cycle (possibly in parallel)
/// 2. every ensemble entry re-fits its activation against the window
/// 3. entries whose source motif still carries their hash are refreshed
/// 4. all motifs are scored with one shared permutation draw
/// 5. newly stabilized motifs are promoted if their precision beats every
///    entry and, when configured, they are not too close to one
///
/// # Example
///
/// ```rust
/// use seqmotif::config::{ModelConfig, TrackerConfig};
/// use seqmotif::highlevel::MotifTracker;
/// use seqmotif::{Matrix, Signal};
///
/// let config = TrackerConfig {
///     model: ModelConfig { n_channels: 2, n_samples: 80, window: 6, rank: 2, ..Default::default() },
///     n_models: 2,
///     ..Default::default()
/// };
/// let mut tracker = MotifTracker::new(config).unwrap();
/// let window = Signal::new(Matrix::from_data(2, 80, vec![0.3; 160]));
/// let report = tracker.step(&window).unwrap();
/// assert_eq!(report.cycles.len(), 2);
/// ```
#[derive(Debug)]
pub struct MotifTracker {
    config: TrackerConfig,
    units: Vec<SubModel>,
    ensemble: Ensemble,
    updater: ParallelUpdater,
    rng: ChaCha8Rng,
    windows: u64,
}

impl MotifTracker {
    /// Build `n_models` sub-models with consecutive seeds.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let units = (0..config.n_models)
            .map(|i| {
                let mut model_config = config.model.clone();
                model_config.seed = model_config.seed.wrapping_add(i as u64);
                let model = ModelBuilder::from_config(model_config).build()?;
                let trainer = TrainerState::new(config.trainer.clone(), &model)?;
                Ok(SubModel::new(model, trainer))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            updater: ParallelUpdater::new(config.workers)?,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            ensemble: Ensemble::new(),
            windows: 0,
            units,
            config,
        })
    }

    /// Swap in an ensemble restored from storage.
    pub fn with_ensemble(mut self, ensemble: Ensemble) -> Self {
        self.ensemble = ensemble;
        self
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    /// Consume one window.
    pub fn step(&mut self, signal: &Signal) -> Result<StepReport> {
        let cycles = self
            .updater
            .apply(&mut self.units, signal, TrainingCall::UpdateAndFilter)?;
        self.updater
            .apply(self.ensemble.entries_mut(), signal, TrainingCall::FilterOnly)?;
        let refreshed: usize = self
            .units
            .iter()
            .map(|u| self.ensemble.update_ensemble(&u.model))
            .sum();

        let m = &self.config.model;
        let draw = PermutationDraw::sample(&mut self.rng, m.n_channels, m.n_samples, m.window);
        for unit in &mut self.units {
            unit.trainer.compute_motif_precision(&unit.model, signal, &draw)?;
        }
        for entry in self.ensemble.entries_mut() {
            let (model, trainer) = entry.split();
            trainer.compute_motif_precision(model, signal, &draw)?;
        }

        let (imported, rejected) = self.promote(&cycles)?;
        self.windows += 1;
        tracing::debug!(
            window = self.windows,
            imported = imported.len(),
            refreshed,
            rejected,
            ensemble = self.ensemble.len(),
            "window processed"
        );

        Ok(StepReport {
            cycles,
            imported,
            refreshed,
            rejected,
        })
    }

    /// Re-fit every sub-model's activations without touching kernels.
    pub fn filter(&mut self, signal: &Signal) -> Result<Vec<CycleReport>> {
        self.updater
            .apply(&mut self.units, signal, TrainingCall::FilterOnly)
    }

    fn promote(&mut self, cycles: &[CycleReport]) -> Result<(Vec<MotifHash>, usize)> {
        let mut imported = Vec::new();
        let mut rejected = 0;
        for (unit, report) in self.units.iter().zip(cycles) {
            for &k in &report.stabilized {
                let precision = unit.trainer.precision()[k].precision_score;
                if let Some(best) = self.ensemble.max_precision() {
                    if precision <= best {
                        rejected += 1;
                        continue;
                    }
                }
                if let Some(limit) = self.config.max_proximity {
                    let proximity = self
                        .ensemble
                        .proximity_to_ensemble(&unit.model.motif_kernel(k), unit.model.activation(k));
                    if proximity.iter().any(|&p| p > limit) {
                        tracing::debug!(motif = k, limit, "candidate too close to ensemble");
                        rejected += 1;
                        continue;
                    }
                }
                if self.ensemble.import_to_ensemble(&unit.model, &unit.trainer, k)? {
                    imported.push(unit.model.content_hash(k));
                }
            }
        }
        Ok((imported, rejected))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn units(&self) -> &[SubModel] {
        &self.units
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn windows(&self) -> u64 {
        self.windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, TrainerConfig};
    use crate::kernel::Matrix;
    use crate::precision::compute_motif_precision;

    fn config(workers: Option<usize>) -> TrackerConfig {
        TrackerConfig {
            model: ModelConfig {
                n_channels: 3,
                n_samples: 120,
                window: 8,
                rank: 2,
                seed: 17,
                ..ModelConfig::default()
            },
            trainer: TrainerConfig {
                stability_thresh: f64::NEG_INFINITY,
                motif_uptime_thresh: 2,
                ..TrainerConfig::default()
            },
            n_models: 2,
            workers,
            max_proximity: None,
            seed: 5,
        }
    }

    fn window() -> Signal {
        let mut x = Matrix::zeros(3, 120);
        for start in (10..100).step_by(25) {
            for c in 0..3 {
                x[(c, start + c)] = 1.0;
                x[(c, start + c + 1)] = 0.5;
            }
        }
        Signal::new(x)
    }

    #[test]
    fn test_first_stabilized_motif_is_promoted() {
        let mut tracker = MotifTracker::new(config(None)).unwrap();
        let x = window();
        let first = tracker.step(&x).unwrap();
        assert!(first.imported.is_empty());
        let second = tracker.step(&x).unwrap();
        assert!(!second.imported.is_empty(), "empty ensemble accepts a candidate");
        assert_eq!(tracker.ensemble().len(), second.imported.len());
        assert_eq!(tracker.windows(), 2);
        assert!(tracker
            .ensemble()
            .hashes()
            .iter()
            .all(|h| tracker.units().iter().any(|u| u.model.hashes().contains(h))));
    }

    #[test]
    fn test_promotion_requires_beating_ensemble_precision() {
        let mut tracker = MotifTracker::new(config(None)).unwrap();
        let x = window();
        tracker.step(&x).unwrap();
        let second = tracker.step(&x).unwrap();
        let best = tracker.ensemble().max_precision().unwrap();
        for hash in &second.imported {
            let entry = tracker.ensemble().get_by_hash(hash).unwrap();
            assert!(entry.precision() <= best);
        }
        let total = second.imported.len() + second.rejected;
        assert_eq!(total, 4, "both motifs of both sub-models were candidates");
    }

    #[test]
    fn test_entry_precision_scored_after_refresh() {
        let mut cfg = config(None);
        cfg.model.rehash_similarity = f64::NEG_INFINITY;
        let mut tracker = MotifTracker::new(cfg).unwrap();
        let x = window();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        tracker.step(&x).unwrap();
        PermutationDraw::sample(&mut rng, 3, 120, 8);
        tracker.step(&x).unwrap();
        PermutationDraw::sample(&mut rng, 3, 120, 8);
        let promoted = tracker.ensemble().len();
        assert!(promoted > 0);

        let report = tracker.step(&x).unwrap();
        let draw = PermutationDraw::sample(&mut rng, 3, 120, 8);
        assert_eq!(report.refreshed, promoted);
        for entry in tracker.ensemble().entries() {
            let expected = compute_motif_precision(entry.model(), &x, &draw).unwrap()[0];
            assert_eq!(entry.record(), expected);
        }
    }

    #[test]
    fn test_parallel_tracker_matches_sequential() {
        let x = window();
        let mut seq = MotifTracker::new(config(None)).unwrap();
        let mut par = MotifTracker::new(config(Some(2))).unwrap();
        for _ in 0..2 {
            seq.step(&x).unwrap();
            par.step(&x).unwrap();
        }
        assert_eq!(seq.ensemble().hashes(), par.ensemble().hashes());
        for (a, b) in seq.units().iter().zip(par.units()) {
            assert_eq!(a.model.kernels(), b.model.kernels());
        }
    }

    #[test]
    fn test_wrong_window_shape_is_an_error() {
        let mut tracker = MotifTracker::new(config(None)).unwrap();
        let bad = Signal::new(Matrix::zeros(2, 120));
        assert!(tracker.step(&bad).is_err());
    }
}
