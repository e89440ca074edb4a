//! Fan-out of training calls across independent sub-models.
//!
//! Every unit owns its model, trainer and RNG, so a round of training calls
//! has no shared mutable state and produces the same numbers whether it
//! runs on a dedicated rayon pool or sequentially on the caller's thread.
//! Reports come back in submission order.

use crate::error::{MotifError, Result};
use crate::model::MotifModel;
use crate::signal::Signal;
use crate::trainer::{CycleReport, TrainerState};
use rayon::prelude::*;

/// Training call applied to every unit in a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainingCall {
    /// Full online cycle
    UpdateAndFilter,
    /// Activation re-fit only
    FilterOnly,
}

impl TrainingCall {
    pub fn run(self, model: &mut MotifModel, trainer: &mut TrainerState, signal: &Signal) -> Result<CycleReport> {
        match self {
            Self::UpdateAndFilter => trainer.online_update_and_filter(model, signal),
            Self::FilterOnly => trainer.online_filter(model, signal),
        }
    }
}

/// Anything that pairs a model with its trainer.
pub trait TrainingUnit: Send {
    fn split(&mut self) -> (&mut MotifModel, &mut TrainerState);
}

/// One training sub-model.
#[derive(Clone, Debug)]
pub struct SubModel {
    pub model: MotifModel,
    pub trainer: TrainerState,
}

impl SubModel {
    pub fn new(model: MotifModel, trainer: TrainerState) -> Self {
        Self { model, trainer }
    }
}

impl TrainingUnit for SubModel {
    fn split(&mut self) -> (&mut MotifModel, &mut TrainerState) {
        (&mut self.model, &mut self.trainer)
    }
}

/// Dispatches training rounds, optionally on a private thread pool.
pub struct ParallelUpdater {
    pool: Option<rayon::ThreadPool>,
}

impl ParallelUpdater {
    /// `None` runs every round sequentially. `Some(n)` builds a pool of
    /// exactly `n` threads that is used only by this updater.
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let pool = match workers {
            None => None,
            Some(0) => {
                return Err(MotifError::Configuration("workers must be >= 1".into()));
            }
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("seqmotif-worker-{}", i))
                    .build()
                    .map_err(|e| MotifError::ThreadPool(e.to_string()))?,
            ),
        };
        Ok(Self { pool })
    }

    pub fn sequential() -> Self {
        Self { pool: None }
    }

    /// Worker threads in the pool (1 when sequential).
    pub fn workers(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Apply `call` to every unit. The first error is returned; units that
    /// already ran keep their updated state.
    pub fn apply<U: TrainingUnit>(
        &self,
        units: &mut [U],
        signal: &Signal,
        call: TrainingCall,
    ) -> Result<Vec<CycleReport>> {
        let run = |unit: &mut U| {
            let (model, trainer) = unit.split();
            call.run(model, trainer, signal)
        };
        match &self.pool {
            Some(pool) => pool.install(|| units.par_iter_mut().map(run).collect()),
            None => units.iter_mut().map(run).collect(),
        }
    }
}

impl std::fmt::Debug for ParallelUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelUpdater")
            .field("workers", &self.workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainerConfig;
    use crate::kernel::Matrix;
    use crate::model::ModelBuilder;

    fn units(n: usize) -> Vec<SubModel> {
        (0..n)
            .map(|i| {
                let model = ModelBuilder::new(2, 96, 8, 2).seed(100 + i as u64).build().unwrap();
                let trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
                SubModel::new(model, trainer)
            })
            .collect()
    }

    fn signal() -> Signal {
        let data: Vec<f64> = (0..192).map(|i| ((i * 7919) % 31) as f64 / 31.0).collect();
        Signal::new(Matrix::from_data(2, 96, data))
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let x = signal();
        let mut seq = units(4);
        let mut par = units(4);

        let seq_reports = ParallelUpdater::sequential()
            .apply(&mut seq, &x, TrainingCall::UpdateAndFilter)
            .unwrap();
        let par_reports = ParallelUpdater::new(Some(3))
            .unwrap()
            .apply(&mut par, &x, TrainingCall::UpdateAndFilter)
            .unwrap();

        assert_eq!(seq_reports, par_reports);
        for (a, b) in seq.iter().zip(&par) {
            assert_eq!(a.model.kernels(), b.model.kernels());
            assert_eq!(a.model.activations(), b.model.activations());
        }
    }

    #[test]
    fn test_filter_only_round_keeps_kernels() {
        let x = signal();
        let mut subs = units(2);
        let before: Vec<_> = subs.iter().map(|s| s.model.kernels().clone()).collect();
        ParallelUpdater::new(Some(2))
            .unwrap()
            .apply(&mut subs, &x, TrainingCall::FilterOnly)
            .unwrap();
        for (s, k) in subs.iter().zip(&before) {
            assert_eq!(s.model.kernels(), k);
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(ParallelUpdater::new(Some(0)).is_err());
        assert_eq!(ParallelUpdater::new(None).unwrap().workers(), 1);
    }
}
