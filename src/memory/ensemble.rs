//! Ensemble: a content-addressed catalogue of promoted single-motif models.
//!
//! Each [`EnsembleEntry`] is a rank-1 [`MotifModel`] extracted from a
//! training sub-model, together with its own [`TrainerState`]. Entries are
//! keyed by the content hash the motif carried when it was promoted, so the
//! same factor is never imported twice, and later refreshes from the source
//! model land on the existing entry.
//!
//! # Example
//!
//! ```rust
//! use seqmotif::config::TrainerConfig;
//! use seqmotif::memory::Ensemble;
//! use seqmotif::model::ModelBuilder;
//! use seqmotif::trainer::TrainerState;
//!
//! let model = ModelBuilder::new(3, 120, 10, 2).seed(4).build().unwrap();
//! let trainer = TrainerState::new(TrainerConfig::default(), &model).unwrap();
//!
//! let mut ensemble = Ensemble::new();
//! assert!(ensemble.import_to_ensemble(&model, &trainer, 1).unwrap());
//! assert!(!ensemble.import_to_ensemble(&model, &trainer, 1).unwrap());
//! assert_eq!(ensemble.len(), 1);
//!
//! let proximity = ensemble.proximity_to_ensemble(&model.motif_kernel(1), model.activation(1));
//! assert!((proximity[0] - 1.0).abs() < 1e-6);
//! ```

use crate::config::TrainerConfig;
use crate::error::Result;
use crate::kernel::{Matrix, Similarity};
use crate::model::{ModelSnapshot, MotifHash, MotifModel};
use crate::parallel::TrainingUnit;
use crate::precision::PrecisionRecord;
use crate::trainer::TrainerState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;

// =============================================================================
// EnsembleEntry
// =============================================================================

/// One promoted motif with its own training context.
#[derive(Clone, Debug)]
pub struct EnsembleEntry {
    model: MotifModel,
    trainer: TrainerState,
}

impl EnsembleEntry {
    pub fn hash(&self) -> MotifHash {
        self.model.content_hash(0)
    }

    pub fn model(&self) -> &MotifModel {
        &self.model
    }

    pub fn trainer(&self) -> &TrainerState {
        &self.trainer
    }

    pub fn kernel(&self) -> Matrix {
        self.model.motif_kernel(0)
    }

    pub fn activation(&self) -> &[f64] {
        self.model.activation(0)
    }

    pub fn raw_trace(&self) -> &[f64] {
        self.model.raw_trace(0)
    }

    pub fn spike_trace(&self) -> &[f64] {
        self.model.spike_trace(0)
    }

    /// Latest precision score of this motif.
    pub fn precision(&self) -> f64 {
        self.record().precision_score
    }

    pub fn record(&self) -> PrecisionRecord {
        self.trainer.precision().first().copied().unwrap_or_default()
    }

    fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            model: self.model.snapshot(),
            trainer: self.trainer.config().clone(),
            record: self.record(),
        }
    }
}

impl TrainingUnit for EnsembleEntry {
    fn split(&mut self) -> (&mut MotifModel, &mut TrainerState) {
        (&mut self.model, &mut self.trainer)
    }
}

/// Serialized form of an entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub model: ModelSnapshot,
    pub trainer: TrainerConfig,
    pub record: PrecisionRecord,
}

// =============================================================================
// Ensemble
// =============================================================================

/// Ordered collection of entries with set identity on content hash.
#[derive(Clone, Debug, Default)]
pub struct Ensemble {
    entries: Vec<EnsembleEntry>,
    index: HashMap<MotifHash, usize>,
}

impl Ensemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Promote motif `k` of `model` as a new rank-1 entry.
    ///
    /// Returns `false` without touching anything when an entry with the
    /// same hash already exists.
    pub fn import_to_ensemble(
        &mut self,
        model: &MotifModel,
        trainer: &TrainerState,
        k: usize,
    ) -> Result<bool> {
        let hash = model.content_hash(k);
        if self.index.contains_key(&hash) {
            return Ok(false);
        }

        let single = model.extract_motif(k);
        let mut single_trainer = TrainerState::new(trainer.config().clone(), &single)?;
        if let Some(record) = trainer.precision().get(k) {
            single_trainer.set_precision(vec![*record]);
        }

        tracing::info!(
            hash = %hash,
            motif = k,
            precision = single_trainer.precision()[0].precision_score,
            "motif imported to ensemble"
        );
        self.index.insert(hash, self.entries.len());
        self.entries.push(EnsembleEntry {
            model: single,
            trainer: single_trainer,
        });
        Ok(true)
    }

    /// Copy the current kernel and traces of every motif in `model` whose
    /// hash names an existing entry. Returns the number of entries refreshed.
    pub fn update_ensemble(&mut self, model: &MotifModel) -> usize {
        let mut refreshed = 0;
        for k in 0..model.rank() {
            if let Some(&i) = self.index.get(&model.content_hash(k)) {
                self.entries[i].model.copy_motif_state(0, model, k);
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Geometric mean of zero-floored spatial and temporal similarity
    /// between a candidate and every entry, in entry order.
    pub fn proximity_to_ensemble(&self, kernel: &Matrix, activation: &[f64]) -> Vec<f64> {
        self.entries
            .iter()
            .map(|e| {
                let spatial = Similarity::spatial(kernel, &e.kernel()).max(0.0);
                let temporal = Similarity::temporal(activation, e.activation()).max(0.0);
                (spatial * temporal).sqrt()
            })
            .collect()
    }

    /// Highest precision score among the entries.
    pub fn max_precision(&self) -> Option<f64> {
        self.entries
            .iter()
            .map(EnsembleEntry::precision)
            .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
    }

    pub fn entries(&self) -> &[EnsembleEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [EnsembleEntry] {
        &mut self.entries
    }

    pub fn get(&self, i: usize) -> Option<&EnsembleEntry> {
        self.entries.get(i)
    }

    pub fn get_by_hash(&self, hash: &MotifHash) -> Option<&EnsembleEntry> {
        self.index.get(hash).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, hash: &MotifHash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn hashes(&self) -> Vec<MotifHash> {
        self.entries.iter().map(EnsembleEntry::hash).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // --- Persistence ---

    pub fn to_json(&self) -> Result<String> {
        let snaps: Vec<EntrySnapshot> = self.entries.iter().map(EnsembleEntry::snapshot).collect();
        Ok(serde_json::to_string(&snaps)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snaps: Vec<EntrySnapshot> = serde_json::from_str(json)?;
        let mut ensemble = Self::new();
        for snap in snaps {
            let model = MotifModel::from_snapshot(snap.model)?;
            let mut trainer = TrainerState::new(snap.trainer, &model)?;
            trainer.set_precision(vec![snap.record]);
            let hash = model.content_hash(0);
            if ensemble.index.contains_key(&hash) {
                continue;
            }
            ensemble.index.insert(hash, ensemble.entries.len());
            ensemble.entries.push(EnsembleEntry { model, trainer });
        }
        Ok(ensemble)
    }

    /// Persist to a JSON file.
    pub fn save(&self, path: &str) -> io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// Load from a JSON file.
    pub fn load(path: &str) -> io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

// =============================================================================
// Tests
// =============================================================================
