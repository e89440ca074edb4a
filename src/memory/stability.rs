//! Rolling per-motif stability history.
//!
//! Each training cycle appends one row of booleans (did the motif's kernel
//! self-similarity exceed the threshold?) and drops the oldest. A motif
//! stabilizes on the cycle its column becomes all-true; the column is then
//! cleared so the motif has to re-qualify before it fires again.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StabilityHistory {
    depth: usize,
    rank: usize,
    rows: VecDeque<Vec<bool>>,
}

impl StabilityHistory {
    /// A history of `depth` all-false rows over `rank` motifs.
    pub fn new(depth: usize, rank: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            rank,
            rows: std::iter::repeat(vec![false; rank]).take(depth).collect(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Push one cycle of deltas and return which motifs just stabilized.
    pub fn record(&mut self, deltas: &[f64], threshold: f64) -> Vec<bool> {
        assert_eq!(deltas.len(), self.rank, "Dimension mismatch in stability record");
        self.rows.pop_front();
        self.rows.push_back(deltas.iter().map(|&d| d > threshold).collect());

        let fired: Vec<bool> = (0..self.rank)
            .map(|k| self.rows.iter().all(|row| row[k]))
            .collect();
        for (k, &f) in fired.iter().enumerate() {
            if f {
                self.reset_motif(k);
            }
        }
        fired
    }

    /// Clear one motif's column.
    pub fn reset_motif(&mut self, k: usize) {
        for row in self.rows.iter_mut() {
            row[k] = false;
        }
    }

    /// Consecutive above-threshold cycles currently recorded for motif `k`.
    pub fn streak(&self, k: usize) -> usize {
        self.rows.iter().rev().take_while(|row| row[k]).count()
    }
}
