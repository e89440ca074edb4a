//! The convolutional motif model: kernels, activations and their invariants.
//!
//! A [`MotifModel`] factorizes a `[channel][time]` window `X` as
//!
//! ```text
//! X̂[c][t] = Σ_k Σ_l W[c][k][l] · H[k][t - l + window/2]
//! ```
//!
//! with non-negative kernels `W` (each L1-normalized to unit mass) and
//! non-negative activations `H`. The model owns its own seeded RNG, so
//! independent models can be trained on different threads without changing
//! any draw.
//!
//! Models are created through [`ModelBuilder`]; initialization happens
//! exactly once, inside [`ModelBuilder::build`].

use crate::config::{ModelConfig, Penalties};
use crate::deconv::{decay_constants_to_coefficients, DecayParams, DeconvolutionStage};
use crate::error::{MotifError, Result};
use crate::kernel::conv;
use crate::kernel::divergence;
use crate::kernel::spectral::{roll, shift_zero_fill};
use crate::kernel::{Matrix, Similarity, Tensor3};
use crate::signal::Signal;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Floor added to kernel entries after normalization.
pub const KERNEL_FLOOR: f64 = 1e-12;

/// Resolution at which kernel values are hashed.
const HASH_QUANTUM: f64 = 1e-12;

// =============================================================================
// MotifHash
// =============================================================================

/// SHA-256 digest of a motif's (quantized) kernel values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MotifHash([u8; 32]);

impl MotifHash {
    /// Hash a `[channel][lag]` kernel.
    pub fn of_kernel(kernel: &Matrix) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((kernel.rows() as u64).to_le_bytes());
        hasher.update((kernel.cols() as u64).to_le_bytes());
        for &v in kernel.data() {
            let q = if v.is_finite() { (v / HASH_QUANTUM).round() as i64 } else { 0 };
            hasher.update(q.to_le_bytes());
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes as an integer, for seeding.
    pub fn prefix_u64(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(b)
    }
}

impl fmt::Display for MotifHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for MotifHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MotifHash({})", &self.to_string()[..12])
    }
}

// =============================================================================
// Penalty selection
// =============================================================================

/// Parameter a penalty gradient is taken with respect to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    Kernels,
    Activations,
}

/// Positive-part penalty gradient, shaped like the parameter.
#[derive(Clone, Debug)]
pub enum PenaltyGradient {
    Kernels(Tensor3),
    Activations(Matrix),
}

// =============================================================================
// Builder
// =============================================================================

/// One-shot constructor for [`MotifModel`].
#[derive(Clone, Debug)]
pub struct ModelBuilder {
    config: ModelConfig,
}

impl ModelBuilder {
    pub fn new(n_channels: usize, n_samples: usize, window: usize, rank: usize) -> Self {
        Self {
            config: ModelConfig {
                n_channels,
                n_samples,
                window,
                rank,
                ..ModelConfig::default()
            },
        }
    }

    pub fn from_config(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn log_normalize(mut self, on: bool) -> Self {
        self.config.log_normalize = on;
        self
    }

    pub fn motif_noise(mut self, rate: f64) -> Self {
        self.config.motif_noise = rate;
        self
    }

    /// Event rise/decay time constants in seconds.
    pub fn decay_time_constants(mut self, rise: f64, decay: f64) -> Self {
        self.config.tau_rise = Some(rise);
        self.config.tau_decay = Some(decay);
        self
    }

    pub fn optimize_decay(mut self, on: bool) -> Self {
        self.config.optimize_decay = on;
        self
    }

    pub fn penalties(mut self, penalties: Penalties) -> Self {
        self.config.penalties = penalties;
        self
    }

    pub fn sampling_rate(mut self, hz: f64) -> Self {
        self.config.sampling_rate_hz = hz;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Kernel similarity below which a motif takes a new content hash.
    pub fn rehash_similarity(mut self, threshold: f64) -> Self {
        self.config.rehash_similarity = threshold;
        self
    }

    pub fn deconvolution(mut self, iterations: usize, penalty_scale: f64) -> Self {
        self.config.deconv_iterations = iterations;
        self.config.deconv_penalty_scale = penalty_scale;
        self
    }

    /// Validate and initialize with random non-negative kernels and activations.
    pub fn build(self) -> Result<MotifModel> {
        let config = self.config;
        config.validate()?;

        let decay = match config.decay_time_constants()? {
            Some((rise, decay)) => Some(decay_constants_to_coefficients(
                rise,
                decay,
                config.sampling_rate_hz,
            )?),
            None => None,
        };

        let ModelConfig {
            n_channels,
            n_samples,
            window,
            rank,
            ..
        } = config;

        let mut model = MotifModel {
            kernels: Tensor3::zeros(n_channels, rank, window),
            activations: Matrix::zeros(rank, n_samples),
            raw: Matrix::zeros(rank, n_samples),
            spikes: Matrix::zeros(rank, n_samples),
            decay: vec![decay; rank],
            hashes: Vec::new(),
            hashed_kernels: Tensor3::zeros(n_channels, rank, window),
            previous_kernels: None,
            kernel_delta: vec![0.0; rank],
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            deconv: DeconvolutionStage::new(config.deconv_iterations, config.deconv_penalty_scale),
            config,
        };
        model.reinit_kernels();
        model.reinit_activations();
        Ok(model)
    }
}

// =============================================================================
// MotifModel
// =============================================================================

/// Serializable snapshot of a model's learned state, for hand-off to
/// external persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub config: ModelConfig,
    pub kernels: Tensor3,
    pub activations: Matrix,
    pub raw: Matrix,
    pub spikes: Matrix,
    pub decay: Vec<Option<DecayParams>>,
    pub hashes: Vec<MotifHash>,
}

/// Convolutional NMF parameters for one factorization problem.
#[derive(Clone, Debug)]
pub struct MotifModel {
    config: ModelConfig,
    /// `[channel][motif][lag]`
    kernels: Tensor3,
    /// `[motif][time]`, denoised after each update cycle.
    activations: Matrix,
    /// Tapered activations as they were before deconvolution.
    raw: Matrix,
    /// Non-negative event estimates from deconvolution.
    spikes: Matrix,
    decay: Vec<Option<DecayParams>>,
    hashes: Vec<MotifHash>,
    /// Kernels as they were when each motif was last hashed.
    hashed_kernels: Tensor3,
    previous_kernels: Option<Tensor3>,
    kernel_delta: Vec<f64>,
    rng: ChaCha8Rng,
    deconv: DeconvolutionStage,
}

impl MotifModel {
    /// Shorthand for `ModelBuilder::from_config(config).build()`.
    pub fn new(config: ModelConfig) -> Result<Self> {
        ModelBuilder::from_config(config).build()
    }

    // --- Accessors ---

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn rank(&self) -> usize {
        self.config.rank
    }

    pub fn channels(&self) -> usize {
        self.config.n_channels
    }

    pub fn samples(&self) -> usize {
        self.config.n_samples
    }

    pub fn window(&self) -> usize {
        self.config.window
    }

    pub fn kernels(&self) -> &Tensor3 {
        &self.kernels
    }

    pub fn activations(&self) -> &Matrix {
        &self.activations
    }

    pub fn raw_traces(&self) -> &Matrix {
        &self.raw
    }

    pub fn spike_traces(&self) -> &Matrix {
        &self.spikes
    }

    /// Kernel of motif `k` as a `[channel][lag]` matrix.
    pub fn motif_kernel(&self, k: usize) -> Matrix {
        self.kernels.slice_mid(k)
    }

    pub fn activation(&self, k: usize) -> &[f64] {
        self.activations.row(k)
    }

    pub fn raw_trace(&self, k: usize) -> &[f64] {
        self.raw.row(k)
    }

    pub fn spike_trace(&self, k: usize) -> &[f64] {
        self.spikes.row(k)
    }

    pub fn decay_params(&self, k: usize) -> Option<DecayParams> {
        self.decay[k]
    }

    /// Pin motif `k`'s decay coefficients. `None` re-estimates them on the
    /// next deconvolution.
    pub fn set_decay(&mut self, k: usize, decay: Option<DecayParams>) {
        self.decay[k] = decay;
    }

    pub fn content_hash(&self, k: usize) -> MotifHash {
        self.hashes[k]
    }

    pub fn hashes(&self) -> &[MotifHash] {
        &self.hashes
    }

    /// Self-similarity of each kernel against the previous cycle.
    pub fn kernel_delta(&self) -> &[f64] {
        &self.kernel_delta
    }

    pub(crate) fn kernels_mut(&mut self) -> &mut Tensor3 {
        &mut self.kernels
    }

    pub(crate) fn activations_mut(&mut self) -> &mut Matrix {
        &mut self.activations
    }

    // --- Reconstruction & loss ---

    /// Full reconstruction `X̂`.
    pub fn reconstruct(&self) -> Matrix {
        conv::reconstruct(&self.kernels, &self.activations)
    }

    /// Reconstruction loss plus active penalties unless `skip_penalty`.
    pub fn compute_loss(&self, signal: &Signal, beta: f64, skip_penalty: bool) -> Result<f64> {
        signal.check_shape(self.channels(), self.samples())?;
        let recon = self.reconstruct();
        let mut total = divergence::loss(signal.data(), &recon, beta, signal.valid());
        if !skip_penalty {
            total += self.penalty_value(signal);
        }
        Ok(total)
    }

    /// Value of the active penalty terms.
    pub fn penalty_value(&self, signal: &Signal) -> f64 {
        let p = &self.config.penalties;
        let mut total = 0.0;
        if p.sparse_w > 0.0 {
            total += p.sparse_w * self.kernels.data().iter().sum::<f64>();
        }
        if p.sparse_h > 0.0 {
            total += p.sparse_h * self.activations.data().iter().sum::<f64>();
        }
        if p.ortho_h > 0.0 {
            let smoothed = conv::smooth_time(&self.activations, self.smoothing_radius());
            total += p.ortho_h * cross_motif_overlap(&self.activations, &smoothed);
        }
        if p.ortho_w > 0.0 {
            let flat = self.lag_summed_kernels();
            let mut acc = 0.0;
            for c in 0..flat.rows() {
                let row = flat.row(c);
                let s: f64 = row.iter().sum();
                acc += s * s - row.iter().map(|v| v * v).sum::<f64>();
            }
            total += p.ortho_w * acc;
        }
        if p.x_ortho > 0.0 {
            let filtered = self.smoothed_signal_projection(signal);
            total += p.x_ortho * cross_motif_overlap(&self.activations, &filtered);
        }
        total
    }

    /// Positive-part gradient of the active penalties for `param`.
    pub fn penalty(&self, param: Param, signal: &Signal) -> PenaltyGradient {
        match param {
            Param::Kernels => PenaltyGradient::Kernels(self.kernel_penalty(signal)),
            Param::Activations => PenaltyGradient::Activations(self.activation_penalty(signal)),
        }
    }

    pub(crate) fn activation_penalty(&self, signal: &Signal) -> Matrix {
        let p = &self.config.penalties;
        let mut grad = Matrix::zeros(self.rank(), self.samples());
        if p.sparse_h > 0.0 {
            grad.data_mut().iter_mut().for_each(|g| *g += p.sparse_h);
        }
        if p.ortho_h > 0.0 {
            let smoothed = conv::smooth_time(&self.activations, self.smoothing_radius());
            add_scaled(&mut grad, &off_diagonal_rows(&smoothed), p.ortho_h);
        }
        if p.x_ortho > 0.0 {
            let filtered = self.smoothed_signal_projection(signal);
            add_scaled(&mut grad, &off_diagonal_rows(&filtered), p.x_ortho);
        }
        grad
    }

    pub(crate) fn kernel_penalty(&self, signal: &Signal) -> Tensor3 {
        let p = &self.config.penalties;
        let [channels, rank, window] = self.kernels.dims();
        let mut grad = Tensor3::zeros(channels, rank, window);
        if p.sparse_w > 0.0 {
            grad.data_mut().iter_mut().for_each(|g| *g += p.sparse_w);
        }
        if p.ortho_w > 0.0 {
            let flat = self.lag_summed_kernels();
            for c in 0..channels {
                let total: f64 = flat.row(c).iter().sum();
                for k in 0..rank {
                    let others = total - flat[(c, k)];
                    grad.lane_mut(c, k).iter_mut().for_each(|g| *g += p.ortho_w * others);
                }
            }
        }
        if p.x_ortho > 0.0 {
            let smoothed = conv::smooth_time(&signal.masked(), self.smoothing_radius());
            let xh = conv::correlate_activations(&self.activations, &smoothed, window);
            for c in 0..channels {
                for l in 0..window {
                    let total: f64 = (0..rank).map(|j| xh[(c, j, l)]).sum();
                    for k in 0..rank {
                        grad[(c, k, l)] += p.x_ortho * (total - xh[(c, k, l)]);
                    }
                }
            }
        }
        grad
    }

    fn smoothing_radius(&self) -> usize {
        self.window().saturating_sub(1)
    }

    /// `[channel][motif]` kernels summed over lags.
    fn lag_summed_kernels(&self) -> Matrix {
        let [channels, rank, _] = self.kernels.dims();
        let mut flat = Matrix::zeros(channels, rank);
        for c in 0..channels {
            for k in 0..rank {
                flat[(c, k)] = self.kernels.lane(c, k).iter().sum();
            }
        }
        flat
    }

    /// Signal filtered through each kernel, then smoothed in time.
    fn smoothed_signal_projection(&self, signal: &Signal) -> Matrix {
        let wtx = conv::correlate_kernels(&self.kernels, &signal.masked());
        conv::smooth_time(&wtx, self.smoothing_radius())
    }

    // --- Invariant maintenance ---

    /// Replace activations with uniform noise.
    pub fn reinit_activations(&mut self) {
        let rng = &mut self.rng;
        self.activations
            .data_mut()
            .iter_mut()
            .for_each(|v| *v = rng.gen::<f64>());
    }

    /// Replace kernels with normalized uniform noise and rehash every motif.
    pub fn reinit_kernels(&mut self) {
        let rng = &mut self.rng;
        self.kernels
            .data_mut()
            .iter_mut()
            .for_each(|v| *v = rng.gen::<f64>());
        self.normalize_kernels(false);
        self.previous_kernels = None;
        self.kernel_delta = vec![0.0; self.rank()];
        self.update_hash(None);
    }

    /// L1-normalize each motif's kernel to unit mass, optionally
    /// log-compress, clamp non-finite entries and apply a positive floor.
    ///
    /// Activations absorb the removed scale so the reconstruction is
    /// preserved by the linear step.
    pub fn renormalize_kernels(&mut self) {
        self.normalize_kernels(true);
    }

    fn normalize_kernels(&mut self, compensate: bool) {
        let [channels, rank, window] = self.kernels.dims();
        let uniform = 1.0 / (channels * window) as f64;
        for k in 0..rank {
            let mass = self.motif_mass(k);
            if mass.is_finite() && mass > 0.0 {
                self.scale_motif(k, 1.0 / mass);
                if compensate {
                    self.activations.row_mut(k).iter_mut().for_each(|h| *h *= mass);
                }
            } else {
                self.fill_motif(k, uniform);
                continue;
            }

            if self.config.log_normalize {
                for c in 0..channels {
                    self.kernels.lane_mut(c, k).iter_mut().for_each(|v| *v = v.ln_1p());
                }
                let mass = self.motif_mass(k);
                if mass.is_finite() && mass > 0.0 {
                    self.scale_motif(k, 1.0 / mass);
                } else {
                    self.fill_motif(k, uniform);
                    continue;
                }
            }

            for c in 0..channels {
                for v in self.kernels.lane_mut(c, k).iter_mut() {
                    if !v.is_finite() {
                        *v = 0.0;
                    }
                    *v += KERNEL_FLOOR;
                }
            }
        }
    }

    fn motif_mass(&self, k: usize) -> f64 {
        let channels = self.channels();
        (0..channels)
            .map(|c| self.kernels.lane(c, k).iter().sum::<f64>())
            .sum()
    }

    fn scale_motif(&mut self, k: usize, factor: f64) {
        for c in 0..self.channels() {
            self.kernels.lane_mut(c, k).iter_mut().for_each(|v| *v *= factor);
        }
    }

    fn fill_motif(&mut self, k: usize, value: f64) {
        for c in 0..self.channels() {
            self.kernels.lane_mut(c, k).iter_mut().for_each(|v| *v = value);
        }
    }

    /// Circularly shift each kernel so the centre of mass of its
    /// channel-averaged temporal profile sits at the window midpoint.
    ///
    /// The centre of mass is the mean phase of the lags on a circle of
    /// length `window`, not the ordinary linear mean. A kernel whose mass
    /// wraps across the window ends is therefore moved as one bump instead
    /// of being centred on the gap between its two halves. Activations are
    /// shifted the opposite way. A second call is a no-op.
    pub fn recenter(&mut self) {
        let [channels, rank, _] = self.kernels.dims();
        for k in 0..rank {
            let profile = Similarity::lag_profile(&self.kernels.slice_mid(k));
            let shift = match centering_shift(&profile) {
                Some(0) => continue,
                Some(shift) => shift,
                None => {
                    tracing::trace!(motif = k, "degenerate centre of mass, recenter skipped");
                    continue;
                }
            };
            for c in 0..channels {
                let rolled = roll(self.kernels.lane(c, k), shift);
                self.kernels.lane_mut(c, k).copy_from_slice(&rolled);
            }
            let moved = shift_zero_fill(self.activations.row(k), -shift);
            self.activations.row_mut(k).copy_from_slice(&moved);
        }
    }

    /// Blend each kernel with normalized noise at weight `rate`, then
    /// renormalize. No-op for `rate <= 0`.
    pub fn inject_noise(&mut self, rate: f64) {
        if rate <= 0.0 {
            return;
        }
        let rate = rate.min(1.0);
        let [channels, rank, window] = self.kernels.dims();
        for k in 0..rank {
            let noise: Vec<f64> = (0..channels * window).map(|_| self.rng.gen::<f64>()).collect();
            let mass: f64 = noise.iter().sum();
            if !(mass > 0.0) {
                continue;
            }
            for c in 0..channels {
                for (l, v) in self.kernels.lane_mut(c, k).iter_mut().enumerate() {
                    *v = (1.0 - rate) * *v + rate * noise[c * window + l] / mass;
                }
            }
        }
        self.renormalize_kernels();
    }

    /// Taper the first and last half-window of each activation trace with a
    /// raised-cosine ramp.
    pub fn trim_edges(&mut self) {
        let samples = self.samples();
        let n = (self.window() / 2).min(samples / 2);
        if n == 0 {
            return;
        }
        let ramp: Vec<f64> = (0..n)
            .map(|i| 0.5 * (1.0 - (std::f64::consts::PI * i as f64 / n as f64).cos()))
            .collect();
        for k in 0..self.rank() {
            let row = self.activations.row_mut(k);
            for (i, &w) in ramp.iter().enumerate() {
                row[i] *= w;
                row[samples - 1 - i] *= w;
            }
        }
    }

    /// Recompute content hashes for `motifs` (all when `None`).
    pub fn update_hash(&mut self, motifs: Option<&[usize]>) {
        let rank = self.rank();
        let all: Vec<usize>;
        let ids: &[usize] = match motifs {
            Some(ids) if self.hashes.len() == rank => ids,
            _ => {
                all = (0..rank).collect();
                &all
            }
        };
        self.hashes.resize(rank, MotifHash([0; 32]));
        for &k in ids {
            let kernel = self.motif_kernel(k);
            self.hashes[k] = MotifHash::of_kernel(&kernel);
            self.hashed_kernels.set_slice_mid(k, &kernel);
        }
    }

    /// Rehash every motif whose kernel has moved materially since its hash
    /// was taken, i.e. its spatio-temporal similarity to that kernel is
    /// below `rehash_similarity`. Smaller changes keep the hash. Returns
    /// the rehashed motifs.
    pub fn refresh_hashes(&mut self) -> Vec<usize> {
        let threshold = self.config.rehash_similarity;
        let moved: Vec<usize> = (0..self.rank())
            .filter(|&k| {
                let anchor = self.hashed_kernels.slice_mid(k);
                Similarity::spatiotemporal(&anchor, &self.kernels.slice_mid(k)) < threshold
            })
            .collect();
        if !moved.is_empty() {
            self.update_hash(Some(&moved));
        }
        moved
    }

    /// Record each kernel's spatio-temporal similarity to its value at the
    /// previous call. Motifs without history score 0.
    pub fn update_feature_cache(&mut self) {
        let rank = self.rank();
        self.kernel_delta = match &self.previous_kernels {
            Some(prev) => (0..rank)
                .map(|k| Similarity::spatiotemporal(&prev.slice_mid(k), &self.kernels.slice_mid(k)))
                .collect(),
            None => vec![0.0; rank],
        };
        self.previous_kernels = Some(self.kernels.clone());
    }

    // --- Deconvolution ---

    /// Deconvolve every activation trace in place.
    ///
    /// The tapered input is kept as the raw trace, the denoised fit replaces
    /// the activation and the event estimate becomes the spike trace. A
    /// failed fit zeroes that motif's traces and is logged; the remaining
    /// motifs are unaffected. Returns the number of failed motifs.
    pub fn deconvolve(&mut self) -> usize {
        let mut failures = 0;
        for k in 0..self.rank() {
            let trace = self.activations.row(k).to_vec();
            self.raw.row_mut(k).copy_from_slice(&trace);

            let known = if self.config.optimize_decay { None } else { self.decay[k] };
            match self.deconv.deconvolve(&trace, known) {
                Ok(fit) => {
                    self.activations.row_mut(k).copy_from_slice(&fit.denoised);
                    self.spikes.row_mut(k).copy_from_slice(&fit.spikes);
                    self.decay[k] = Some(fit.decay);
                }
                Err(err) => {
                    tracing::warn!(motif = k, error = %err, "deconvolution failed, zeroing traces");
                    self.activations.row_mut(k).iter_mut().for_each(|v| *v = 0.0);
                    self.spikes.row_mut(k).iter_mut().for_each(|v| *v = 0.0);
                    failures += 1;
                }
            }
        }
        failures
    }

    // --- Extraction & snapshots ---

    /// A rank-1 model carrying motif `k`'s kernel, traces, decay and hash.
    pub fn extract_motif(&self, k: usize) -> MotifModel {
        let hash = self.hashes[k];
        let config = ModelConfig {
            rank: 1,
            seed: self.config.seed ^ hash.prefix_u64(),
            ..self.config.clone()
        };
        let [channels, _, window] = self.kernels.dims();
        let mut kernels = Tensor3::zeros(channels, 1, window);
        kernels.set_slice_mid(0, &self.motif_kernel(k));
        let mut hashed_kernels = Tensor3::zeros(channels, 1, window);
        hashed_kernels.set_slice_mid(0, &self.hashed_kernels.slice_mid(k));

        let single_row = |m: &Matrix| Matrix::from_data(1, m.cols(), m.row(k).to_vec());

        MotifModel {
            kernels,
            activations: single_row(&self.activations),
            raw: single_row(&self.raw),
            spikes: single_row(&self.spikes),
            decay: vec![self.decay[k]],
            hashes: vec![hash],
            hashed_kernels,
            previous_kernels: None,
            kernel_delta: vec![0.0],
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            deconv: self.deconv.clone(),
            config,
        }
    }

    /// Overwrite motif `dst` with motif `src` of `other` (kernel and traces).
    /// The content hash is left untouched.
    pub(crate) fn copy_motif_state(&mut self, dst: usize, other: &MotifModel, src: usize) {
        self.kernels.set_slice_mid(dst, &other.motif_kernel(src));
        self.activations.row_mut(dst).copy_from_slice(other.activation(src));
        self.raw.row_mut(dst).copy_from_slice(other.raw_trace(src));
        self.spikes.row_mut(dst).copy_from_slice(other.spike_trace(src));
        self.decay[dst] = other.decay[src];
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            config: self.config.clone(),
            kernels: self.kernels.clone(),
            activations: self.activations.clone(),
            raw: self.raw.clone(),
            spikes: self.spikes.clone(),
            decay: self.decay.clone(),
            hashes: self.hashes.clone(),
        }
    }

    /// Restore from a snapshot. The RNG restarts from the configured seed
    /// and later rehashing is measured against the restored kernels.
    pub fn from_snapshot(snap: ModelSnapshot) -> Result<Self> {
        snap.config.validate()?;
        let c = &snap.config;
        let expected = [c.n_channels, c.rank, c.window];
        if snap.kernels.dims() != expected {
            return Err(MotifError::Configuration(format!(
                "snapshot kernels {:?} do not match config {:?}",
                snap.kernels.dims(),
                expected
            )));
        }
        for (what, m) in [
            ("activations", &snap.activations),
            ("raw", &snap.raw),
            ("spikes", &snap.spikes),
        ] {
            if (m.rows(), m.cols()) != (c.rank, c.n_samples) {
                return Err(MotifError::Configuration(format!(
                    "snapshot {} shape {}x{} does not match config",
                    what,
                    m.rows(),
                    m.cols()
                )));
            }
        }
        if snap.hashes.len() != c.rank || snap.decay.len() != c.rank {
            return Err(MotifError::DimensionMismatch {
                what: "snapshot hashes",
                expected: c.rank,
                got: snap.hashes.len(),
            });
        }
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(c.seed),
            deconv: DeconvolutionStage::new(c.deconv_iterations, c.deconv_penalty_scale),
            kernel_delta: vec![0.0; c.rank],
            previous_kernels: None,
            hashed_kernels: snap.kernels.clone(),
            kernels: snap.kernels,
            activations: snap.activations,
            raw: snap.raw,
            spikes: snap.spikes,
            decay: snap.decay,
            hashes: snap.hashes,
            config: snap.config,
        })
    }
}

/// Circular shift that moves the centre of mass of `profile` onto the
/// window midpoint, or 0 if it is already within half a sample.
/// `None` when the centre of mass is undefined.
pub(crate) fn centering_shift(profile: &[f64]) -> Option<isize> {
    let window = profile.len() as f64;
    let com = circular_center(profile)?;
    let mid = (profile.len() / 2) as f64;
    let half = window / 2.0;
    let offset = (mid - com + half).rem_euclid(window) - half;
    if offset.abs() <= 0.5 + 1e-9 {
        Some(0)
    } else {
        Some(offset.round() as isize)
    }
}

/// Recenter a standalone `[channel][lag]` kernel. Returns it unchanged when
/// the centre of mass is undefined.
pub(crate) fn recenter_kernel(kernel: &Matrix) -> Matrix {
    let profile = Similarity::lag_profile(kernel);
    match centering_shift(&profile) {
        Some(shift) if shift != 0 => {
            let rows: Vec<Vec<f64>> = (0..kernel.rows()).map(|c| roll(kernel.row(c), shift)).collect();
            Matrix::from_rows(&rows)
        }
        _ => kernel.clone(),
    }
}

/// Circular centre of mass of a non-negative profile, in `[0, len)`.
/// `None` when the profile has no mass or no preferred phase.
fn circular_center(profile: &[f64]) -> Option<f64> {
    let n = profile.len() as f64;
    let total: f64 = profile.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    let (mut x, mut y) = (0.0, 0.0);
    for (l, &m) in profile.iter().enumerate() {
        let theta = 2.0 * std::f64::consts::PI * l as f64 / n;
        x += m * theta.cos();
        y += m * theta.sin();
    }
    let resultant = (x * x + y * y).sqrt();
    if !resultant.is_finite() || resultant < 1e-9 * total {
        return None;
    }
    let angle = y.atan2(x);
    Some((angle * n / (2.0 * std::f64::consts::PI)).rem_euclid(n))
}

/// `out[k] = Σ_{j≠k} m[j]` row-wise.
fn off_diagonal_rows(m: &Matrix) -> Matrix {
    let mut totals = vec![0.0; m.cols()];
    for r in 0..m.rows() {
        for (t, v) in m.row(r).iter().enumerate() {
            totals[t] += v;
        }
    }
    let mut out = Matrix::zeros(m.rows(), m.cols());
    for r in 0..m.rows() {
        let src = m.row(r).to_vec();
        for (t, o) in out.row_mut(r).iter_mut().enumerate() {
            *o = totals[t] - src[t];
        }
    }
    out
}

/// `Σ_{k≠j} Σ_t a[k][t] · b[j][t]`.
fn cross_motif_overlap(a: &Matrix, b: &Matrix) -> f64 {
    let others = off_diagonal_rows(b);
    a.data().iter().zip(others.data()).map(|(x, y)| x * y).sum()
}

fn add_scaled(dst: &mut Matrix, src: &Matrix, scale: f64) {
    for (d, s) in dst.data_mut().iter_mut().zip(src.data()) {
        *d += scale * s;
    }
}
