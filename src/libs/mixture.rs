//! Two-component mixture regression fitted by Expectation-Maximization.
//!
//! All three variants model log2 intensity `y` against the sequence design
//! matrix `X` as a mixture of a "background" component, explained by sequence
//! composition alone, and a "signal" component:
//!
//! * [`fit_mix`] - two Gaussians with a single variance each
//! * [`fit_uniform_mix`] - Gaussian background plus a uniform signal band
//! * [`fit_binned_mix`] - two Gaussians with per-bin variances, where bins
//!   follow the fitted background level (the production model)
//!
//! Model state is an explicit value passed through each iteration, so a single
//! EM step can be exercised in isolation.

use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector};

pub const DEFAULT_SPLIT: f64 = 0.5;
pub const DEFAULT_TOL: f64 = 0.01;
pub const DEFAULT_BINS: usize = 25;
pub const DEFAULT_MAX_ITERS: usize = 1000;

/// Which of the three mixture variants to fit.
///
/// An explicit enum rather than a function name looked up at runtime; parsed
/// once when arguments are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    Mix,
    UniformMix,
    BinnedMix,
}

impl std::str::FromStr for FitMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mix" => Ok(Self::Mix),
            "umix" => Ok(Self::UniformMix),
            "vmix" | "binned" => Ok(Self::BinnedMix),
            _ => Err(anyhow!("Unknown fit mode: {} (expected mix, umix or vmix)", s)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitOpts {
    /// Quantile of y at which initial responsibilities are split
    pub split: f64,
    /// Relative-change convergence tolerance over the full parameter vector
    pub tol: f64,
    /// Variance bins, used by the binned variant only
    pub bins: usize,
    /// Hard iteration cap; reaching it returns the current state as-is
    pub max_iters: usize,
}

impl Default for FitOpts {
    fn default() -> Self {
        Self {
            split: DEFAULT_SPLIT,
            tol: DEFAULT_TOL,
            bins: DEFAULT_BINS,
            max_iters: DEFAULT_MAX_ITERS,
        }
    }
}

//----------------------------
// Shared numeric primitives
//----------------------------

/// Gaussian density at `y` for mean `m` and variance `s2`
pub fn dnorm(y: f64, m: f64, s2: f64) -> f64 {
    (2.0 * std::f64::consts::PI * s2).sqrt().recip() * (-(y - m).powi(2) / (2.0 * s2)).exp()
}

/// Weighted least squares via the normal equations.
///
/// Rows are scaled by the square root of their weight and the cross-product
/// system is solved by Cholesky decomposition. A weighted cross-product
/// matrix that is not positive definite (collinear design columns, all-zero
/// weights) is a data-quality problem and fails the fit.
pub fn wls(y: &DVector<f64>, x: &DMatrix<f64>, w: &[f64]) -> Result<DVector<f64>> {
    let mut xw = x.clone();
    let mut yw = y.clone();
    for (i, &wi) in w.iter().enumerate() {
        let sq = wi.sqrt();
        for j in 0..xw.ncols() {
            xw[(i, j)] *= sq;
        }
        yw[i] *= sq;
    }

    let xtx = xw.transpose() * &xw;
    let xty = xw.transpose() * yw;

    let chol = xtx
        .cholesky()
        .ok_or_else(|| anyhow!("Singular weighted cross-product matrix in least squares"))?;

    Ok(chol.solve(&xty))
}

/// Weighted mean squared residual of `y - X b`
pub fn weighted_sigma(y: &DVector<f64>, x: &DMatrix<f64>, b: &DVector<f64>, w: &[f64]) -> f64 {
    let resid = y - x * b;
    let num: f64 = resid.iter().zip(w).map(|(r, &wi)| wi * r * r).sum();
    let den: f64 = w.iter().sum();
    num / den
}

/// Quantile cut points: the i/bins empirical quantiles for i in 1..bins
pub fn quantile_cuts(values: &[f64], bins: usize) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();

    (1..bins).map(|i| sorted[n * i / bins]).collect()
}

/// Bin index of `v`: the number of cut points strictly below it
pub fn bin_index(v: f64, cuts: &[f64]) -> usize {
    cuts.iter().filter(|&&q| v > q).count()
}

pub fn assign_bins(values: &[f64], cuts: &[f64]) -> Vec<usize> {
    values.iter().map(|&v| bin_index(v, cuts)).collect()
}

// Initial background responsibilities: 1 for probes at or below the
// p-quantile of y, 0 above it
fn quantile_split(y: &DVector<f64>, p: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = y.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let quan = sorted[((p * sorted.len() as f64) as usize).saturating_sub(1)];

    y.iter().map(|&v| if v <= quan { 1.0 } else { 0.0 }).collect()
}

fn mixing_props(gam0: &[f64]) -> [f64; 2] {
    let p0 = gam0.iter().sum::<f64>() / gam0.len() as f64;
    [p0, 1.0 - p0]
}

fn complement(gam0: &[f64]) -> Vec<f64> {
    gam0.iter().map(|&g| 1.0 - g).collect()
}

// Largest relative parameter change; entries where the ratio is undefined
// (old parameter exactly zero on both sides) drop out of the maximum
fn rel_change(new: &[f64], old: &[f64]) -> f64 {
    new.iter()
        .zip(old)
        .map(|(n, o)| (n - o).abs() / o)
        .fold(f64::NEG_INFINITY, f64::max)
}

//----------------------------
// Mode A: constant-variance two-Gaussian
//----------------------------

#[derive(Debug, Clone)]
pub struct MixState {
    pub props: [f64; 2],
    pub beta_bg: DVector<f64>,
    pub beta_sig: DVector<f64>,
    pub var_bg: f64,
    pub var_sig: f64,
}

impl MixState {
    /// Background responsibilities under the current parameters
    pub fn responsibilities(&self, y: &DVector<f64>, x: &DMatrix<f64>) -> Vec<f64> {
        let m0 = x * &self.beta_bg;
        let m1 = x * &self.beta_sig;

        y.iter()
            .enumerate()
            .map(|(i, &yi)| {
                let l0 = self.props[0] * dnorm(yi, m0[i], self.var_bg);
                let l1 = self.props[1] * dnorm(yi, m1[i], self.var_sig);
                l0 / (l0 + l1)
            })
            .collect()
    }

    fn theta(&self) -> Vec<f64> {
        let mut theta = self.props.to_vec();
        theta.extend(self.beta_bg.iter());
        theta.push(self.var_bg);
        theta.extend(self.beta_sig.iter());
        theta.push(self.var_sig);
        theta
    }
}

fn mix_m_step(y: &DVector<f64>, x: &DMatrix<f64>, gam0: &[f64]) -> Result<MixState> {
    let gam1 = complement(gam0);

    let beta_bg = wls(y, x, gam0)?;
    let beta_sig = wls(y, x, &gam1)?;
    let var_bg = weighted_sigma(y, x, &beta_bg, gam0);
    let var_sig = weighted_sigma(y, x, &beta_sig, &gam1);

    Ok(MixState {
        props: mixing_props(gam0),
        beta_bg,
        beta_sig,
        var_bg,
        var_sig,
    })
}

pub fn fit_mix(y: &DVector<f64>, x: &DMatrix<f64>, opts: &FitOpts) -> Result<MixState> {
    let gam0 = quantile_split(y, opts.split);
    let mut state = mix_m_step(y, x, &gam0)?;
    let mut theta = state.theta();

    for _ in 0..opts.max_iters {
        let gam0 = state.responsibilities(y, x);
        state = mix_m_step(y, x, &gam0)?;

        let next = state.theta();
        let c = rel_change(&next, &theta);
        theta = next;
        if c <= opts.tol {
            break;
        }
    }

    Ok(state)
}

//----------------------------
// Mode B: Gaussian background + uniform signal
//----------------------------

#[derive(Debug, Clone)]
pub struct UniformMixState {
    pub props: [f64; 2],
    pub beta: DVector<f64>,
    pub var: f64,
    /// Maximum residual above the background fit; the signal band height is
    /// 1/Z. Deliberately not normalized over the interval actually covered;
    /// the legacy approximation is preserved.
    pub z: f64,
}

impl UniformMixState {
    pub fn responsibilities(&self, y: &DVector<f64>, x: &DMatrix<f64>) -> Vec<f64> {
        let m = x * &self.beta;

        y.iter()
            .enumerate()
            .map(|(i, &yi)| {
                let l0 = self.props[0] * dnorm(yi, m[i], self.var);
                let l1 = if yi > m[i] { self.props[1] / self.z } else { 0.0 };
                l0 / (l0 + l1)
            })
            .collect()
    }

    fn theta(&self) -> Vec<f64> {
        let mut theta = self.props.to_vec();
        theta.extend(self.beta.iter());
        theta.push(self.var);
        theta.push(self.z);
        theta
    }
}

fn uniform_m_step(y: &DVector<f64>, x: &DMatrix<f64>, gam0: &[f64]) -> Result<UniformMixState> {
    let beta = wls(y, x, gam0)?;
    let var = weighted_sigma(y, x, &beta, gam0);
    let z = (y - x * &beta).max();

    Ok(UniformMixState {
        props: mixing_props(gam0),
        beta,
        var,
        z,
    })
}

pub fn fit_uniform_mix(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    opts: &FitOpts,
) -> Result<UniformMixState> {
    let gam0 = quantile_split(y, opts.split);
    let mut state = uniform_m_step(y, x, &gam0)?;
    let mut theta = state.theta();

    for _ in 0..opts.max_iters {
        let gam0 = state.responsibilities(y, x);
        state = uniform_m_step(y, x, &gam0)?;

        let next = state.theta();
        let c = rel_change(&next, &theta);
        theta = next;
        if c <= opts.tol {
            break;
        }
    }

    Ok(state)
}

//----------------------------
// Mode C: binned-variance two-Gaussian
//----------------------------

#[derive(Debug, Clone)]
pub struct BinnedMixState {
    pub props: [f64; 2],
    pub beta_bg: DVector<f64>,
    pub beta_sig: DVector<f64>,
    /// Per-bin variances, one entry per bin for each component
    pub var_bg: Vec<f64>,
    pub var_sig: Vec<f64>,
    /// Quantile cut points the current bin assignment was derived from
    pub cuts: Vec<f64>,
}

impl BinnedMixState {
    pub fn bins(&self) -> usize {
        self.var_bg.len()
    }

    /// Background responsibilities, each probe evaluated under its own bin's
    /// component variances
    pub fn responsibilities(
        &self,
        y: &DVector<f64>,
        x: &DMatrix<f64>,
        bin: &[usize],
    ) -> Vec<f64> {
        let m0 = x * &self.beta_bg;
        let m1 = x * &self.beta_sig;

        y.iter()
            .enumerate()
            .map(|(i, &yi)| {
                let l0 = self.props[0] * dnorm(yi, m0[i], self.var_bg[bin[i]]);
                let l1 = self.props[1] * dnorm(yi, m1[i], self.var_sig[bin[i]]);
                l0 / (l0 + l1)
            })
            .collect()
    }

    fn theta(&self) -> Vec<f64> {
        let mut theta = self.props.to_vec();
        theta.extend(self.beta_bg.iter());
        theta.extend(self.var_bg.iter());
        theta.extend(self.beta_sig.iter());
        theta.extend(self.var_sig.iter());
        theta
    }
}

// Inverse-variance weighting: each row's weight is its responsibility over
// its bin's variance
fn binned_wls(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    gam: &[f64],
    vars: &[f64],
    bin: &[usize],
) -> Result<DVector<f64>> {
    let w: Vec<f64> = gam
        .iter()
        .zip(bin)
        .map(|(&g, &b)| g / vars[b])
        .collect();

    wls(y, x, &w)
}

// Per-bin weighted mean squared residual. Every responsibility gets +0.01 so
// that a bin holding only near-zero-responsibility probes keeps a positive
// weight sum; a bin with no members at all keeps variance 1.
fn binned_sigma(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    b: &DVector<f64>,
    gam: &[f64],
    bin: &[usize],
    bins: usize,
) -> Vec<f64> {
    let resid = y - x * b;
    let mut num = vec![0.0; bins];
    let mut den = vec![0.0; bins];

    for (i, &bi) in bin.iter().enumerate() {
        let g = gam[i] + 0.01;
        num[bi] += g * resid[i] * resid[i];
        den[bi] += g;
    }

    num.iter()
        .zip(&den)
        .map(|(&n, &d)| if d > 0.0 { n / d } else { 1.0 })
        .collect()
}

pub fn fit_binned_mix(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    opts: &FitOpts,
) -> Result<BinnedMixState> {
    if opts.bins == 0 {
        return Err(anyhow!("Bin count must be at least 1"));
    }

    let yv: Vec<f64> = y.iter().copied().collect();
    let cuts = quantile_cuts(&yv, opts.bins);
    let mut bin = assign_bins(&yv, &cuts);

    // Starting values: hard split at the quantile, unweighted-variance fits
    let gam0 = quantile_split(y, opts.split);
    let gam1 = complement(&gam0);
    let beta_bg = wls(y, x, &gam0)?;
    let beta_sig = wls(y, x, &gam1)?;

    let mut state = BinnedMixState {
        props: mixing_props(&gam0),
        var_bg: binned_sigma(y, x, &beta_bg, &gam0, &bin, opts.bins),
        var_sig: binned_sigma(y, x, &beta_sig, &gam1, &bin, opts.bins),
        beta_bg,
        beta_sig,
        cuts,
    };
    let mut theta = state.theta();

    for _ in 0..opts.max_iters {
        // E-step
        let gam0 = state.responsibilities(y, x, &bin);
        let gam1 = complement(&gam0);

        // M-step: refit the background, then rebin on its predictions before
        // refitting the signal component and both variance sets
        let props = mixing_props(&gam0);
        let beta_bg = binned_wls(y, x, &gam0, &state.var_bg, &bin)?;

        let pred: Vec<f64> = (x * &beta_bg).iter().copied().collect();
        let cuts = quantile_cuts(&pred, opts.bins);
        bin = assign_bins(&pred, &cuts);

        let beta_sig = binned_wls(y, x, &gam1, &state.var_sig, &bin)?;

        state = BinnedMixState {
            props,
            var_bg: binned_sigma(y, x, &beta_bg, &gam0, &bin, opts.bins),
            var_sig: binned_sigma(y, x, &beta_sig, &gam1, &bin, opts.bins),
            beta_bg,
            beta_sig,
            cuts,
        };

        let next = state.theta();
        let c = rel_change(&next, &theta);
        theta = next;
        if c <= opts.tol {
            break;
        }
    }

    Ok(state)
}

/// Fit the requested variant and return the background coefficients, the
/// terminal output shared by all three modes.
pub fn fit(
    mode: FitMode,
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    opts: &FitOpts,
) -> Result<DVector<f64>> {
    match mode {
        FitMode::Mix => Ok(fit_mix(y, x, opts)?.beta_bg),
        FitMode::UniformMix => Ok(fit_uniform_mix(y, x, opts)?.beta),
        FitMode::BinnedMix => Ok(fit_binned_mix(y, x, opts)?.beta_bg),
    }
}
