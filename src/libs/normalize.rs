//! Probe-level normalization: fit the binned mixture model on a bounded
//! probe subset, then score every probe against the fitted background.

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use std::collections::{HashMap, HashSet};

use crate::libs::design;
use crate::libs::mixture::{self, FitOpts};

/// Upper bound on probes used for model fitting
pub const DEFAULT_SAMPLE_CAP: usize = 50_000;

/// Probes per group when computing group-local residual deviations
pub const DEFAULT_GROUP_SIZE: usize = 5_000;

#[derive(Debug, Clone, Copy)]
pub struct NormOpts {
    pub sample_cap: usize,
    pub group_size: usize,
    pub fit: FitOpts,
}

impl Default for NormOpts {
    fn default() -> Self {
        Self {
            sample_cap: DEFAULT_SAMPLE_CAP,
            group_size: DEFAULT_GROUP_SIZE,
            fit: FitOpts::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizationResult {
    pub probe_id: String,
    /// Background residual over the group-local standard deviation
    pub normalized: f64,
    /// Posterior probability that the probe carries true signal
    pub posterior: f64,
}

/// Approximately even subsample of `0..total`, capped at `cap` probes.
///
/// Starts at index 1 with stride total/cap, matching the legacy sampler.
pub fn sample_indices(total: usize, cap: usize) -> Vec<usize> {
    let interval = (total / cap.max(1)).max(1);
    (1..total).step_by(interval).collect()
}

/// Normalize every probe in `probe_seq` against its sequence-predicted
/// background.
///
/// `model_probes`, when given, restricts the fitting subset (after the
/// default subsampling) to the listed probe IDs. Results come back in
/// `probe_seq` iteration order.
pub fn normalize(
    intensities: &HashMap<String, i32>,
    probe_seq: &IndexMap<String, String>,
    model_probes: Option<&HashSet<String>>,
    opts: &NormOpts,
) -> Result<Vec<NormalizationResult>> {
    let ids: Vec<&String> = probe_seq.keys().collect();
    let seqs: Vec<&String> = probe_seq.values().collect();
    let n = ids.len();
    if n == 0 {
        bail!("No probes to normalize");
    }
    if opts.group_size == 0 {
        bail!("Group size must be at least 1");
    }

    let x = design::design_matrix(&seqs)?;

    let mut yv = Vec::with_capacity(n);
    for id in &ids {
        let raw = *intensities
            .get(id.as_str())
            .ok_or_else(|| anyhow!("No intensity for probe {}", id))?;
        if raw <= 0 {
            bail!("Non-positive intensity {} for probe {}", raw, id);
        }
        yv.push((raw as f64).log2());
    }
    let y = DVector::from_vec(yv);

    // Fitting subset: even subsample, optionally restricted to the
    // model-probe allow-list; kept in ascending index order
    let mut indices = sample_indices(n, opts.sample_cap);
    if let Some(allowed) = model_probes {
        indices.retain(|&i| allowed.contains(ids[i].as_str()));
    }
    if indices.is_empty() {
        bail!("No probes selected for model fitting");
    }

    let ys = DVector::from_iterator(indices.len(), indices.iter().map(|&i| y[i]));
    let xs = DMatrix::from_fn(indices.len(), x.ncols(), |r, c| x[(indices[r], c)]);

    let model = mixture::fit_binned_mix(&ys, &xs, &opts.fit)?;

    // Background prediction for the full population
    let pred = &x * &model.beta_bg;

    // Group-local residual deviation over probes ranked by prediction; every
    // probe lands in a group, the last one may run short
    let order: Vec<usize> = (0..n).sorted_by(|&a, &b| pred[a].total_cmp(&pred[b])).collect();
    let mut normalized = vec![0.0; n];
    for group in order.chunks(opts.group_size) {
        let ss: f64 = group.iter().map(|&i| (y[i] - pred[i]).powi(2)).sum();
        let sd = (ss / group.len() as f64).sqrt();
        for &i in group {
            normalized[i] = (y[i] - pred[i]) / sd;
        }
    }

    // Posterior signal probabilities from the final model state, with bins
    // recut on the full population's predicted values
    let predv: Vec<f64> = pred.iter().copied().collect();
    let cuts = mixture::quantile_cuts(&predv, model.bins());
    let bin = mixture::assign_bins(&predv, &cuts);
    let gam0 = model.responsibilities(&y, &x, &bin);

    Ok(ids
        .iter()
        .enumerate()
        .map(|(i, id)| NormalizationResult {
            probe_id: (*id).clone(),
            normalized: normalized[i],
            posterior: 1.0 - gam0[i],
        })
        .collect())
}
