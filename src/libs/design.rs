use anyhow::{anyhow, Result};
use nalgebra::DMatrix;

/// Probe length on the arrays this pipeline supports
pub const PROBE_LEN: usize = 25;

/// 1 T-count + 3x25 positional indicators (A, C, G) + 4 squared base counts
pub const FEATURE_COLS: usize = 1 + 3 * PROBE_LEN + 4;

// A=0, C=1, G=2, T=3; lower-case sequences occur in some annotation dumps
fn base_code(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Encode one probe sequence into its 80-column feature row.
///
/// Column 0 is the whole-sequence T count. Columns 1..=75 are 0/1 indicators
/// for bases A, C and G at each of the 25 positions, one 25-wide block per
/// base; T carries no block of its own. Columns 76..=79 are the squared
/// whole-sequence counts of A, C, G and T.
///
/// Ambiguity codes (N, R, Y, ...) are rejected; the model has no affinity
/// estimate for them.
pub fn encode(seq: &str) -> Result<[f64; FEATURE_COLS]> {
    let bytes = seq.as_bytes();
    if bytes.len() != PROBE_LEN {
        return Err(anyhow!(
            "Probe sequence must be {} bases, got {}: {}",
            PROBE_LEN,
            bytes.len(),
            seq
        ));
    }

    let mut row = [0.0; FEATURE_COLS];
    let mut counts = [0usize; 4];

    for (pos, &base) in bytes.iter().enumerate() {
        let code = base_code(base)
            .ok_or_else(|| anyhow!("Invalid base {:?} at position {} in {}", base as char, pos, seq))?;
        counts[code] += 1;
        if code < 3 {
            row[1 + code * PROBE_LEN + pos] = 1.0;
        }
    }

    row[0] = counts[3] as f64;
    for (i, &count) in counts.iter().enumerate() {
        row[1 + 3 * PROBE_LEN + i] = (count * count) as f64;
    }

    Ok(row)
}

/// Build the design matrix for an ordered set of probe sequences, one feature
/// row per probe in the given order.
pub fn design_matrix<S: AsRef<str>>(seqs: &[S]) -> Result<DMatrix<f64>> {
    let mut data = Vec::with_capacity(seqs.len() * FEATURE_COLS);
    for seq in seqs {
        data.extend_from_slice(&encode(seq.as_ref())?);
    }

    Ok(DMatrix::from_row_slice(seqs.len(), FEATURE_COLS, &data))
}
