//! Probe annotation collaborators: the tab-delimited metadata table mapping
//! probes to sequences and grid coordinates, and the optional model-probe
//! allow-list.

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::str::FromStr;

/// Which columns of the metadata table hold probe ID, x, y and sequence.
/// Array designs disagree on layout, so the indices are configuration.
#[derive(Debug, Clone, Copy)]
pub struct ColSpec {
    pub id: usize,
    pub x: usize,
    pub y: usize,
    pub seq: usize,
}

impl FromStr for ColSpec {
    type Err = anyhow::Error;

    // "0/1/2/3" style, same convention as the legacy pipeline scripts
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<usize> = s
            .split('/')
            .map(|f| f.parse().map_err(|_| anyhow!("Invalid column index: {}", f)))
            .collect::<Result<_>>()?;
        if parts.len() != 4 {
            bail!("Column spec needs 4 indices (id/x/y/seq), got {}", s);
        }

        Ok(Self {
            id: parts[0],
            x: parts[1],
            y: parts[2],
            seq: parts[3],
        })
    }
}

#[derive(Debug, Default)]
pub struct ProbeMeta {
    /// probe ID -> sequence, in file order
    pub seq_of: IndexMap<String, String>,
    /// (x, y) grid coordinate -> probe ID
    pub coord_of: HashMap<(i32, i32), String>,
}

/// Read the probe metadata table (tab-delimited, one header row).
pub fn read_probe_meta(infile: &str, cols: &ColSpec) -> Result<ProbeMeta> {
    let reader = crate::libs::io::reader(infile);
    let mut meta = ProbeMeta::default();

    for (i, line) in reader.lines().skip(1).enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.trim_end().split('\t').collect();

        let field = |idx: usize| -> Result<&str> {
            fields
                .get(idx)
                .copied()
                .ok_or_else(|| anyhow!("Line {}: no column {}: {}", i + 2, idx, line))
        };

        let probe_id = field(cols.id)?.to_string();
        let x: i32 = field(cols.x)?
            .parse()
            .map_err(|_| anyhow!("Line {}: bad x coordinate: {}", i + 2, line))?;
        let y: i32 = field(cols.y)?
            .parse()
            .map_err(|_| anyhow!("Line {}: bad y coordinate: {}", i + 2, line))?;
        let seq = field(cols.seq)?.to_string();

        meta.coord_of.insert((x, y), probe_id.clone());
        meta.seq_of.insert(probe_id, seq);
    }

    Ok(meta)
}

/// Read a newline-delimited probe ID list.
pub fn read_probe_list(infile: &str) -> Result<HashSet<String>> {
    let reader = crate::libs::io::reader(infile);
    let mut probes = HashSet::new();

    for line in reader.lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            probes.insert(id.to_string());
        }
    }

    Ok(probes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_col_spec() -> Result<()> {
        let cols: ColSpec = "0/2/3/4".parse()?;
        assert_eq!(cols.id, 0);
        assert_eq!(cols.x, 2);
        assert_eq!(cols.y, 3);
        assert_eq!(cols.seq, 4);

        assert!("0/1/2".parse::<ColSpec>().is_err());
        assert!("0/one/2/3".parse::<ColSpec>().is_err());

        Ok(())
    }

    #[test]
    fn test_read_probe_meta() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "probe\tx\ty\tseq")?;
        writeln!(file, "p1\t0\t0\tACGTACGTACGTACGTACGTACGTA")?;
        writeln!(file, "p2\t1\t0\tGGGGGCCCCCAAAAATTTTTGCGCG")?;
        file.flush()?;

        let cols: ColSpec = "0/1/2/3".parse()?;
        let meta = read_probe_meta(file.path().to_str().unwrap(), &cols)?;

        assert_eq!(meta.seq_of.len(), 2);
        assert_eq!(meta.seq_of["p1"], "ACGTACGTACGTACGTACGTACGTA");
        assert_eq!(meta.coord_of[&(1, 0)], "p2");

        // insertion order preserved
        let ids: Vec<&String> = meta.seq_of.keys().collect();
        assert_eq!(ids, ["p1", "p2"]);

        Ok(())
    }

    #[test]
    fn test_read_probe_list() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "p1\np3\n\np2")?;
        file.flush()?;

        let probes = read_probe_list(file.path().to_str().unwrap())?;
        assert_eq!(probes.len(), 3);
        assert!(probes.contains("p3"));

        Ok(())
    }
}
