use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Magic number of version-4 CEL files
pub const CEL_MAGIC: i32 = 64;

/// Fixed header block of a version-4 CEL scan file.
///
/// All integers are 4-byte little-endian; the three text blocks are
/// length-prefixed. `cells` always equals `rows * columns` in a well-formed
/// file.
#[derive(Debug, Clone)]
pub struct CelHeader {
    pub version: i32,
    pub columns: i32,
    pub rows: i32,
    pub cells: i32,
    pub header: String,
    pub algorithm: String,
    pub parameters: String,
    pub cell_margin: i32,
    pub outlier_cells: u32,
    pub masked_cells: u32,
    pub subgrids: i32,
}

#[derive(Debug)]
pub struct CelFile<R> {
    reader: R,
    pub header: CelHeader,
}

impl CelFile<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Self::new(reader)
    }
}

impl<R: Read> CelFile<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let magic = read_i32(&mut reader)?;
        if magic != CEL_MAGIC {
            return Err(anyhow!("Not a valid CEL file (magic: {})", magic));
        }

        // Version is informational; files in the wild always carry 4
        let version = read_i32(&mut reader)?;

        let columns = read_i32(&mut reader)?;
        let rows = read_i32(&mut reader)?;
        let cells = read_i32(&mut reader)?;
        if columns < 0 || rows < 0 {
            return Err(anyhow!("Negative grid dimensions: {}x{}", rows, columns));
        }
        if cells != rows.checked_mul(columns).unwrap_or(-1) {
            return Err(anyhow!(
                "Cell count mismatch: header says {}, grid is {}x{}",
                cells,
                rows,
                columns
            ));
        }

        let header = read_text_block(&mut reader)?;
        let algorithm = read_text_block(&mut reader)?;
        let parameters = read_text_block(&mut reader)?;

        let cell_margin = read_i32(&mut reader)?;
        let outlier_cells = read_u32(&mut reader)?;
        let masked_cells = read_u32(&mut reader)?;
        let subgrids = read_i32(&mut reader)?;

        Ok(Self {
            reader,
            header: CelHeader {
                version,
                columns,
                rows,
                cells,
                header,
                algorithm,
                parameters,
                cell_margin,
                outlier_cells,
                masked_cells,
                subgrids,
            },
        })
    }

    /// Read the cell grid and resolve coordinates to probe IDs.
    ///
    /// Cell records are stored in column-major order: the outer loop runs
    /// over columns, the inner one over rows. Each record is
    /// (intensity: f32, stddev: f32, pixel count: i16); only the intensity is
    /// kept, truncated toward zero as the legacy pipeline did. Coordinates
    /// absent from `coord` have no logical probe and are skipped silently.
    pub fn read_intensities(
        mut self,
        coord: &HashMap<(i32, i32), String>,
    ) -> Result<HashMap<String, i32>> {
        let mut entry = HashMap::new();

        for c in 0..self.header.columns {
            for r in 0..self.header.rows {
                let intensity = read_f32(&mut self.reader)?;
                let _stddev = read_f32(&mut self.reader)?;
                let _pixels = read_i16(&mut self.reader)?;

                if let Some(probe_id) = coord.get(&(r, c)) {
                    entry.insert(probe_id.clone(), intensity as i32);
                }
            }
        }

        Ok(entry)
    }
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_i16<R: Read>(reader: &mut R) -> Result<i16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(i16::from_le_bytes(buf))
}

fn read_text_block<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_i32(&mut *reader)?;
    if len < 0 {
        return Err(anyhow!("Negative text block length: {}", len));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn push_text(data: &mut Vec<u8>, text: &str) {
        data.extend_from_slice(&(text.len() as i32).to_le_bytes());
        data.extend_from_slice(text.as_bytes());
    }

    // 2 columns x 2 rows, intensities laid out column-major
    fn create_cel_data(intensities: [f32; 4]) -> Vec<u8> {
        let mut data = Vec::new();

        data.extend_from_slice(&CEL_MAGIC.to_le_bytes());
        data.extend_from_slice(&4i32.to_le_bytes()); // version
        data.extend_from_slice(&2i32.to_le_bytes()); // columns
        data.extend_from_slice(&2i32.to_le_bytes()); // rows
        data.extend_from_slice(&4i32.to_le_bytes()); // cells

        push_text(&mut data, "[CEL]");
        push_text(&mut data, "Percentile");
        push_text(&mut data, "Percentile:75");

        data.extend_from_slice(&1i32.to_le_bytes()); // cell margin
        data.extend_from_slice(&0u32.to_le_bytes()); // outlier cells
        data.extend_from_slice(&0u32.to_le_bytes()); // masked cells
        data.extend_from_slice(&0i32.to_le_bytes()); // subgrids

        for v in intensities {
            data.extend_from_slice(&v.to_le_bytes());
            data.extend_from_slice(&10.5f32.to_le_bytes()); // stddev
            data.extend_from_slice(&9i16.to_le_bytes()); // pixel count
        }

        data
    }

    #[test]
    fn test_read_header() -> Result<()> {
        let data = create_cel_data([100.0, 200.0, 300.0, 400.0]);
        let cel = CelFile::new(Cursor::new(data))?;

        assert_eq!(cel.header.version, 4);
        assert_eq!(cel.header.columns, 2);
        assert_eq!(cel.header.rows, 2);
        assert_eq!(cel.header.cells, 4);
        assert_eq!(cel.header.algorithm, "Percentile");
        assert_eq!(cel.header.parameters, "Percentile:75");

        Ok(())
    }

    #[test]
    fn test_read_intensities_truncates() -> Result<()> {
        // Column-major: (r0,c0), (r1,c0), (r0,c1), (r1,c1)
        let data = create_cel_data([123.9, 7.2, 55.5, 0.8]);
        let cel = CelFile::new(Cursor::new(data))?;

        let mut coord = HashMap::new();
        coord.insert((0, 0), "p1".to_string());
        coord.insert((1, 0), "p2".to_string());
        coord.insert((0, 1), "p3".to_string());
        coord.insert((1, 1), "p4".to_string());

        let entry = cel.read_intensities(&coord)?;
        assert_eq!(entry["p1"], 123);
        assert_eq!(entry["p2"], 7);
        assert_eq!(entry["p3"], 55);
        assert_eq!(entry["p4"], 0);

        Ok(())
    }

    #[test]
    fn test_unmapped_cells_skipped() -> Result<()> {
        let data = create_cel_data([100.0, 200.0, 300.0, 400.0]);
        let cel = CelFile::new(Cursor::new(data))?;

        let mut coord = HashMap::new();
        coord.insert((1, 1), "only".to_string());

        let entry = cel.read_intensities(&coord)?;
        assert_eq!(entry.len(), 1);
        assert_eq!(entry["only"], 400);

        Ok(())
    }

    #[test]
    fn test_bad_magic() {
        let mut data = create_cel_data([1.0, 2.0, 3.0, 4.0]);
        data[0] = 65;

        let res = CelFile::new(Cursor::new(data));
        assert!(res.is_err());
        assert!(res.unwrap_err().to_string().contains("magic"));
    }

    #[test]
    fn test_cell_count_mismatch() {
        let mut data = create_cel_data([1.0, 2.0, 3.0, 4.0]);
        // cells field sits after magic, version, columns, rows
        data[16..20].copy_from_slice(&5i32.to_le_bytes());

        let res = CelFile::new(Cursor::new(data));
        assert!(res.is_err());
        assert!(res.unwrap_err().to_string().contains("mismatch"));
    }

    #[test]
    fn test_truncated_file() -> Result<()> {
        let mut data = create_cel_data([1.0, 2.0, 3.0, 4.0]);
        data.truncate(data.len() - 12);
        let cel = CelFile::new(Cursor::new(data))?;

        let mut coord = HashMap::new();
        coord.insert((0, 0), "p1".to_string());

        assert!(cel.read_intensities(&coord).is_err());

        Ok(())
    }
}
