//! On-disk layout of a dataset: one grid file per snapshot plus the parameter table.
//!
//! Every grid write lands in a temporary sibling first and is renamed into place, so a
//! snapshot file is either absent or complete. Completeness checks can then count files.

use anyhow::{Context, Result};
use dataset_common::{DatasetError, Grid, ParameterTable, SnapshotFormat, SnapshotKey, PARAMETER_TABLE_FILE};
use log::{debug, trace};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use zerocopy::{FromBytes, IntoBytes};

/// Serializes a grid in the requested format.
pub fn encode_grid(format: SnapshotFormat, grid: &Grid) -> Result<Vec<u8>> {
    let bytes = match format {
        SnapshotFormat::Raw => {
            let header = [grid.rows() as u64, grid.cols() as u64];
            let mut bytes = Vec::with_capacity(16 + grid.len() * 8);
            bytes.extend_from_slice(header.as_bytes());
            bytes.extend_from_slice(grid.as_slice().as_bytes());
            bytes
        }
        SnapshotFormat::Bincode => bincode::serialize(grid).context("Error serializing grid to bincode")?,
        SnapshotFormat::MessagePack => rmp_serde::to_vec(grid).context("Error serializing grid to MessagePack")?,
        SnapshotFormat::Json => serde_json::to_vec(grid).context("Error serializing grid to JSON")?,
    };
    Ok(bytes)
}

/// Inverse of [`encode_grid`]. `origin` only labels errors.
pub fn decode_grid(format: SnapshotFormat, bytes: &[u8], origin: &Path) -> Result<Grid> {
    let corrupt = |message: String| DatasetError::CorruptSnapshot {
        path: origin.display().to_string(),
        message,
    };
    let grid = match format {
        SnapshotFormat::Raw => {
            let (header, rest) = <[u64; 2]>::read_from_prefix(bytes)
                .map_err(|_| corrupt("truncated shape header".into()))?;
            let (rows, cols) = (header[0] as usize, header[1] as usize);
            let len = rows
                .checked_mul(cols)
                .ok_or_else(|| corrupt(format!("shape {}x{} overflows", rows, cols)))?;
            let byte_len = len
                .checked_mul(std::mem::size_of::<f64>())
                .ok_or_else(|| corrupt(format!("shape {}x{} overflows", rows, cols)))?;
            if rest.len() != byte_len {
                return Err(corrupt(format!(
                    "expected {} data bytes for {}x{}, found {}",
                    byte_len,
                    rows,
                    cols,
                    rest.len()
                ))
                .into());
            }
            let mut data = vec![0.0f64; len];
            data.as_mut_bytes().copy_from_slice(rest);
            Grid::new(rows, cols, data)?
        }
        SnapshotFormat::Bincode => bincode::deserialize(bytes).map_err(|e| corrupt(e.to_string()))?,
        SnapshotFormat::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?,
        SnapshotFormat::Json => serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?,
    };
    Ok(grid)
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `grid` to `path` through a temporary file and a rename, overwriting any previous file.
pub fn write_grid(path: &Path, format: SnapshotFormat, grid: &Grid) -> Result<()> {
    let bytes = encode_grid(format, grid)?;
    let tmp = temporary_path(path);
    fs::write(&tmp, &bytes).with_context(|| format!("Error writing '{}'", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Error moving '{}' into place", path.display()))?;
    trace!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

pub fn read_grid(path: &Path, format: SnapshotFormat) -> Result<Grid> {
    let bytes = fs::read(path).with_context(|| format!("Error reading '{}'", path.display()))?;
    decode_grid(format, &bytes, path)
}

/// Handle on one dataset directory.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    dir: PathBuf,
    format: SnapshotFormat,
}

impl DatasetStore {
    pub fn new<P: Into<PathBuf>>(dir: P, format: SnapshotFormat) -> Self {
        Self { dir: dir.into(), format }
    }

    /// Opens `dir`, creating it if needed.
    pub fn create<P: Into<PathBuf>>(dir: P, format: SnapshotFormat) -> Result<Self> {
        let store = Self::new(dir, format);
        fs::create_dir_all(&store.dir)
            .with_context(|| format!("Error creating dataset directory '{}'", store.dir.display()))?;
        Ok(store)
    }

    /// Opens an existing dataset directory.
    pub fn open<P: Into<PathBuf>>(dir: P, format: SnapshotFormat) -> Result<Self> {
        let store = Self::new(dir, format);
        if !store.dir.is_dir() {
            anyhow::bail!("Dataset directory '{}' does not exist", store.dir.display());
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> SnapshotFormat {
        self.format
    }

    pub fn snapshot_path(&self, key: &SnapshotKey) -> PathBuf {
        self.dir.join(key.file_name(self.format.extension()))
    }

    pub fn write_snapshot(&self, key: &SnapshotKey, grid: &Grid) -> Result<()> {
        write_grid(&self.snapshot_path(key), self.format, grid)
    }

    pub fn read_snapshot(&self, key: &SnapshotKey) -> Result<Grid> {
        read_grid(&self.snapshot_path(key), self.format)
    }

    pub fn parameter_table_path(&self) -> PathBuf {
        self.dir.join(PARAMETER_TABLE_FILE)
    }

    /// Persists the parameter table. A dataset's table is written once; an existing table is
    /// never replaced.
    pub fn write_parameter_table(&self, table: &ParameterTable) -> Result<()> {
        let path = self.parameter_table_path();
        if path.exists() {
            return Err(DatasetError::ParameterTableExists(path.display().to_string()).into());
        }
        let tmp = temporary_path(&path);
        let file = File::create(&tmp).with_context(|| format!("Error creating '{}'", tmp.display()))?;
        table.write_csv(file)?;
        fs::rename(&tmp, &path).with_context(|| format!("Error moving '{}' into place", path.display()))?;
        debug!("Parameter table with {} rows saved to {}", table.len(), path.display());
        Ok(())
    }

    pub fn read_parameter_table(&self) -> Result<ParameterTable> {
        let path = self.parameter_table_path();
        let file = File::open(&path).with_context(|| format!("Error opening parameter table '{}'", path.display()))?;
        let table = ParameterTable::read_csv(BufReader::new(file))
            .with_context(|| format!("Error parsing parameter table '{}'", path.display()))?;
        Ok(table)
    }

    /// Every snapshot file currently present, recovered from file names.
    pub fn scan_snapshots(&self) -> Result<Vec<SnapshotKey>> {
        let extension = self.format.extension();
        let mut keys = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Error listing dataset directory '{}'", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|n| SnapshotKey::parse(n, extension)) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Number of snapshot files present per sample index.
    pub fn snapshot_counts(&self) -> Result<BTreeMap<usize, usize>> {
        let mut counts = BTreeMap::new();
        for key in self.scan_snapshots()? {
            *counts.entry(key.sample).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataset_common::{Channel, ParameterValue};
    use tempfile::tempdir;

    fn sample_grid() -> Grid {
        Grid::from_fn(3, 4, |r, c| r as f64 * 0.5 - c as f64)
    }

    #[test]
    fn test_every_format_reads_back() {
        let dir = tempdir().unwrap();
        for format in [
            SnapshotFormat::Raw,
            SnapshotFormat::Bincode,
            SnapshotFormat::MessagePack,
            SnapshotFormat::Json,
        ] {
            let path = dir.path().join(format!("grid.{}", format.extension()));
            write_grid(&path, format, &sample_grid()).unwrap();
            assert_eq!(read_grid(&path, format).unwrap(), sample_grid(), "{:?}", format);
        }
    }

    #[test]
    fn test_truncated_raw_file_is_corrupt() {
        let mut bytes = encode_grid(SnapshotFormat::Raw, &sample_grid()).unwrap();
        bytes.truncate(bytes.len() - 3);
        let err = decode_grid(SnapshotFormat::Raw, &bytes, Path::new("x.f64")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_oversized_raw_header_is_corrupt() {
        let header: [u64; 2] = [1 << 61, 1];
        let err = decode_grid(SnapshotFormat::Raw, header.as_bytes(), Path::new("x.f64")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_scan_ignores_foreign_and_temporary_files() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::create(dir.path(), SnapshotFormat::Raw).unwrap();
        let key = SnapshotKey::new(3, Channel::Oxygen, 350);
        store.write_snapshot(&key, &sample_grid()).unwrap();
        fs::write(dir.path().join("image4_type=oxygen_time=350.f64.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        assert_eq!(store.scan_snapshots().unwrap(), vec![key]);
        assert_eq!(store.snapshot_counts().unwrap().get(&3), Some(&1));
    }

    #[test]
    fn test_parameter_table_is_written_once() {
        let dir = tempdir().unwrap();
        let store = DatasetStore::create(dir.path(), SnapshotFormat::Raw).unwrap();
        let table = ParameterTable::new(vec!["p".into()], vec![vec![ParameterValue::Int(1)]]).unwrap();
        store.write_parameter_table(&table).unwrap();
        assert_eq!(store.read_parameter_table().unwrap(), table);

        let err = store.write_parameter_table(&table).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::ParameterTableExists(_))
        ));
    }
}
