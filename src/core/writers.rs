//! Writer for focused-particle (OPP) binary output files.
//!
//! OPP files use the same binary layout as the EVT input: a `u32` event
//! count followed by 24-byte rows of twelve `u16` values, the first two of
//! which are the row delimiter.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::loaders::ParticleRecord;
use super::locator::FileRef;

/// Row delimiter words, matching the instrument's EVT output.
const ROW_DELIMITER: [u16; 2] = [10, 0];

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Write records to a writer in the EVT binary layout.
pub fn write_opp<W: Write>(mut writer: W, records: &[ParticleRecord]) -> std::io::Result<()> {
    writer.write_all(&(records.len() as u32).to_le_bytes())?;
    for record in records {
        for word in ROW_DELIMITER {
            writer.write_all(&word.to_le_bytes())?;
        }
        for value in record.channels() {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()
}

/// Write a file's focused records below `opp_dir`, mirroring the source
/// file name (with `.opp` in place of any trailing `.gz`). Parent
/// directories are created as needed.
///
/// Returns the path written.
pub fn write_opp_file(
    opp_dir: &Path,
    file: &FileRef,
    records: &[ParticleRecord],
) -> Result<PathBuf> {
    let name = file.file_name().trim_end_matches(".gz");
    let path = opp_dir.join(&file.cruise).join(format!("{}.opp", name));

    ensure_parent_dirs(&path)?;

    let out = File::create(&path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    write_opp(BufWriter::new(out), records).map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::read_evt;
    use tempfile::TempDir;

    fn record(d1: u16, d2: u16, fsc: u16) -> ParticleRecord {
        ParticleRecord {
            time: 1,
            pulse_width: 2,
            d1,
            d2,
            fsc_small: fsc,
            fsc_perp: 0,
            fsc_big: 0,
            pe: 0,
            chl_small: 0,
            chl_big: 0,
        }
    }

    #[test]
    fn test_write_opp_readable_by_loader() {
        let records = vec![record(10, 20, 100), record(30, 40, 200)];
        let mut buf = Vec::new();
        write_opp(&mut buf, &records).unwrap();

        let parsed = read_evt(&buf[..]).unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn test_write_opp_empty() {
        let mut buf = Vec::new();
        write_opp(&mut buf, &[]).unwrap();
        assert_eq!(buf, 0u32.to_le_bytes());
    }

    #[test]
    fn test_write_opp_file_creates_dirs_and_strips_gz() {
        let dir = TempDir::new().unwrap();
        let file = FileRef {
            key: "C1/2014-07-04T00-00-02+00-00.gz".to_string(),
            cruise: "C1".to_string(),
            ordinal: 0,
        };

        let path = write_opp_file(dir.path(), &file, &[record(1, 2, 3)]).unwrap();
        assert!(path.exists());
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "2014-07-04T00-00-02+00-00.opp"
        );
        assert!(path.starts_with(dir.path().join("C1")));
    }
}
