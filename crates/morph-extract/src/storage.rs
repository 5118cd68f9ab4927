//! Versioned, compressed on-disk containers.
//!
//! Layout: 4 magic bytes, a little-endian `u32` format version, then a zstd
//! stream holding the bincode-encoded payload. Writes go to a temp file next
//! to the destination and are renamed into place, so a crash mid-write leaves
//! the previous file intact.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use thiserror::Error;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode or decode {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("{path} is not a {expected} file")]
    BadMagic { path: PathBuf, expected: String },
    #[error("{path} has format version {found}, newest supported is {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

impl StorageError {
    /// True when the file simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Tag identifying a container kind and the newest version this build writes.
#[derive(Clone, Copy, Debug)]
pub struct Format {
    pub magic: [u8; 4],
    pub version: u32,
}

/// Atomically write `value` to `path`, creating parent directories.
pub fn save<T: Serialize>(path: &Path, format: Format, value: &T) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;

    let temp = NamedTempFile::new_in(parent).map_err(|e| StorageError::io(parent, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        writer
            .write_all(&format.magic)
            .and_then(|_| writer.write_all(&format.version.to_le_bytes()))
            .map_err(|e| StorageError::io(path, e))?;

        let mut encoder =
            zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL).map_err(|e| StorageError::io(path, e))?;
        bincode::serialize_into(&mut encoder, value).map_err(|source| StorageError::Codec {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = encoder.finish().map_err(|e| StorageError::io(path, e))?;
        writer.flush().map_err(|e| StorageError::io(path, e))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    Ok(())
}

/// Read a container written by [`save`], accepting any version up to `format.version`.
///
/// Returns the version found in the header alongside the payload.
pub fn load<T: DeserializeOwned>(path: &Path, format: Format) -> Result<(u32, T), StorageError> {
    let file = File::open(path).map_err(|e| StorageError::io(path, e))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    let mut version = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .and_then(|_| reader.read_exact(&mut version))
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => bad_magic(path, format),
            _ => StorageError::io(path, e),
        })?;
    if magic != format.magic {
        return Err(bad_magic(path, format));
    }
    let version = u32::from_le_bytes(version);
    if version > format.version {
        return Err(StorageError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
            supported: format.version,
        });
    }

    let decoder = zstd::stream::read::Decoder::new(reader).map_err(|e| StorageError::io(path, e))?;
    let value = bincode::deserialize_from(decoder).map_err(|source| StorageError::Codec {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((version, value))
}

fn bad_magic(path: &Path, format: Format) -> StorageError {
    StorageError::BadMagic {
        path: path.to_path_buf(),
        expected: String::from_utf8_lossy(&format.magic).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_FORMAT: Format = Format {
        magic: *b"TEST",
        version: 2,
    };

    #[test]
    fn saves_and_loads_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("payload.bin");
        let payload = vec![("a".to_string(), 1u32), ("b".to_string(), 2)];
        save(&path, TEST_FORMAT, &payload).unwrap();

        let (version, loaded): (u32, Vec<(String, u32)>) = load(&path, TEST_FORMAT).unwrap();
        assert_eq!(version, 2);
        assert_eq!(loaded, payload);
    }

    #[test]
    fn rejects_foreign_and_newer_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        save(&path, TEST_FORMAT, &1u8).unwrap();

        let other = Format {
            magic: *b"ELSE",
            version: 2,
        };
        assert!(matches!(
            load::<u8>(&path, other),
            Err(StorageError::BadMagic { .. })
        ));

        let older_reader = Format {
            magic: *b"TEST",
            version: 1,
        };
        assert!(matches!(
            load::<u8>(&path, older_reader),
            Err(StorageError::UnsupportedVersion { found: 2, .. })
        ));

        std::fs::write(&path, b"TE").unwrap();
        assert!(matches!(
            load::<u8>(&path, TEST_FORMAT),
            Err(StorageError::BadMagic { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load::<u8>(&dir.path().join("absent.bin"), TEST_FORMAT).unwrap_err();
        assert!(err.is_not_found());
    }
}
