use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Move a file from `src` to `dst`. Uses `rename` first (atomic on the same
/// filesystem) and falls back to copy + delete for cross-device moves.
pub fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Copies `src` into `directory`, keeping its file name when free and
/// otherwise trying `name_1.ext`, `name_2.ext`, ...
///
/// The destination is opened with `create_new`, so a concurrent writer can
/// never be overwritten.
pub fn copy_unique(src: &Path, directory: &Path) -> Result<PathBuf, StorageError> {
    ensure_directory(directory)?;

    let filename = src
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidName(src.to_path_buf()))?;
    let (base, ext) = match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => (&filename[..dot_pos], Some(&filename[dot_pos..])),
        _ => (filename, None),
    };
    let mut reader = File::open(src).map_err(|e| StorageError::ReadFile {
        path: src.to_path_buf(),
        source: e,
    })?;

    for counter in 0..=1000 {
        let try_filename = if counter == 0 {
            filename.to_string()
        } else {
            match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            }
        };
        let try_path = directory.join(&try_filename);

        match OpenOptions::new().write(true).create_new(true).open(&try_path) {
            Ok(mut dst) => {
                let copy_err = |e| StorageError::CopyFile {
                    from: src.to_path_buf(),
                    to: try_path.clone(),
                    source: e,
                };
                if let Err(e) = std::io::copy(&mut reader, &mut dst) {
                    let _ = std::fs::remove_file(&try_path);
                    return Err(copy_err(e));
                }
                dst.sync_all().map_err(copy_err)?;
                return Ok(try_path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(StorageError::WriteFile {
                    path: try_path,
                    source: e,
                });
            }
        }
    }

    Err(StorageError::FileExists(directory.join(filename)))
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, StorageError> {
    let read_err = |e| StorageError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_err)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}
