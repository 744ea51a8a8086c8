//! On-disk layout of a project.

use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::StorageError;

/// Returns the default project root: `~/.tapevault`.
pub fn default_project_root() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tapevault"))
}

/// Directories and files derived from the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub inbox_dir: PathBuf,
    pub raw_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
    pub analysis_dir: PathBuf,
    pub segments_dir: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub db_path: PathBuf,
    pub backup_dir: Option<PathBuf>,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let data_dir = root.join("data");
        Self {
            inbox_dir: root.join("inbox"),
            raw_dir: root.join("raw"),
            thumbnails_dir: root.join("thumbnails"),
            analysis_dir: root.join("analysis"),
            segments_dir: root.join("segments"),
            logs_dir: data_dir.join("logs"),
            db_path: data_dir.join("tapevault.db"),
            data_dir,
            backup_dir: None,
            root,
        }
    }

    /// Resolves the layout for a config, falling back to [`default_project_root`].
    pub fn from_config(config: &Config) -> Option<Self> {
        let root = match &config.project_root {
            Some(root) => PathBuf::from(root),
            None => default_project_root()?,
        };
        let mut paths = Self::new(root);
        paths.backup_dir = config.backup_dir.as_ref().map(PathBuf::from);
        Some(paths)
    }

    /// Creates every managed directory.
    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [
            &self.inbox_dir,
            &self.raw_dir,
            &self.thumbnails_dir,
            &self.analysis_dir,
            &self.segments_dir,
            &self.data_dir,
            &self.logs_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn tape_segments_dir(&self, tape_code: &str) -> PathBuf {
        self.segments_dir.join(tape_code)
    }

    pub fn tape_analysis_dir(&self, tape_code: &str) -> PathBuf {
        self.analysis_dir.join(tape_code)
    }

    pub fn thumbnail_path(&self, tape_code: &str) -> PathBuf {
        self.thumbnails_dir.join(format!("{}.jpg", tape_code))
    }

    /// Path of an inbox file by bare name. Rejects names that escape the inbox.
    pub fn inbox_file(&self, filename: &str) -> Option<PathBuf> {
        let name = Path::new(filename);
        let mut components = name.components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => Some(self.inbox_dir.join(name)),
            _ => None,
        }
    }
}
