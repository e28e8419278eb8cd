use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::FleetError;
use crate::registry::Registry;

/// JSON persistence for the [`Registry`]. Each save overwrites the file in full.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields an empty registry.
    pub fn load(&self) -> Result<Registry, FleetError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no state file, starting empty");
                return Ok(Registry::default());
            }
            Err(err) => return Err(err.into()),
        };
        let registry: Registry =
            serde_json::from_str(&content).map_err(|err| FleetError::MalformedState {
                path: self.path.display().to_string(),
                message: err.to_string(),
            })?;
        if registry.instance_count() as usize != registry.instances().count() {
            return Err(FleetError::MalformedState {
                path: self.path.display().to_string(),
                message: format!(
                    "instance_count is {} but {} instances are recorded",
                    registry.instance_count(),
                    registry.instances().count()
                ),
            });
        }
        tracing::debug!(
            path = %self.path.display(),
            instances = registry.instance_count(),
            "registry loaded"
        );
        Ok(registry)
    }

    pub fn save(&self, registry: &Registry) -> Result<(), FleetError> {
        commit_all(vec![self.stage(registry)?])?;
        tracing::debug!(
            path = %self.path.display(),
            instances = registry.instance_count(),
            "registry saved"
        );
        Ok(())
    }

    /// Serializes `registry` into a temp file beside the state file.
    pub fn stage(&self, registry: &Registry) -> Result<StagedFile, FleetError> {
        let body = serde_json::to_string_pretty(registry)?;
        StagedFile::new(&self.path, &format!("{body}\n"))
    }

    pub fn remove(&self) -> Result<(), FleetError> {
        remove_if_exists(&self.path)
    }
}

/// New content waiting in a sibling temp file until [`commit_all`] renames it
/// over the target. Dropping it uncommitted removes the temp file.
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    tmp: PathBuf,
    previous: Option<String>,
}

impl StagedFile {
    pub fn new(path: &Path, content: &str) -> Result<Self, FleetError> {
        let previous = match fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let staged = Self {
            target: path.to_path_buf(),
            tmp: parent.join(format!(
                ".{}.tmp.{}",
                path.file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "vagrant-fleet".to_string()),
                std::process::id()
            )),
            previous,
        };
        fs::write(&staged.tmp, content)?;
        Ok(staged)
    }

    fn restore_previous(&self) -> Result<(), FleetError> {
        match &self.previous {
            Some(text) => write_atomic(&self.target, text),
            None => remove_if_exists(&self.target),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.tmp);
    }
}

/// Renames staged files into place in order. If one rename fails, the files
/// already replaced get their previous content back and nothing else moves.
pub fn commit_all(staged: Vec<StagedFile>) -> Result<(), FleetError> {
    for (index, file) in staged.iter().enumerate() {
        if let Err(err) = fs::rename(&file.tmp, &file.target) {
            for done in staged[..index].iter().rev() {
                if let Err(restore) = done.restore_previous() {
                    tracing::warn!(
                        path = %done.target.display(),
                        error = %restore,
                        "failed to restore previous content"
                    );
                }
            }
            return Err(err.into());
        }
    }
    Ok(())
}

/// Writes through a sibling temp file and renames it over `path`.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), FleetError> {
    commit_all(vec![StagedFile::new(path, content)?])
}

pub fn remove_if_exists(path: &Path) -> Result<(), FleetError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
