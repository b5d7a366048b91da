//! Script Store
//!
//! Persists script sources as individual files in a managed directory. The
//! store never caches: every call goes to disk.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Directory-backed script storage.
#[derive(Debug, Clone)]
pub struct ScriptStore {
    dir: PathBuf,
    extension: String,
}

impl ScriptStore {
    /// Open the store at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>, extension: impl Into<String>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        Ok(Self {
            dir,
            extension: extension.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a script, e.g. `hello.js`
    pub fn file_name(&self, name: &str) -> String {
        format!("{}.{}", name, self.extension)
    }

    /// Path of the file backing `name`
    pub fn path_for(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(self.file_name(name)))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|path| path.is_file()).unwrap_or(false)
    }

    pub fn read(&self, name: &str) -> StoreResult<String> {
        let path = self.path_for(name)?;
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
            _ => StoreError::io(&path, e),
        })
    }

    /// Create or overwrite a script
    pub fn write(&self, name: &str, source: &str) -> StoreResult<()> {
        let path = self.path_for(name)?;
        fs::write(&path, source).map_err(|e| StoreError::io(&path, e))?;
        debug!(script = %name, "Wrote script to {}", path.display());
        Ok(())
    }

    /// Remove a script. Removing a missing script is not an error.
    pub fn delete(&self, name: &str) -> StoreResult<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(script = %name, "Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Names of all scripts currently on disk
    pub fn list(&self) -> StoreResult<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.dir, e))?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if validate_name(stem).is_ok() {
                    names.insert(stem.to_string());
                }
            }
        }

        Ok(names)
    }
}

/// Check that `name` is a filesystem-safe script identifier.
///
/// Names must be non-empty, must not start with `.`, and may only contain
/// ASCII alphanumerics, `_`, `-` and `.`.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
