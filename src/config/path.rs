use anyhow::{ensure, Context, Result};
use clio::ClioPath;
use std::{ops::Deref, path::Path};

/// A user supplied path, kept in the form the user wrote it for the summary
#[derive(Clone, Debug)]
pub struct ConfigPath(pub ClioPath);

impl std::fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.to_string_lossy().fmt(f)
    }
}

impl Deref for ConfigPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.0.path()
    }
}

impl From<ClioPath> for ConfigPath {
    fn from(clio_path: ClioPath) -> Self {
        Self(clio_path)
    }
}

impl ConfigPath {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self(ClioPath::new(path).context(format!("path {}", path))?))
    }

    pub fn existing_dir(path: &str) -> Result<Self> {
        let config_path = Self::new(path)?;
        ensure!(config_path.try_exists()?, "{} must exist", config_path);
        ensure!(config_path.is_dir(), "{} must be a directory", config_path);
        Ok(config_path)
    }
}

impl serde::Serialize for ConfigPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.to_string_lossy().as_ref())
    }
}
