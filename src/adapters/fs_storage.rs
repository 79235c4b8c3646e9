//! Filesystem model artifact and report stores.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::domain::algorithm::ReportPointer;
use crate::domain::error::StratlabError;
use crate::ports::artifact_port::{ArtifactKey, ModelArtifactPort};
use crate::ports::config_port::ConfigPort;
use crate::ports::report_port::ReportStore;

/// Trained models under `<root>/<algorithm>/<version>/<instrument>_<period>.model`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &dyn ConfigPort) -> Self {
        Self::new(config.get_string_or("storage", "models_dir", "./models"))
    }
}

impl ModelArtifactPort for FsArtifactStore {
    fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf, StratlabError> {
        if !is_plain_segment(&key.instrument) {
            return Err(StratlabError::validation(
                "sec_id",
                "instrument cannot be used as a file name",
            ));
        }
        let dir = self
            .root
            .join(key.algorithm.to_string())
            .join(key.version.to_string());
        fs::create_dir_all(&dir)?;
        Ok(dir.join(format!("{}_{}.model", key.instrument, key.period)))
    }

    fn remove(&self, key: &ArtifactKey) -> Result<(), StratlabError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale model artifact");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reports under a root directory, addressed by `<url_prefix>/<name>`.
pub struct FsReportStore {
    root: PathBuf,
    url_prefix: String,
}

impl FsReportStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &dyn ConfigPort) -> Self {
        Self::new(
            config.get_string_or("storage", "reports_dir", "./backtests"),
            &config.get_string_or("storage", "reports_url_prefix", "/backtests"),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }
}

impl ReportStore for FsReportStore {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<ReportPointer, StratlabError> {
        if !is_plain_segment(name) {
            return Err(StratlabError::validation("report", "name must be a plain file name"));
        }
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(name);
        // create_new keeps reports write-once.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        std::io::Write::write_all(&mut file, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "report written");
        Ok(ReportPointer(format!("{}/{}", self.url_prefix, name)))
    }

    fn resolve(&self, pointer: &ReportPointer) -> Option<PathBuf> {
        let name = pointer
            .as_str()
            .strip_prefix(&self.url_prefix)?
            .strip_prefix('/')?;
        if !is_plain_segment(name) {
            return None;
        }
        let path = self.root.join(name);
        path.is_file().then_some(path)
    }
}

fn is_plain_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
