//! Report artifact storage port trait.

use std::path::PathBuf;

use crate::domain::algorithm::ReportPointer;
use crate::domain::error::StratlabError;

/// Write-once content area for rendered backtest reports.
pub trait ReportStore: Send + Sync {
    /// Store `bytes` under the relative `name` and return a pointer to it.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<ReportPointer, StratlabError>;

    /// Local location of a previously written report, if it exists.
    fn resolve(&self, pointer: &ReportPointer) -> Option<PathBuf>;
}
