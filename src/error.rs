use std::{io, path::PathBuf};

use thiserror::Error;

/// Everything that can go wrong during a report run.
///
/// `Config` and `Auth` abort the run before any warehouse is processed, the
/// other variants are recorded per warehouse in the run summary.  `Notify` is
/// only ever logged.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metabase authentication failed: {0}")]
    Auth(String),

    #[error("dataset query failed: {0}")]
    Fetch(String),

    #[error("can't read template {}: {source}", .path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image rendering failed: {0}")]
    Render(String),

    #[error("can't write image {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("email notification failed: {0}")]
    Notify(String),
}
