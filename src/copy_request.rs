use std::path::PathBuf;

use crate::options::SyncOptions;

/// Everything one batch run needs, snapshotted from the application state.
#[derive(Clone, Debug)]
pub struct CopyRequest {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub options: SyncOptions,
}
