use serde::{Deserialize, Serialize};

/// The named switches the user can toggle for a copy batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub archive: bool,
    pub compress: bool,
    pub verbose: bool,
    pub progress: bool,
    pub delete: bool,
    #[serde(alias = "dryRun")]
    pub dry_run: bool,
    #[serde(alias = "humanReadable", alias = "human")]
    pub human_readable: bool,
    #[serde(alias = "preservePermissions")]
    pub preserve_permissions: bool,
}

impl SyncOptions {
    /// The option set a fresh install starts with.
    pub fn recommended() -> Self {
        Self {
            archive: true,
            compress: true,
            progress: true,
            human_readable: true,
            preserve_permissions: true,
            ..Self::default()
        }
    }
}
