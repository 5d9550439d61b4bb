use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::service_config::Config;
use crate::store::{StagingArea, StagingError, Store};

/// Server context shared by every request handler.
///
/// Built once at startup. The store root and staging area never change for
/// the life of the process.
#[derive(Debug, Clone)]
pub struct State {
    store: Arc<Store>,
}

impl State {
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        let root = config.store_root.canonicalize().map_err(|source| {
            StateSetupError::StoreRoot {
                path: config.store_root.clone(),
                source,
            }
        })?;
        if !root.is_dir() {
            return Err(StateSetupError::NotADirectory(root));
        }

        let staging = StagingArea::new(config.staging_parent.as_deref())?;
        check_same_filesystem(&root, staging.path())?;
        if staging.path().starts_with(&root) {
            tracing::warn!(
                staging = %staging.path().display(),
                "staging area is inside the store root and will be visible to clients"
            );
        }

        tracing::info!(
            root = %root.display(),
            staging = %staging.path().display(),
            "store ready"
        );
        Ok(Self::new(Store::new(root, staging)))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// Publishing renames staged files into the root, which only works within
/// one filesystem.
fn check_same_filesystem(root: &Path, staging: &Path) -> Result<(), StateSetupError> {
    let root_device = std::fs::metadata(root)
        .map_err(|source| StateSetupError::StoreRoot {
            path: root.to_path_buf(),
            source,
        })?
        .dev();
    let staging_device = std::fs::metadata(staging)
        .map_err(|source| StateSetupError::Staging(StagingError::Setup(source)))?
        .dev();

    if root_device != staging_device {
        return Err(StateSetupError::CrossDevice {
            root: root.to_path_buf(),
            staging: staging.to_path_buf(),
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("store root {} is not usable: {source}", .path.display())]
    StoreRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(
        "staging area {} is on a different filesystem than the store root {}, \
         use --staging-dir to place it next to the store",
        .staging.display(),
        .root.display()
    )]
    CrossDevice { root: PathBuf, staging: PathBuf },
}
