use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http_body_util::LengthLimitError;
use tempfile::TempDir;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const STAGING_DIR_PREFIX: &str = "webfs";

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("failed to create staging area: {0}")]
    Setup(#[source] io::Error),
    #[error("failed to open staging file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("content for {} exceeds the request body limit", .0.display())]
    TooLarge(PathBuf),
    #[error("failed to copy content into {}: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("failed to publish {} to {}: {source}", .from.display(), .to.display())]
    Publish {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Private scratch directory where uploads are assembled before they become
/// visible in the store.
///
/// The directory is removed when the area is dropped.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

/// Fully written content waiting to be published.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    file: File,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StagingArea {
    /// Create the staging directory under `parent`, or the system temp dir.
    ///
    /// `parent` should share a filesystem with the store root, otherwise
    /// publishing cannot rename across devices.
    pub fn new(parent: Option<&Path>) -> Result<Self, StagingError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_DIR_PREFIX);

        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(StagingError::Setup)?;

        tracing::debug!(path = %dir.path().display(), "staging area created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy `body` into a new staging file for `final_path`.
    ///
    /// Each call gets its own file, so concurrent uploads of the same name
    /// never share scratch space.
    pub async fn stage<S, E>(&self, final_path: &Path, mut body: S) -> Result<StagedFile, StagingError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
    {
        let path = self.staged_path(final_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| StagingError::Open {
                path: path.clone(),
                source,
            })?;

        let mut written = 0usize;
        let copied: Result<(), BoxError> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(Into::<BoxError>::into)?;
                file.write_all(&chunk).await?;
                written += chunk.len();
            }
            file.flush().await?;
            file.sync_data().await?;
            Ok(())
        }
        .await;

        if let Err(source) = copied {
            discard(&path).await;
            if exceeds_length_limit(&source) {
                return Err(StagingError::TooLarge(final_path.to_path_buf()));
            }
            return Err(StagingError::Copy { path, source });
        }

        tracing::debug!(staged = %path.display(), bytes = written, "content staged");
        Ok(StagedFile { path, file })
    }

    /// Atomically move `staged` onto `final_path`, creating missing parent
    /// directories. Returns the open handle of the published file.
    pub async fn publish(&self, staged: StagedFile, final_path: &Path) -> Result<File, StagingError> {
        let StagedFile { path, file } = staged;

        let published = async {
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&path, final_path).await
        }
        .await;

        match published {
            Ok(()) => {
                tracing::debug!(
                    staged = %path.display(),
                    path = %final_path.display(),
                    "content published"
                );
                Ok(file)
            }
            Err(source) => {
                discard(&path).await;
                Err(StagingError::Publish {
                    from: path,
                    to: final_path.to_path_buf(),
                    source,
                })
            }
        }
    }

    fn staged_path(&self, final_path: &Path) -> PathBuf {
        let name = final_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        self.dir.path().join(format!("{}-{}", Uuid::new_v4(), name))
    }
}

/// Whether the body stream was cut off by the request body limit, which
/// shows up somewhere in the error's source chain.
fn exceeds_length_limit(err: &BoxError) -> bool {
    let mut current: &(dyn std::error::Error + 'static) = &**err;
    loop {
        if current.is::<LengthLimitError>() {
            return true;
        }
        match current.source() {
            Some(next) => current = next,
            None => return false,
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(staged = %path.display(), "failed to remove staged file: {}", e);
        }
    }
}
