//! The on-disk resource store.
//!
//! A [`Store`] maps sanitized request paths to files under a single root
//! directory. Reads take a shared lock on the resolved path, writes and
//! deletes an exclusive one. Writes are assembled in a private
//! [`StagingArea`] and published with a rename, so a reader sees either the
//! complete old content or the complete new content.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;

pub mod lock;
pub mod path;
pub mod staging;

pub use lock::{LockError, LockMode, LockRegistry, ResourceLock};
pub use staging::{BoxError, StagedFile, StagingArea, StagingError};

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("refusing to remove the store root {}", .0.display())]
    RootRemoval(PathBuf),
}

/// An open resource together with the lock it was opened under.
///
/// The lock is held until the content stream is dropped, so a reader
/// streams one complete version of the resource.
#[derive(Debug)]
pub struct Resource {
    file: File,
    len: u64,
    lock: ResourceLock,
}

impl Resource {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stream the content from the start, releasing the lock once the stream
    /// is dropped.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let Resource { file, lock, .. } = self;
        ReaderStream::with_capacity(file, READ_CHUNK_SIZE).map(move |chunk| {
            let _held = &lock;
            chunk
        })
    }
}

#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    staging: StagingArea,
    locks: LockRegistry,
}

impl Store {
    pub fn new(root: PathBuf, staging: StagingArea) -> Self {
        Self {
            root,
            staging,
            locks: LockRegistry::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Resolve a raw, already percent-decoded request path to a path inside
    /// the store root.
    pub fn resolve(&self, raw: impl AsRef<[u8]>) -> PathBuf {
        path::resolve(&self.root, raw)
    }

    /// Open the resource at `path` for reading under a shared lock.
    ///
    /// Existence is checked before locking so a miss has no side effects.
    /// Anything other than a regular file is reported as missing.
    pub async fn read(&self, path: &Path) -> Result<Resource, StoreError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(StoreError::NotFound(path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        let lock = self.locks.acquire(path, LockMode::Shared).await?;
        let read_error = |source: io::Error| {
            // deleted between the existence check and the lock
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(path.to_path_buf())
            } else {
                StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        };

        let file = File::open(path).await.map_err(read_error)?;
        let meta = file.metadata().await.map_err(read_error)?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        Ok(Resource {
            file,
            len: meta.len(),
            lock,
        })
    }

    /// Replace the resource at `path` with `body`, creating it if absent.
    ///
    /// Returns the published file rewound to its start, still under the
    /// exclusive lock, for echoing back to the writer.
    pub async fn write<S, E>(&self, path: &Path, body: S) -> Result<Resource, StoreError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
    {
        let lock = self.locks.acquire(path, LockMode::Exclusive).await?;

        let staged = self.staging.stage(path, body).await?;
        let mut file = self.staging.publish(staged, path).await?;

        let len = async {
            file.rewind().await?;
            file.metadata().await.map(|meta| meta.len())
        }
        .await
        .map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Resource { file, len, lock })
    }

    /// Remove the resource at `path`, recursively if it is a directory.
    ///
    /// Removing something that does not exist succeeds.
    pub async fn delete(&self, path: &Path) -> Result<(), StoreError> {
        if path == self.root {
            return Err(StoreError::RootRemoval(path.to_path_buf()));
        }

        let lock = self.locks.acquire(path, LockMode::Exclusive).await?;

        let removed = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "nothing to remove");
            }
            Err(source) => {
                return Err(StoreError::Remove {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
        lock.release();

        Ok(())
    }
}
