use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::path::{PathKey, PathTransformFn, cas_path_transform};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Key/value byte storage on top of the local filesystem.
///
/// Every key lives at `<root>/<shard1>/.../<shardN>/<hash>` as computed by
/// the configured [`PathTransformFn`].
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    transform: PathTransformFn,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_transform(root, cas_path_transform)
    }

    pub fn with_transform(root: impl Into<PathBuf>, transform: PathTransformFn) -> Self {
        Self {
            root: root.into(),
            transform,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_key(&self, key: &str) -> PathKey {
        (self.transform)(key)
    }

    fn full_path(&self, path_key: &PathKey) -> PathBuf {
        self.root.join(&path_key.path_name).join(&path_key.file_name)
    }

    /// True iff a regular file exists at the key's derived path.
    pub async fn has(&self, key: &str) -> bool {
        let path = self.full_path(&self.path_key(key));
        match fs::metadata(&path).await {
            Ok(metadata) => metadata.is_file(),
            Err(_) => false,
        }
    }

    /// Copies `source` to the key's location and returns the number of bytes written.
    ///
    /// Data goes to a uniquely named temp file in the leaf directory first and is
    /// renamed into place once fully copied, so `has` never sees a partial entry.
    pub async fn write<R>(&self, key: &str, source: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.write_checked(key, source, None).await
    }

    /// Like [`write`](Self::write), but only commits if `source` yields exactly
    /// `expected` bytes. A short source leaves nothing behind.
    pub async fn write_exact<R>(&self, key: &str, source: &mut R, expected: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.write_checked(key, source, Some(expected)).await
    }

    async fn write_checked<R>(&self, key: &str, source: &mut R, expected: Option<u64>) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path_key = self.path_key(key);
        let dir = self.root.join(&path_key.path_name);
        fs::create_dir_all(&dir).await?;

        let target = dir.join(&path_key.file_name);
        let mut tmp = TempPath::new(dir.join(format!(
            "{}.{}.tmp",
            path_key.file_name,
            uuid::Uuid::new_v4().simple()
        )));

        let written = copy_to_file(tmp.path(), source).await?;
        if let Some(expected) = expected
            && written != expected
        {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("expected {expected} bytes for [{key}], got {written}"),
            )));
        }

        fs::rename(tmp.path(), &target).await?;
        tmp.disarm();

        tracing::debug!("Written {} bytes to disk {}", written, target.display());
        Ok(written)
    }

    /// Opens the stored content for reading. Returns the size alongside the file.
    pub async fn read(&self, key: &str) -> Result<(u64, fs::File)> {
        let path = self.full_path(&self.path_key(key));

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }

        Ok((metadata.len(), file))
    }

    /// Removes the key and reclaims the shard directories it leaves empty,
    /// up to and including the top-level shard.
    pub async fn delete(&self, key: &str) -> Result<()> {
        if !self.has(key).await {
            return Err(StoreError::NotFound(key.to_string()));
        }

        let path_key = self.path_key(key);
        fs::remove_file(self.full_path(&path_key)).await?;

        let mut dir = self.root.join(&path_key.path_name);
        let top = self.root.join(path_key.first_segment());
        while dir.starts_with(&top) {
            if !is_empty_dir(&dir).await? {
                break;
            }
            fs::remove_dir(&dir).await?;
            if dir == top {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => break,
            }
        }

        tracing::info!("Deleted [{}] from disk", path_key.file_name);
        Ok(())
    }

    /// Removes the whole root directory.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Removes the temp file on drop unless it was committed. Also covers a
/// write future dropped mid-copy.
struct TempPath {
    path: PathBuf,
    armed: bool,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn copy_to_file<R>(path: &Path, source: &mut R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = fs::File::create(path).await?;
    let written = tokio::io::copy(source, &mut file).await?;
    file.flush().await?;
    Ok(written)
}

async fn is_empty_dir(dir: &Path) -> std::io::Result<bool> {
    let mut entries = fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}
