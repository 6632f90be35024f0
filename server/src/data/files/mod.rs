//! Attachment file cache
//!
//! A flat directory of blobs named by message id. Writes stream from the
//! request body while consulting the caller's limiters chunk by chunk; a
//! refused chunk aborts the write and removes the partial file. Total disk
//! usage is scanned once at startup and tracked from then on.

pub mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::domain::rate::Limiter;

pub use error::FileCacheError;

const WRITE_CHUNK_SIZE: usize = 8 * 1024;

pub struct FileCache {
    dir: PathBuf,
    total_size_limit: u64,
    file_size_limit: u64,
    size: AtomicU64,
}

impl FileCache {
    /// Open the cache directory, creating it if needed, and scan current usage
    pub async fn new(
        dir: &Path,
        total_size_limit: u64,
        file_size_limit: u64,
    ) -> Result<Self, FileCacheError> {
        fs::create_dir_all(dir).await?;

        let mut size = 0u64;
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                size += meta.len();
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            used = size,
            limit = total_size_limit,
            "Attachment cache opened"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            total_size_limit,
            file_size_limit,
            size: AtomicU64::new(size),
        })
    }

    pub fn file_size_limit(&self) -> u64 {
        self.file_size_limit
    }

    /// Current total on-disk usage in bytes
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    fn path(&self, id: &str) -> Result<PathBuf, FileCacheError> {
        // Ids are short alphanumerics; anything else could escape the dir
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(FileCacheError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(id))
    }

    /// Stream a body into the cache, consulting every limiter per chunk.
    /// Returns the number of bytes written. On any refusal or I/O error the
    /// partial file is removed.
    pub async fn write<R>(
        &self,
        id: &str,
        mut reader: R,
        limiters: &[Arc<dyn Limiter>],
    ) -> Result<u64, FileCacheError>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.path(id)?;
        let mut file = fs::File::create(&path).await?;

        let result = self.copy_limited(&mut reader, &mut file, limiters).await;
        match result {
            Ok(written) => {
                file.flush().await?;
                self.size.fetch_add(written, Ordering::Relaxed);
                Ok(written)
            }
            Err(e) => {
                drop(file);
                if let Err(rm) = fs::remove_file(&path).await {
                    tracing::warn!(id, error = %rm, "Failed to remove partial attachment");
                }
                Err(e)
            }
        }
    }

    async fn copy_limited<R>(
        &self,
        reader: &mut R,
        file: &mut fs::File,
        limiters: &[Arc<dyn Limiter>],
    ) -> Result<u64, FileCacheError>
    where
        R: AsyncRead + Unpin,
    {
        let mut written = 0u64;
        let mut buf = vec![0u8; WRITE_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(written);
            }
            if written + n as u64 > self.file_size_limit {
                return Err(FileCacheError::TooLarge);
            }
            if self.size() + written + n as u64 > self.total_size_limit {
                return Err(FileCacheError::CacheFull);
            }
            if limiters.iter().any(|l| !l.allow(n as i64)) {
                return Err(FileCacheError::LimitReached);
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;
        }
    }

    /// Path and size of a stored attachment
    pub async fn entry(&self, id: &str) -> Result<(PathBuf, u64), FileCacheError> {
        let path = self.path(id)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok((path, meta.len())),
            Ok(_) => Err(FileCacheError::NotFound(id.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileCacheError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove attachments by message id; missing files are skipped
    pub async fn remove(&self, ids: &[String]) -> Result<(), FileCacheError> {
        for id in ids {
            let path = match self.path(id) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(id, error = %e, "Skipping attachment removal");
                    continue;
                }
            };
            match fs::metadata(&path).await {
                Ok(meta) => {
                    fs::remove_file(&path).await?;
                    self.size.fetch_sub(meta.len(), Ordering::Relaxed);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rate::FixedLimiter;

    async fn cache(total: u64, per_file: u64) -> (tempfile::TempDir, FileCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), total, per_file).await.unwrap();
        (dir, cache)
    }

    fn limiter(bytes: i64) -> Vec<Arc<dyn Limiter>> {
        vec![Arc::new(FixedLimiter::new(bytes))]
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let (_dir, cache) = cache(1024, 1024).await;
        let written = cache
            .write("abc123", &b"hello world"[..], &limiter(1024))
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert_eq!(cache.size(), 11);

        let (path, size) = cache.entry("abc123").await.unwrap();
        assert_eq!(size, 11);
        assert_eq!(fs::read(path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_limiter_refusal_removes_partial_file() {
        let (_dir, cache) = cache(1 << 20, 1 << 20).await;
        let body = vec![7u8; 64 * 1024];
        let err = cache
            .write("abc123", &body[..], &limiter(10 * 1024))
            .await
            .unwrap_err();
        assert!(matches!(err, FileCacheError::LimitReached));
        assert!(matches!(
            cache.entry("abc123").await.unwrap_err(),
            FileCacheError::NotFound(_)
        ));
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_per_file_limit() {
        let (_dir, cache) = cache(1 << 20, 1024).await;
        let body = vec![7u8; 64 * 1024];
        let err = cache
            .write("abc123", &body[..], &limiter(1 << 20))
            .await
            .unwrap_err();
        assert!(matches!(err, FileCacheError::TooLarge));
    }

    #[tokio::test]
    async fn test_global_cap() {
        let (_dir, cache) = cache(16, 1024).await;
        let err = cache
            .write("abc123", &[7u8; 64][..], &limiter(1024))
            .await
            .unwrap_err();
        assert!(matches!(err, FileCacheError::CacheFull));
    }

    #[tokio::test]
    async fn test_remove_frees_space() {
        let (_dir, cache) = cache(1024, 1024).await;
        cache
            .write("abc123", &b"0123456789"[..], &limiter(1024))
            .await
            .unwrap();
        cache
            .remove(&["abc123".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.size(), 0);
        assert!(cache.entry("abc123").await.is_err());
    }

    #[tokio::test]
    async fn test_startup_scan_counts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old1"), b"12345").await.unwrap();
        let cache = FileCache::new(dir.path(), 1024, 1024).await.unwrap();
        assert_eq!(cache.size(), 5);
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, cache) = cache(1024, 1024).await;
        assert!(matches!(
            cache.entry("../etc/passwd").await.unwrap_err(),
            FileCacheError::InvalidId(_)
        ));
    }
}
