use super::{ObjectReader, ObjectStorage, ObjectWriter, validate_object_name};
use crate::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{BufReader, BufWriter};

/// Objects stored as files directly under a root directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Use `root`, creating it if needed
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            Error::Storage(format!(
                "failed to create download directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_object_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn writer(&self, name: &str) -> Result<ObjectWriter> {
        let path = self.path_of(name)?;
        let file = File::create(&path).await.map_err(|e| {
            Error::Storage(format!("failed to create {}: {}", path.display(), e))
        })?;

        Ok(ObjectWriter::for_file(Box::pin(BufWriter::new(file)), path))
    }

    async fn reader(&self, name: &str) -> Result<ObjectReader> {
        let path = self.path_of(name)?;
        match File::open(&path).await {
            Ok(file) => Ok(Box::pin(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {name}")))
            }
            Err(e) => Err(Error::Storage(format!(
                "failed to open {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn storage() -> (LocalStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("downloads")).await.unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn write_finish_then_read() {
        let (storage, _dir) = storage().await;

        let mut writer = storage.writer("download_file_1").await.unwrap();
        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 11);

        let mut body = String::new();
        storage
            .reader("download_file_1")
            .await
            .unwrap()
            .read_to_string(&mut body)
            .await
            .unwrap();
        assert_eq!(body, "hello world");
    }

    #[tokio::test]
    async fn finished_object_replaces_previous_one() {
        let (storage, _dir) = storage().await;

        for content in [&b"first version"[..], &b"second"[..]] {
            let mut writer = storage.writer("obj").await.unwrap();
            writer.write_all(content).await.unwrap();
            writer.finish().await.unwrap();
        }

        let bytes = fs::read(storage.root().join("obj")).await.unwrap();
        assert_eq!(bytes, b"second");
    }

    #[tokio::test]
    async fn abort_removes_partial_file() {
        let (storage, _dir) = storage().await;

        let mut writer = storage.writer("partial").await.unwrap();
        writer.write_all(&[7u8; 200_000]).await.unwrap();
        writer.abort().await;

        assert!(!storage.root().join("partial").exists());
        assert!(matches!(
            storage.reader("partial").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (storage, _dir) = storage().await;
        assert!(matches!(
            storage.reader("nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn names_cannot_escape_root() {
        let (storage, _dir) = storage().await;
        assert!(matches!(
            storage.writer("../escape").await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
