use log::{debug, info, warn};
use std::path::{Component, Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

use crate::utils::{P2PError, Result};

/// One regular file of the shared directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

/// Local file catalog: serves the shared directory and receives downloads.
pub struct FileManager {
    shared_dir: PathBuf,
    download_dir: PathBuf,
}

impl FileManager {
    pub async fn new(shared_dir: PathBuf, download_dir: PathBuf) -> Result<Self> {
        if !async_fs::metadata(&shared_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(P2PError::ConfigError(format!(
                "Shared directory '{}' not found or invalid",
                shared_dir.display()
            )));
        }

        Ok(Self {
            shared_dir,
            download_dir,
        })
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Immediate regular files of the shared directory, sorted by name.
    pub async fn list_entries(&self) -> Result<Vec<FileEntry>> {
        let mut entries = async_fs::read_dir(&self.shared_dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory: {}", e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory entry: {}", e)))?
        {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.chars().any(char::is_whitespace) {
                warn!("Skipping '{}': names with whitespace cannot be shared", name);
                continue;
            }

            files.push(FileEntry {
                name,
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} shared files", files.len());
        Ok(files)
    }

    /// Contents of a shared file, or `None` when it does not exist or the
    /// name tries to leave the shared directory.
    pub async fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(path) = confine(&self.shared_dir, name) else {
            warn!("Refusing to serve '{}'", name);
            return Ok(None);
        };

        match async_fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => return Ok(None),
        }

        let content = async_fs::read(&path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read file: {}", e)))?;
        Ok(Some(content))
    }

    /// Write a downloaded file under its own name and return the final path.
    pub async fn store_download(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = confine(&self.download_dir, name).ok_or_else(|| {
            P2PError::DownloadError(format!("Refusing to store file named '{}'", name))
        })?;

        async_fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create directory: {}", e)))?;

        let mut file = async_fs::File::create(&path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create output file: {}", e)))?;
        file.write_all(data)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to write file: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to flush file: {}", e)))?;

        info!("Stored {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }
}

/// Join `name` onto `dir` only if it is a single plain file name.
fn confine(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Some(dir.join(part)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager(dir: &tempfile::TempDir) -> FileManager {
        FileManager::new(dir.path().to_path_buf(), dir.path().join("downloads"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rejects_missing_shared_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileManager::new(dir.path().join("nope"), dir.path().to_path_buf()).await;
        assert!(matches!(result, Err(P2PError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_lists_regular_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("with space.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let entries = manager(&dir).await.list_entries().await.unwrap();
        assert_eq!(
            entries,
            vec![
                FileEntry { name: "a.txt".into(), size: 5 },
                FileEntry { name: "b.txt".into(), size: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let fm = manager(&dir).await;

        assert_eq!(fm.read_file("a.txt").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(fm.read_file("missing.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_file_stays_inside_shared_dir() {
        let outer = tempfile::tempdir().unwrap();
        let shared = outer.path().join("shared");
        std::fs::create_dir(&shared).unwrap();
        std::fs::write(outer.path().join("secret"), b"s3cr3t").unwrap();

        let fm = FileManager::new(shared, outer.path().join("dl")).await.unwrap();
        for name in ["../secret", "/etc/passwd", "", ".", "a/b"] {
            assert_eq!(fm.read_file(name).await.unwrap(), None, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_store_download_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fm = manager(&dir).await;

        let path = fm.store_download("got.bin", &[0, 1, 2]).await.unwrap();
        assert_eq!(path, dir.path().join("downloads").join("got.bin"));
        assert_eq!(std::fs::read(path).unwrap(), vec![0, 1, 2]);

        assert!(matches!(
            fm.store_download("../escape", b"x").await,
            Err(P2PError::DownloadError(_))
        ));
    }
}
