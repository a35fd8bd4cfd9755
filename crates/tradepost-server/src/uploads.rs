use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::ServerError;

/// URL prefix the upload directory is served under.
pub const PUBLIC_PREFIX: &str = "uploads";

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// Reduce a client-supplied file name to its final component.
fn sanitize_file_name(name: &str) -> Result<String, ServerError> {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(char::is_control);

    if last.is_empty() || last == "." || last == ".." {
        return Err(ServerError::BadRequest("Invalid file name".to_string()));
    }
    Ok(last.to_string())
}

/// Files shared in conversations, stored as `files/<epoch-millis>/<name>`.
#[derive(Debug, Clone)]
pub struct UploadStore {
    base_path: PathBuf,
    max_size: usize,
}

impl UploadStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(base_path.join("files")).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Upload store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write `data` and return the public path it is served under,
    /// e.g. `uploads/files/1718000000000/price-list.pdf`.
    pub async fn store_file(&self, file_name: &str, data: &[u8]) -> Result<String, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let name = sanitize_file_name(file_name)?;

        // Same name in the same millisecond moves to the next free slot.
        // Slots are claimed with `create_new`; a concurrent upload never shares a file.
        let mut millis = chrono::Utc::now().timestamp_millis();
        let (path, mut file) = loop {
            let relative = PathBuf::from("files").join(millis.to_string()).join(&name);
            let path = ensure_within(&self.base_path, &self.base_path.join(&relative))?;
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).await.map_err(|e| {
                    ServerError::Internal(format!("Failed to create upload directory: {e}"))
                })?;
            }
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(e) => {
                    return Err(ServerError::Internal(format!(
                        "Failed to create upload {name}: {e}"
                    )))
                }
            }
        };

        let written = async {
            file.write_all(data).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&path).await;
            return Err(ServerError::Internal(format!("Failed to write upload {name}: {e}")));
        }

        let public = format!("{PUBLIC_PREFIX}/files/{millis}/{name}");
        debug!(path = %public, size = data.len(), "Stored upload");
        Ok(public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (UploadStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_file_layout() {
        let (store, dir) = test_store().await;

        let public = store.store_file("catalogue.pdf", b"%PDF-1.7").await.unwrap();
        assert!(public.starts_with("uploads/files/"));
        assert!(public.ends_with("/catalogue.pdf"));

        let on_disk = dir.path().join(public.trim_start_matches("uploads/"));
        assert_eq!(std::fs::read(on_disk).unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn test_same_name_does_not_overwrite() {
        let (store, _dir) = test_store().await;

        let first = store.store_file("a.txt", b"one").await.unwrap();
        let second = store.store_file("a.txt", b"two").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_name_uploads_get_distinct_files() {
        let (store, dir) = test_store().await;

        for round in 0..25 {
            let first_body = format!("first-{round}");
            let second_body = format!("second-{round}");
            let (first, second) = tokio::join!(
                tokio::spawn({
                    let store = store.clone();
                    let body = first_body.clone();
                    async move { store.store_file("same.txt", body.as_bytes()).await }
                }),
                tokio::spawn({
                    let store = store.clone();
                    let body = second_body.clone();
                    async move { store.store_file("same.txt", body.as_bytes()).await }
                }),
            );
            let first = first.unwrap().unwrap();
            let second = second.unwrap().unwrap();
            assert_ne!(first, second, "round {round}");

            let read = |public: &str| {
                std::fs::read_to_string(dir.path().join(public.trim_start_matches("uploads/")))
                    .unwrap()
            };
            assert_eq!(read(&first), first_body);
            assert_eq!(read(&second), second_body);
        }
    }

    #[tokio::test]
    async fn test_traversal_names_are_flattened() {
        let (store, dir) = test_store().await;

        let public = store.store_file("../../etc/passwd", b"x").await.unwrap();
        assert!(public.ends_with("/passwd"));
        assert!(dir.path().join(public.trim_start_matches("uploads/")).exists());

        assert!(store.store_file("..", b"x").await.is_err());
        assert!(store.store_file("dir/", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_size_limits() {
        let (store, _dir) = test_store().await;

        assert!(matches!(
            store.store_file("empty.bin", b"").await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            store.store_file("big.bin", &vec![0u8; 1025]).await,
            Err(ServerError::PayloadTooLarge { size: 1025, max: 1024 })
        ));
    }
}
