//! Filesystem app repository for .pkg uploads and appmanifest plists.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, ServiceError};

#[derive(Clone)]
pub struct FileRepo {
    path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppListing {
    pub name: String,
    pub payload: Option<String>,
}

impl FileRepo {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        let sanitized = sanitize(name)?;
        Ok(self.path.join(sanitized))
    }

    pub async fn save_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| ServiceError::Internal(format!("write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Apps in the repo, optionally filtered by a name substring.
    pub async fn list_apps(&self, filter: &str) -> Result<Vec<AppListing>> {
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| ServiceError::Internal(format!("read repo dir: {e}")))?;
        let mut apps = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !filter.is_empty() && !name.contains(filter) {
                continue;
            }
            apps.push(AppListing {
                name,
                payload: None,
            });
        }
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.file_path(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| ServiceError::NotFound(format!("repo file {name}")))
    }
}

fn sanitize(name: &str) -> Result<&str> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(ServiceError::BadRequest(format!("invalid file name: {name}")));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_list_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepo::new(dir.path());
        repo.save_file("app.pkg", b"pkgbytes").await.unwrap();
        repo.save_file("other.plist", b"<plist/>").await.unwrap();

        let all = repo.list_apps("").await.unwrap();
        assert_eq!(all.len(), 2);
        let filtered = repo.list_apps("app.pkg").await.unwrap();
        assert_eq!(filtered.len(), 1);

        assert_eq!(repo.read_file("app.pkg").await.unwrap(), b"pkgbytes");
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepo::new(dir.path());
        assert!(repo.save_file("../evil", b"x").await.is_err());
        assert!(repo.save_file("a/b", b"x").await.is_err());
    }
}
