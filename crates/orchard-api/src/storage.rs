use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

use orchard_db::FileStore;

/// 10 MiB upload limit for images
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Accepted upload types, detected from the leading bytes. Anything else is
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// Detect the type from magic bytes; the client's declared type is ignored.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(PNG) {
            Some(Self::Png)
        } else {
            None
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Upload directory on local disk. Stored paths are `<dir>/<uuid>.<ext>`.
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub async fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Image uploads stored in {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the upload under a fresh name and return the path to record.
    pub async fn save(&self, bytes: &[u8], kind: ImageKind) -> std::io::Result<String> {
        let file_name = format!("{}.{}", Uuid::new_v4(), kind.extension());
        let path = self.dir.join(file_name);

        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            error!("Failed to create file {}: {}", path.display(), e);
            e
        })?;
        file.write_all(bytes).await?;
        file.flush().await?;

        Ok(path.to_string_lossy().into_owned())
    }

    /// Best-effort cleanup of a file whose record could not be written.
    pub async fn discard(&self, path: &str) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            error!("Failed to remove orphaned upload {}: {}", path, e);
        }
    }
}

impl FileStore for ImageStore {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }

    fn remove(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}
