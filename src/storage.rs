use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGE_DIR: &str = "./images";

/// Where published images live. `put` returns the reference to publish.
pub trait ImageStore: Send + Sync {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<String>;

    /// `Ok(None)` when nothing is stored under `name`.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Flat directory of JPEG files.
pub struct DirImageStore {
    root: PathBuf,
}

impl DirImageStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create image directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_image_name(name)?;
        Ok(self.root.join(name))
    }
}

impl ImageStore for DirImageStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(name)?;
        std::fs::write(&path, bytes).with_context(|| format!("write image {}", path.display()))?;
        Ok(name.to_string())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow!("read image {}: {}", path.display(), err)),
        }
    }
}

/// Names are single path components: ascii letters, digits, `_`, `-` and `.`,
/// not starting with a dot.
pub fn validate_image_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 {
        return Err(anyhow!("image name must be 1..=128 characters"));
    }
    if name.starts_with('.') {
        return Err(anyhow!("image name must not start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(anyhow!("image name '{}' has unsupported characters", name));
    }
    Ok(())
}
