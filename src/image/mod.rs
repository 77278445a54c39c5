//! Backing image file creation
//!
//! Disk-mode items expose a sparse image at `{folder}/{name}.img`; this
//! module creates those files through the privileged surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::{AppError, Result};
use crate::gadget::{disk_image_path, ControlSurface};

/// Decimal gigabyte, matching the size labels shown to the user.
/// 1 GB = 1,000,000,000 bytes - not the binary convention.
pub const GB_BYTES: f64 = 1_000_000_000.0;

/// Creates sparse backing images
pub struct ImageManager {
    surface: Arc<dyn ControlSurface>,
}

impl ImageManager {
    pub fn new(surface: Arc<dyn ControlSurface>) -> Self {
        Self { surface }
    }

    /// Create (or resize) a sparse image of exactly `size_gb` decimal
    /// gigabytes at `{folder}/{name}.img`, creating the folder if absent.
    ///
    /// Input validation happens before any privileged execution.
    pub fn create(&self, folder: &Path, name: &str, size_gb: f64) -> Result<PathBuf> {
        if folder.as_os_str().is_empty() {
            return Err(AppError::InvalidInput(
                "Image folder path is empty".to_string(),
            ));
        }
        if !(size_gb > 0.0) {
            return Err(AppError::InvalidInput(format!(
                "Image size must be positive, got {} GB",
                size_gb
            )));
        }
        let name = sanitize_filename(name);
        if name.is_empty() {
            return Err(AppError::InvalidInput("Invalid image name".to_string()));
        }

        let bytes = (size_gb * GB_BYTES).round() as u64;
        let path = disk_image_path(folder, &name);

        self.surface.create_dir(folder)?;
        self.surface.allocate_file(&path, bytes)?;

        info!("Created backing image: {} ({} bytes)", path.display(), bytes);
        Ok(path)
    }
}

/// Strip path separators and other hostile characters from a user-supplied
/// image name
pub fn sanitize_filename(name: &str) -> String {
    let name = name.trim();
    let name = name.replace(['/', '\\', '\0', ':', '*', '?', '"', '<', '>', '|'], "_");

    // Remove leading dots (hidden files)
    let name = name.trim_start_matches('.');

    // Limit length
    if name.len() > 255 {
        name[..255].to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::FsSurface;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ImageManager {
        let surface: Arc<dyn ControlSurface> = Arc::new(FsSurface::new(dir.path()));
        ImageManager::new(surface)
    }

    #[test]
    fn test_create_uses_decimal_gigabytes() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let folder = dir.path().join("images");

        let path = mgr.create(&folder, "disk1", 2.5).unwrap();

        assert_eq!(path, folder.join("disk1.img"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2_500_000_000);
    }

    #[test]
    fn test_create_makes_missing_folder() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let folder = dir.path().join("a/b/c");

        mgr.create(&folder, "d", 0.001).unwrap();
        assert!(folder.join("d.img").exists());
    }

    #[test]
    fn test_validation_happens_before_any_io() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        assert!(matches!(
            mgr.create(Path::new(""), "disk1", 1.0),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            mgr.create(dir.path(), "disk1", 0.0),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            mgr.create(dir.path(), "disk1", -2.0),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            mgr.create(dir.path(), "...", 1.0),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("disk1"), "disk1");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("a:b*c"), "a_b_c");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }
}
