//! LUN slot allocation
//!
//! Maps mounted items onto the gadget's LUN slots. Occupancy is always read
//! live from the slot tree - caching a slot table would diverge from kernel
//! truth after an app restart or manual intervention.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::configfs::GadgetPaths;
use super::surface::ControlSurface;
use crate::error::{AppError, Result};

/// Hardware descriptor limit on the SCSI inquiry string
pub const INQUIRY_MAX_CHARS: usize = 16;

/// One slot's desired configuration
#[derive(Debug, Clone)]
pub struct MountRequest {
    /// Backing image exposed to the host
    pub backing: PathBuf,
    /// Host-visible inquiry string (truncated on write)
    pub inquiry: String,
    /// Read-only flag
    pub read_only: bool,
}

impl MountRequest {
    /// ISO images are never writable by the host
    pub fn iso(backing: PathBuf, name: &str) -> Self {
        Self {
            backing,
            inquiry: name.to_string(),
            read_only: true,
        }
    }

    /// Read-write disk image
    pub fn disk(backing: PathBuf, name: &str) -> Self {
        Self {
            backing,
            inquiry: name.to_string(),
            read_only: false,
        }
    }
}

/// Occupancy of one existing LUN slot
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub lun: u32,
    pub backing: Option<PathBuf>,
}

/// Finds, configures and releases LUN slots
///
/// Callers must serialize mount/eject; the allocator itself accepts the
/// scan-to-claim race and relies on the owning service's operation lock.
pub struct LunAllocator {
    surface: Arc<dyn ControlSurface>,
    paths: GadgetPaths,
}

impl Clone for LunAllocator {
    fn clone(&self) -> Self {
        Self {
            surface: self.surface.clone(),
            paths: self.paths.clone(),
        }
    }
}

impl LunAllocator {
    pub fn new(surface: Arc<dyn ControlSurface>, paths: GadgetPaths) -> Self {
        Self { surface, paths }
    }

    /// Mount a backing image into the first free slot below `max_devices`.
    ///
    /// All other attributes are written before the backing file: the file
    /// write is what exposes the LUN to the host, so everything else must
    /// already be correct when it lands.
    pub fn mount(&self, request: &MountRequest, max_devices: u32) -> Result<u32> {
        let lun = self.find_free(max_devices)?;

        let ro = if request.read_only { "1" } else { "0" };
        self.surface.write_attr(&self.paths.lun_attr(lun, "ro"), ro)?;
        self.surface
            .write_attr(&self.paths.lun_attr(lun, "removable"), "1")?;
        self.surface.write_attr(
            &self.paths.lun_attr(lun, "inquiry_string"),
            &truncate_inquiry(&request.inquiry),
        )?;
        self.surface.write_attr(
            &self.paths.lun_attr(lun, "file"),
            &request.backing.to_string_lossy(),
        )?;

        info!(
            "LUN {} mounted: {} (ro={})",
            lun,
            request.backing.display(),
            ro
        );
        Ok(lun)
    }

    /// Clear a slot's backing file.
    ///
    /// The slot itself stays; it is only removed during a full disable.
    /// Ejecting an already-empty slot is indistinguishable from a fresh
    /// eject and equally harmless.
    pub fn eject(&self, lun: u32) -> Result<()> {
        let file_attr = self.paths.lun_attr(lun, "file");
        if !self.surface.exists(&file_attr) {
            return Err(AppError::NotFound(format!("LUN {} does not exist", lun)));
        }
        self.surface.write_attr(&file_attr, "")?;
        info!("LUN {} ejected", lun);
        Ok(())
    }

    /// Current backing file of a slot, if occupied
    pub fn backing_file(&self, lun: u32) -> Option<PathBuf> {
        let content = self
            .surface
            .read_attr(&self.paths.lun_attr(lun, "file"))
            .ok()?;
        let content = content.trim();
        if content.is_empty() {
            None
        } else {
            Some(PathBuf::from(content))
        }
    }

    /// Live occupancy of the slots in `[0, max_devices)` that exist
    pub fn slots(&self, max_devices: u32) -> Vec<SlotInfo> {
        (0..max_devices)
            .filter(|lun| self.surface.exists(&self.paths.lun_attr(*lun, "file")))
            .map(|lun| SlotInfo {
                lun,
                backing: self.backing_file(lun),
            })
            .collect()
    }

    /// Lowest-index-first scan for a free slot.
    ///
    /// A slot is free iff its backing-file attribute exists and is
    /// empty/whitespace-only; slots the gadget never created are skipped so
    /// an enlarged `max_devices` cannot fabricate indices past the
    /// configured slot count.
    fn find_free(&self, max_devices: u32) -> Result<u32> {
        for lun in 0..max_devices {
            let file_attr = self.paths.lun_attr(lun, "file");
            if !self.surface.exists(&file_attr) {
                debug!("LUN {} not initialized, skipping", lun);
                continue;
            }
            match self.surface.read_attr(&file_attr) {
                Ok(content) if content.trim().is_empty() => return Ok(lun),
                _ => continue,
            }
        }
        Err(AppError::NoFreeSlot)
    }
}

/// Truncate a display name to the inquiry-string limit
fn truncate_inquiry(name: &str) -> String {
    name.chars().take(INQUIRY_MAX_CHARS).collect()
}

/// Backing path for a disk image named `name` inside `folder`
pub fn disk_image_path(folder: &Path, name: &str) -> PathBuf {
    folder.join(format!("{}.img", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::controller::GadgetController;
    use crate::gadget::surface::FsSurface;
    use tempfile::TempDir;

    fn setup(dir: &TempDir, max_devices: u32) -> (Arc<dyn ControlSurface>, GadgetPaths) {
        let surface: Arc<dyn ControlSurface> = Arc::new(FsSurface::new(dir.path()));
        let paths = GadgetPaths::new(dir.path());
        surface
            .create_dir(&paths.udc_class_dir().join("dummy_udc"))
            .unwrap();
        GadgetController::new(surface.clone(), paths.clone())
            .enable(max_devices)
            .unwrap();
        (surface, paths)
    }

    #[test]
    fn test_mount_eject_round_trip() {
        let dir = TempDir::new().unwrap();
        let (surface, paths) = setup(&dir, 2);
        let alloc = LunAllocator::new(surface.clone(), paths.clone());

        let request = MountRequest::iso(PathBuf::from("/sdcard/boot.iso"), "boot");
        let lun = alloc.mount(&request, 2).unwrap();
        assert_eq!(lun, 0);
        assert_eq!(
            alloc.backing_file(0),
            Some(PathBuf::from("/sdcard/boot.iso"))
        );

        alloc.eject(0).unwrap();
        assert_eq!(alloc.backing_file(0), None);
        // Slot survives the eject
        assert!(surface.exists(&paths.lun_dir(0)));
        // Repeat eject is harmless
        alloc.eject(0).unwrap();
    }

    #[test]
    fn test_allocation_is_lowest_index_first() {
        let dir = TempDir::new().unwrap();
        let (_surface, paths) = setup(&dir, 3);
        let alloc = LunAllocator::new(_surface, paths);

        let a = MountRequest::iso(PathBuf::from("/a.iso"), "a");
        assert_eq!(alloc.mount(&a, 3).unwrap(), 0);

        let b = MountRequest::iso(PathBuf::from("/b.iso"), "b");
        assert_eq!(alloc.mount(&b, 3).unwrap(), 1);

        // Freeing slot 0 makes it win again
        alloc.eject(0).unwrap();
        let c = MountRequest::iso(PathBuf::from("/c.iso"), "c");
        assert_eq!(alloc.mount(&c, 3).unwrap(), 0);
    }

    #[test]
    fn test_exhausted_slots_never_fabricate_index() {
        let dir = TempDir::new().unwrap();
        let (_surface, paths) = setup(&dir, 2);
        let alloc = LunAllocator::new(_surface, paths);

        for i in 0..2 {
            let req = MountRequest::iso(PathBuf::from(format!("/img{}.iso", i)), "x");
            assert_eq!(alloc.mount(&req, 2).unwrap(), i);
        }

        let overflow = MountRequest::iso(PathBuf::from("/more.iso"), "more");
        assert!(matches!(
            alloc.mount(&overflow, 2),
            Err(AppError::NoFreeSlot)
        ));
    }

    #[test]
    fn test_scan_bound_skips_uncreated_slots() {
        let dir = TempDir::new().unwrap();
        // Gadget initialized with 1 slot, but settings were raised to 4
        // without a re-enable
        let (_surface, paths) = setup(&dir, 1);
        let alloc = LunAllocator::new(_surface, paths);

        let a = MountRequest::iso(PathBuf::from("/a.iso"), "a");
        assert_eq!(alloc.mount(&a, 4).unwrap(), 0);

        let b = MountRequest::iso(PathBuf::from("/b.iso"), "b");
        assert!(matches!(alloc.mount(&b, 4), Err(AppError::NoFreeSlot)));
    }

    #[test]
    fn test_iso_read_only_disk_read_write() {
        let dir = TempDir::new().unwrap();
        let (surface, paths) = setup(&dir, 2);
        let alloc = LunAllocator::new(surface.clone(), paths.clone());

        let iso = MountRequest::iso(PathBuf::from("/a.iso"), "a");
        let lun = alloc.mount(&iso, 2).unwrap();
        assert_eq!(surface.read_attr(&paths.lun_attr(lun, "ro")).unwrap(), "1");

        let disk = MountRequest::disk(PathBuf::from("/imgs/d.img"), "d");
        let lun = alloc.mount(&disk, 2).unwrap();
        assert_eq!(surface.read_attr(&paths.lun_attr(lun, "ro")).unwrap(), "0");
        assert_eq!(
            surface
                .read_attr(&paths.lun_attr(lun, "removable"))
                .unwrap(),
            "1"
        );
    }

    #[test]
    fn test_ro_overrides_prior_slot_state() {
        let dir = TempDir::new().unwrap();
        let (surface, paths) = setup(&dir, 1);
        let alloc = LunAllocator::new(surface.clone(), paths.clone());

        let disk = MountRequest::disk(PathBuf::from("/d.img"), "d");
        alloc.mount(&disk, 1).unwrap();
        alloc.eject(0).unwrap();

        let iso = MountRequest::iso(PathBuf::from("/a.iso"), "a");
        alloc.mount(&iso, 1).unwrap();
        assert_eq!(surface.read_attr(&paths.lun_attr(0, "ro")).unwrap(), "1");
    }

    #[test]
    fn test_inquiry_string_truncated_to_sixteen() {
        let dir = TempDir::new().unwrap();
        let (surface, paths) = setup(&dir, 1);
        let alloc = LunAllocator::new(surface.clone(), paths.clone());

        let req = MountRequest::iso(
            PathBuf::from("/a.iso"),
            "A Very Long Display Name Indeed",
        );
        alloc.mount(&req, 1).unwrap();

        let inquiry = surface
            .read_attr(&paths.lun_attr(0, "inquiry_string"))
            .unwrap();
        assert_eq!(inquiry.chars().count(), INQUIRY_MAX_CHARS);
        assert_eq!(inquiry, "A Very Long Disp");
    }

    #[test]
    fn test_eject_unknown_slot_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (_surface, paths) = setup(&dir, 1);
        let alloc = LunAllocator::new(_surface, paths);

        assert!(matches!(alloc.eject(7), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_disk_image_path() {
        assert_eq!(
            disk_image_path(Path::new("/sdcard/images"), "disk1"),
            PathBuf::from("/sdcard/images/disk1.img")
        );
    }
}
