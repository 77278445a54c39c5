//! Charging suspend control
//!
//! Toggles the kernel power-input-suspend flag through the same privileged
//! surface as the gadget. Fully orthogonal to gadget/LUN state.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::Result;
use crate::gadget::ControlSurface;

/// Charging suspend controller
///
/// The kernel attribute is the source of truth; the cached flag exists only
/// so observers can render state without a privileged read, and is updated
/// exclusively on successful reads/writes.
pub struct ChargingController {
    surface: Arc<dyn ControlSurface>,
    attr: PathBuf,
    suspended: RwLock<bool>,
}

impl ChargingController {
    pub fn new(surface: Arc<dyn ControlSurface>, attr: PathBuf) -> Self {
        Self {
            surface,
            attr,
            suspended: RwLock::new(false),
        }
    }

    /// Read the live suspend state from the kernel attribute.
    ///
    /// True iff the value parses as the integer 1; anything else, including
    /// an unreadable attribute, is false.
    pub fn read(&self) -> bool {
        match self.surface.read_attr(&self.attr) {
            Ok(value) => value.trim() == "1",
            Err(_) => false,
        }
    }

    /// Read the live state and refresh the cached flag
    pub fn refresh(&self) -> bool {
        let suspended = self.read();
        *self.suspended.write() = suspended;
        suspended
    }

    /// Write the suspend flag.
    ///
    /// A failed write leaves the cached flag untouched.
    pub fn set(&self, suspend: bool) -> Result<()> {
        self.surface
            .write_attr(&self.attr, if suspend { "1" } else { "0" })?;
        *self.suspended.write() = suspend;
        info!("Charging suspend set to {}", suspend);
        Ok(())
    }

    /// Last known state (no privileged read)
    pub fn cached(&self) -> bool {
        *self.suspended.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::FsSurface;
    use tempfile::TempDir;

    fn controller(dir: &TempDir) -> ChargingController {
        let surface: Arc<dyn ControlSurface> = Arc::new(FsSurface::new(dir.path()));
        ChargingController::new(surface, dir.path().join("input_suspend"))
    }

    #[test]
    fn test_set_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir);

        ctl.set(true).unwrap();
        assert!(ctl.read());
        assert!(ctl.cached());

        ctl.set(false).unwrap();
        assert!(!ctl.read());
        assert!(!ctl.cached());
    }

    #[test]
    fn test_unreadable_attribute_is_false() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir);
        assert!(!ctl.read());
    }

    #[test]
    fn test_garbage_value_is_false() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir);
        std::fs::write(dir.path().join("input_suspend"), "enabled\n").unwrap();
        assert!(!ctl.read());
    }

    #[test]
    fn test_failed_write_leaves_cache_unchanged() {
        let dir = TempDir::new().unwrap();
        let surface: Arc<dyn ControlSurface> = Arc::new(FsSurface::new(dir.path()));
        // Parent directory missing, so the write cannot create the file
        let ctl = ChargingController::new(surface, dir.path().join("missing/input_suspend"));

        assert!(ctl.set(true).is_err());
        assert!(!ctl.cached());
    }

    #[test]
    fn test_refresh_tracks_external_change() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir);
        ctl.set(true).unwrap();

        // Kernel-side change behind our back
        std::fs::write(dir.path().join("input_suspend"), "0\n").unwrap();
        assert!(ctl.cached());
        assert!(!ctl.refresh());
        assert!(!ctl.cached());
    }
}
