//! Gadget lifecycle control
//!
//! Owns the Unconfigured <-> Configured transitions of the mass-storage
//! gadget. The kernel interface may pass through transient states during a
//! rebind; the controller does not observe them - "configured" is always
//! re-derived from the function link and the UDC binding, never persisted.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::configfs::GadgetPaths;
use super::surface::ControlSurface;
use crate::error::{AppError, Result};

/// Profile restored when the gadget is disabled
pub const DEFAULT_USB_PROFILE: &str = "mtp,adb";

/// Gadget on/off controller
///
/// Callers must serialize operations; the controller itself takes no lock
/// over the control-surface filesystem.
pub struct GadgetController {
    surface: Arc<dyn ControlSurface>,
    paths: GadgetPaths,
    default_profile: String,
}

impl Clone for GadgetController {
    fn clone(&self) -> Self {
        Self {
            surface: self.surface.clone(),
            paths: self.paths.clone(),
            default_profile: self.default_profile.clone(),
        }
    }
}

impl GadgetController {
    pub fn new(surface: Arc<dyn ControlSurface>, paths: GadgetPaths) -> Self {
        Self::with_profile(surface, paths, DEFAULT_USB_PROFILE)
    }

    pub fn with_profile(
        surface: Arc<dyn ControlSurface>,
        paths: GadgetPaths,
        default_profile: &str,
    ) -> Self {
        Self {
            surface,
            paths,
            default_profile: default_profile.to_string(),
        }
    }

    /// System-reported USB controller name (first UDC class entry)
    pub fn controller_name(&self) -> Result<String> {
        self.surface
            .list_dir(&self.paths.udc_class_dir())?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("No USB device controller".to_string()))
    }

    /// True iff the function is linked into the active configuration AND the
    /// gadget is bound to the present controller.
    ///
    /// The gadget's real state can change outside the app (reboot, other
    /// root tools), so this is derived live at every call.
    pub fn is_configured(&self) -> bool {
        if !self.surface.exists(&self.paths.function_link()) {
            return false;
        }
        let bound = match self.surface.read_attr(&self.paths.udc_attr()) {
            Ok(udc) => udc,
            Err(_) => return false,
        };
        match self.controller_name() {
            Ok(name) => !bound.is_empty() && bound == name,
            Err(_) => false,
        }
    }

    /// Configure the gadget with exactly `max_devices` LUN slots.
    ///
    /// Idempotent with respect to prior state: any existing configuration is
    /// torn down first, so calling while already configured is safe.
    pub fn enable(&self, max_devices: u32) -> Result<()> {
        let max_devices = max_devices.max(1);
        info!("Enabling mass-storage gadget with {} LUNs", max_devices);

        self.unbind()?;
        self.clear_profile()?;
        self.remove_function()?;

        self.surface.create_dir(&self.paths.config_dir())?;
        self.surface.create_dir(&self.paths.function_dir())?;
        for lun in 0..max_devices {
            self.surface.create_dir(&self.paths.lun_dir(lun))?;
            self.surface
                .write_attr(&self.paths.lun_attr(lun, "removable"), "1")?;
            // Slots start unoccupied
            self.surface.write_attr(&self.paths.lun_attr(lun, "file"), "")?;
        }

        self.surface
            .symlink(&self.paths.function_dir(), &self.paths.function_link())?;
        self.bind()?;

        info!("Mass-storage gadget configured");
        Ok(())
    }

    /// Tear the gadget down and restore the default USB profile.
    ///
    /// Every LUN's backing file is cleared before anything is removed so no
    /// drive stays exposed to the host, then all slots except `lun.0` are
    /// deleted.
    pub fn disable(&self) -> Result<()> {
        info!("Disabling mass-storage gadget");

        self.unbind()?;

        for lun in self.existing_luns()? {
            let file_attr = self.paths.lun_attr(lun, "file");
            if self.surface.exists(&file_attr) {
                self.surface.write_attr(&file_attr, "")?;
            }
        }

        self.surface.remove_file(&self.paths.function_link())?;

        for lun in self.existing_luns()? {
            if lun == 0 {
                continue;
            }
            self.surface.remove_dir(&self.paths.lun_dir(lun))?;
        }

        self.restore_profile()?;
        self.bind()?;

        info!("Mass-storage gadget disabled");
        Ok(())
    }

    /// LUN slot indices currently present in the function directory
    pub fn existing_luns(&self) -> Result<Vec<u32>> {
        let func = self.paths.function_dir();
        if !self.surface.exists(&func) {
            return Ok(Vec::new());
        }
        let mut luns: Vec<u32> = self
            .surface
            .list_dir(&func)?
            .into_iter()
            .filter_map(|name| name.strip_prefix("lun.").and_then(|n| n.parse().ok()))
            .collect();
        luns.sort_unstable();
        Ok(luns)
    }

    /// Bind the gadget to the present controller
    fn bind(&self) -> Result<()> {
        let udc = self.controller_name()?;
        debug!("Binding gadget to UDC: {}", udc);
        self.surface.write_attr(&self.paths.udc_attr(), &udc)
    }

    /// Detach the gadget from the controller if bound.
    ///
    /// Rebinding a bound gadget must go through an explicit detach; no
    /// kernel-side auto-detach behavior is assumed.
    fn unbind(&self) -> Result<()> {
        let udc_attr = self.paths.udc_attr();
        if !self.surface.exists(&udc_attr) {
            return Ok(());
        }
        let bound = self.surface.read_attr(&udc_attr).unwrap_or_default();
        if !bound.is_empty() {
            debug!("Unbinding gadget from UDC: {}", bound);
            self.surface.write_attr(&udc_attr, "")?;
        }
        Ok(())
    }

    fn clear_profile(&self) -> Result<()> {
        self.write_profile("none")
    }

    fn restore_profile(&self) -> Result<()> {
        let profile = self.default_profile.clone();
        self.write_profile(&profile)
    }

    fn write_profile(&self, profile: &str) -> Result<()> {
        let attr = self.paths.usb_profile_attr();
        if !self.surface.exists(&attr) {
            debug!("No USB profile attribute, skipping");
            return Ok(());
        }
        self.surface.write_attr(&attr, profile)
    }

    /// Remove the function link and the whole function directory tree
    fn remove_function(&self) -> Result<()> {
        self.surface.remove_file(&self.paths.function_link())?;

        let func = self.paths.function_dir();
        if !self.surface.exists(&func) {
            return Ok(());
        }

        for lun in self.existing_luns()? {
            if lun == 0 {
                continue;
            }
            self.surface.remove_dir(&self.paths.lun_dir(lun))?;
        }

        // ConfigFS drops the default lun.0 group when the function directory
        // is removed; on a plain-fs mirror it has to go first.
        if self.surface.remove_dir(&func).is_err() {
            if let Err(e) = self.surface.remove_dir(&self.paths.lun_dir(0)) {
                warn!("Could not remove lun.0: {}", e);
            }
            self.surface.remove_dir(&func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::surface::FsSurface;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Arc<dyn ControlSurface>, GadgetPaths) {
        let surface: Arc<dyn ControlSurface> = Arc::new(FsSurface::new(dir.path()));
        let paths = GadgetPaths::new(dir.path());
        // Fake the bits the platform provides: a UDC entry and the profile
        // attribute
        surface.create_dir(&paths.udc_class_dir()).unwrap();
        surface
            .create_dir(&paths.udc_class_dir().join("ci_hdrc.0"))
            .unwrap();
        surface
            .create_dir(&paths.usb_profile_attr().parent().unwrap().to_path_buf())
            .unwrap();
        surface
            .write_attr(&paths.usb_profile_attr(), "mtp,adb")
            .unwrap();
        (surface, paths)
    }

    fn controller(surface: &Arc<dyn ControlSurface>, paths: &GadgetPaths) -> GadgetController {
        GadgetController::new(surface.clone(), paths.clone())
    }

    #[test]
    fn test_enable_creates_exact_lun_count() {
        let dir = TempDir::new().unwrap();
        let (surface, paths) = setup(&dir);
        let ctl = controller(&surface, &paths);

        ctl.enable(3).unwrap();

        assert_eq!(ctl.existing_luns().unwrap(), vec![0, 1, 2]);
        for lun in 0..3 {
            assert_eq!(
                surface.read_attr(&paths.lun_attr(lun, "removable")).unwrap(),
                "1"
            );
            // Fresh slots are unoccupied
            assert_eq!(surface.read_attr(&paths.lun_attr(lun, "file")).unwrap(), "");
        }
        assert!(ctl.is_configured());
    }

    #[test]
    fn test_enable_clamps_to_one() {
        let dir = TempDir::new().unwrap();
        let (_surface, paths) = setup(&dir);
        let ctl = controller(&_surface, &paths);

        ctl.enable(0).unwrap();
        assert_eq!(ctl.existing_luns().unwrap(), vec![0]);
    }

    #[test]
    fn test_enable_is_idempotent_and_resizes() {
        let dir = TempDir::new().unwrap();
        let (_surface, paths) = setup(&dir);
        let ctl = controller(&_surface, &paths);

        ctl.enable(4).unwrap();
        ctl.enable(2).unwrap();

        assert_eq!(ctl.existing_luns().unwrap(), vec![0, 1]);
        assert!(ctl.is_configured());
    }

    #[test]
    fn test_disable_leaves_only_lun_zero() {
        let dir = TempDir::new().unwrap();
        let (surface, paths) = setup(&dir);
        let ctl = controller(&surface, &paths);

        ctl.enable(3).unwrap();
        surface
            .write_attr(&paths.lun_attr(1, "file"), "/sdcard/x.iso")
            .unwrap();

        ctl.disable().unwrap();

        assert_eq!(ctl.existing_luns().unwrap(), vec![0]);
        assert_eq!(surface.read_attr(&paths.lun_attr(0, "file")).unwrap(), "");
        assert!(!ctl.is_configured());
        assert_eq!(
            surface.read_attr(&paths.usb_profile_attr()).unwrap(),
            "mtp,adb"
        );
    }

    #[test]
    fn test_disable_without_gadget_is_harmless() {
        let dir = TempDir::new().unwrap();
        let (_surface, paths) = setup(&dir);
        let ctl = controller(&_surface, &paths);

        ctl.disable().unwrap();
        assert!(!ctl.is_configured());
    }

    #[test]
    fn test_is_configured_requires_matching_udc() {
        let dir = TempDir::new().unwrap();
        let (surface, paths) = setup(&dir);
        let ctl = controller(&surface, &paths);

        ctl.enable(1).unwrap();
        assert!(ctl.is_configured());

        // External unbind (e.g. another root tool)
        surface.write_attr(&paths.udc_attr(), "").unwrap();
        assert!(!ctl.is_configured());
    }

    #[test]
    fn test_controller_name_missing_udc() {
        let dir = TempDir::new().unwrap();
        let surface: Arc<dyn ControlSurface> = Arc::new(FsSurface::new(dir.path()));
        let paths = GadgetPaths::new(dir.path());
        surface.create_dir(&paths.udc_class_dir()).unwrap();

        let ctl = GadgetController::new(surface, paths);
        assert!(matches!(
            ctl.controller_name(),
            Err(AppError::NotFound(_))
        ));
    }
}
