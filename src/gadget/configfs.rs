//! ConfigFS path layout for the USB mass-storage gadget
//!
//! All paths are derived from a configurable filesystem root so the whole
//! control plane can be pointed at a temp directory under test.

use std::path::{Path, PathBuf};

/// ConfigFS base path for USB gadgets, relative to the filesystem root
pub const CONFIGFS_GADGET_DIR: &str = "sys/kernel/config/usb_gadget";

/// UDC class directory (read: present controller name)
pub const UDC_CLASS_DIR: &str = "sys/class/udc";

/// Default gadget name (the platform-provided gadget on Android)
pub const DEFAULT_GADGET_NAME: &str = "g1";

/// Mass-storage function instance name
pub const FUNCTION_NAME: &str = "mass_storage.0";

/// Configuration name within the gadget
pub const CONFIG_NAME: &str = "c.1";

/// USB profile attribute (write: "none" or the default profile)
pub const USB_PROFILE_ATTR: &str = "sys/class/android_usb/android0/functions";

/// Kernel power-input-suspend attribute
pub const CHARGING_ATTR: &str = "sys/class/power_supply/battery/input_suspend";

/// Resolved gadget control-surface paths
#[derive(Debug, Clone)]
pub struct GadgetPaths {
    root: PathBuf,
    gadget: String,
}

impl GadgetPaths {
    /// Layout under the given filesystem root ("/" in production)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            gadget: DEFAULT_GADGET_NAME.to_string(),
        }
    }

    /// Layout for a non-default gadget name
    pub fn with_gadget(root: impl Into<PathBuf>, gadget: &str) -> Self {
        Self {
            root: root.into(),
            gadget: gadget.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Gadget directory in ConfigFS
    pub fn gadget_dir(&self) -> PathBuf {
        self.root.join(CONFIGFS_GADGET_DIR).join(&self.gadget)
    }

    /// UDC bind attribute of the gadget
    pub fn udc_attr(&self) -> PathBuf {
        self.gadget_dir().join("UDC")
    }

    /// UDC class directory listing the present controller
    pub fn udc_class_dir(&self) -> PathBuf {
        self.root.join(UDC_CLASS_DIR)
    }

    /// Active USB configuration directory
    pub fn config_dir(&self) -> PathBuf {
        self.gadget_dir().join("configs").join(CONFIG_NAME)
    }

    /// Mass-storage function directory
    pub fn function_dir(&self) -> PathBuf {
        self.gadget_dir().join("functions").join(FUNCTION_NAME)
    }

    /// Symlink binding the function into the active configuration
    pub fn function_link(&self) -> PathBuf {
        self.config_dir().join(FUNCTION_NAME)
    }

    /// LUN slot directory
    pub fn lun_dir(&self, lun: u32) -> PathBuf {
        self.function_dir().join(format!("lun.{}", lun))
    }

    /// Attribute file within a LUN slot
    pub fn lun_attr(&self, lun: u32, attr: &str) -> PathBuf {
        self.lun_dir(lun).join(attr)
    }

    /// USB mode/profile attribute
    pub fn usb_profile_attr(&self) -> PathBuf {
        self.root.join(USB_PROFILE_ATTR)
    }

    /// Power-input-suspend attribute
    pub fn charging_attr(&self) -> PathBuf {
        self.root.join(CHARGING_ATTR)
    }
}
