//! Catalog data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::gadget::disk_image_path;

/// How an item is exposed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskMode {
    /// Read-only optical image; `path` is the image file itself
    Iso,
    /// Read-write disk image; `path` is the containing folder
    Disk,
}

impl DiskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskMode::Iso => "iso",
            DiskMode::Disk => "disk",
        }
    }
}

impl std::str::FromStr for DiskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iso" => Ok(DiskMode::Iso),
            "disk" => Ok(DiskMode::Disk),
            other => Err(format!("unknown disk mode: {}", other)),
        }
    }
}

/// One user-declared disk item
///
/// `active` and `lun_id` always move together: an item is active iff it has
/// an assigned LUN. The pair is private and only mutated through
/// [`DiskItem::set_mounted`] / [`DiskItem::set_ejected`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskItem {
    pub id: String,
    pub name: String,
    pub mode: DiskMode,
    /// Image file for Iso mode, containing folder for Disk mode
    pub path: Option<PathBuf>,
    active: bool,
    lun_id: Option<u32>,
    /// Decimal gigabytes, Disk mode only
    pub disk_size_gb: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl DiskItem {
    pub fn new_iso(name: &str, path: PathBuf) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            mode: DiskMode::Iso,
            path: Some(path),
            active: false,
            lun_id: None,
            disk_size_gb: None,
            created_at: Utc::now(),
        }
    }

    pub fn new_disk(name: &str, folder: PathBuf, size_gb: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            mode: DiskMode::Disk,
            path: Some(folder),
            active: false,
            lun_id: None,
            disk_size_gb: Some(size_gb),
            created_at: Utc::now(),
        }
    }

    /// Reconstruct from a persisted row
    pub(crate) fn from_row(
        id: String,
        name: String,
        mode: DiskMode,
        path: Option<PathBuf>,
        lun_id: Option<u32>,
        disk_size_gb: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            mode,
            path,
            active: lun_id.is_some(),
            lun_id,
            disk_size_gb,
            created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn lun_id(&self) -> Option<u32> {
        self.lun_id
    }

    pub fn set_mounted(&mut self, lun: u32) {
        self.active = true;
        self.lun_id = Some(lun);
    }

    pub fn set_ejected(&mut self) {
        self.active = false;
        self.lun_id = None;
    }

    /// The file actually exposed to the host.
    ///
    /// Iso mode exposes `path` verbatim; Disk mode exposes
    /// `{path}/{name}.img`, which must have been created beforehand.
    pub fn backing_path(&self) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        match self.mode {
            DiskMode::Iso => Some(path.clone()),
            DiskMode::Disk => Some(disk_image_path(path, &self.name)),
        }
    }

    /// Format the declared size for display
    pub fn size_display(&self) -> String {
        match self.disk_size_gb {
            Some(gb) => format!("{:.1} GB", gb),
            None => "-".to_string(),
        }
    }
}
