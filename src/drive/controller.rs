//! Drive controller
//!
//! Coordinates the gadget lifecycle, LUN allocation, catalog bookkeeping and
//! the charging side-channel behind one operation lock, so no two gadget/LUN
//! mutations can ever overlap regardless of how many callers exist.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::{CatalogStore, DiskItem, DiskMode};
use crate::charging::ChargingController;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::gadget::{
    ControlSurface, GadgetController, GadgetPaths, LunAllocator, MountRequest, SlotInfo,
};
use crate::image::{sanitize_filename, ImageManager};

/// Snapshot of the control-plane state
#[derive(Debug, Clone)]
pub struct DriveStatus {
    pub rooted: bool,
    pub configured: bool,
    pub charging_suspended: bool,
    pub max_devices: u32,
    pub slots: Vec<SlotInfo>,
}

/// High-level drive service
pub struct DriveController {
    surface: Arc<dyn ControlSurface>,
    catalog: Arc<CatalogStore>,
    gadget: GadgetController,
    luns: LunAllocator,
    charging: Arc<ChargingController>,
    images: Arc<ImageManager>,
    events: Arc<EventBus>,
    /// Set once by `init`; gates every privileged call
    rooted: AtomicBool,
    /// Serializes all gadget/LUN mutations
    op_lock: Mutex<()>,
}

impl DriveController {
    pub fn new(
        surface: Arc<dyn ControlSurface>,
        paths: GadgetPaths,
        catalog: Arc<CatalogStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let charging_attr = paths.charging_attr();
        Self {
            gadget: GadgetController::new(surface.clone(), paths.clone()),
            luns: LunAllocator::new(surface.clone(), paths),
            charging: Arc::new(ChargingController::new(surface.clone(), charging_attr)),
            images: Arc::new(ImageManager::new(surface.clone())),
            surface,
            catalog,
            events,
            rooted: AtomicBool::new(false),
            op_lock: Mutex::new(()),
        }
    }

    /// Probe privilege and resynchronize with the live gadget state.
    ///
    /// Must complete before any privileged call is attempted. A failed probe
    /// is not an error - the controller starts with privileged operations
    /// gated off and the probe can be retried by calling `init` again.
    pub async fn init(&self) -> Result<()> {
        info!("Initializing drive controller");

        let surface = self.surface.clone();
        let rooted = run_blocking(move || Ok(surface.probe())).await?;
        self.rooted.store(rooted, Ordering::Release);

        if !rooted {
            warn!("Root privilege unavailable; privileged operations disabled");
            return Ok(());
        }
        self.resync().await
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted.load(Ordering::Acquire)
    }

    fn require_root(&self) -> Result<()> {
        if self.is_rooted() {
            Ok(())
        } else {
            Err(AppError::PrivilegeDenied)
        }
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Re-derive gadget state and reconcile the catalog against it.
    ///
    /// The gadget can change outside the app (reboot, other root tools), so
    /// active flags that no longer match a live slot are cleared.
    pub async fn resync(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;

        let gadget = self.gadget.clone();
        let luns = self.luns.clone();
        let charging = self.charging.clone();
        let max = self.catalog.max_devices();
        let (configured, slots) = run_blocking(move || {
            let configured = gadget.is_configured();
            let slots = luns.slots(max);
            charging.refresh();
            Ok((configured, slots))
        })
        .await?;

        for mut item in self.catalog.list().await? {
            if !item.is_active() {
                continue;
            }
            let expected = item.backing_path();
            let actual = item
                .lun_id()
                .and_then(|lun| slots.iter().find(|s| s.lun == lun))
                .and_then(|s| s.backing.clone());
            if !configured || expected.is_none() || actual != expected {
                info!("Item {} no longer mounted, clearing state", item.name);
                item.set_ejected();
                self.catalog.replace(&item).await?;
                self.events.publish(SystemEvent::ItemEjected {
                    item_id: item.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Turn the gadget on (with the configured slot count) or off
    pub async fn set_gadget_enabled(&self, enabled: bool) -> Result<()> {
        self.require_root()?;
        let _guard = self.op_lock.lock().await;

        let gadget = self.gadget.clone();
        if enabled {
            let max = self.catalog.max_devices();
            run_blocking(move || gadget.enable(max)).await?;
        } else {
            run_blocking(move || gadget.disable()).await?;
            // Disable cleared every backing file; catch the catalog up
            for mut item in self.catalog.list().await? {
                if item.is_active() {
                    item.set_ejected();
                    self.catalog.replace(&item).await?;
                    self.events.publish(SystemEvent::ItemEjected {
                        item_id: item.id.clone(),
                    });
                }
            }
        }

        self.events.publish(SystemEvent::GadgetStateChanged {
            configured: enabled,
        });
        Ok(())
    }

    /// Mount a catalog item into the first free LUN slot
    pub async fn mount_item(&self, id: &str) -> Result<u32> {
        self.require_root()?;
        let _guard = self.op_lock.lock().await;

        let mut item = self.catalog.get(id).await?;
        if item.is_active() {
            return Err(AppError::InvalidInput(format!(
                "{} is already mounted",
                item.name
            )));
        }
        let backing = item.backing_path().ok_or_else(|| {
            AppError::InvalidInput(format!("{} has no backing path", item.name))
        })?;
        let request = match item.mode {
            DiskMode::Iso => MountRequest::iso(backing, &item.name),
            DiskMode::Disk => MountRequest::disk(backing, &item.name),
        };

        let max = self.catalog.max_devices();
        let luns = self.luns.clone();
        let surface = self.surface.clone();
        let lun = run_blocking(move || {
            if !surface.exists(&request.backing) {
                return Err(AppError::NotFound(format!(
                    "Backing image not found: {}",
                    request.backing.display()
                )));
            }
            luns.mount(&request, max)
        })
        .await?;

        item.set_mounted(lun);
        self.catalog.replace(&item).await?;
        self.events.publish(SystemEvent::ItemMounted {
            item_id: item.id.clone(),
            lun_id: lun,
        });
        Ok(lun)
    }

    /// Eject a mounted catalog item
    pub async fn eject_item(&self, id: &str) -> Result<()> {
        self.require_root()?;
        let _guard = self.op_lock.lock().await;

        let mut item = self.catalog.get(id).await?;
        let lun = match item.lun_id() {
            Some(lun) => lun,
            None => {
                return Err(AppError::InvalidInput(format!(
                    "{} is not mounted",
                    item.name
                )))
            }
        };

        let luns = self.luns.clone();
        match run_blocking(move || luns.eject(lun)).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {
                // Slot vanished externally; the catalog still has to catch up
                warn!("LUN {} already gone, clearing catalog state", lun);
            }
            Err(e) => return Err(e),
        }

        item.set_ejected();
        self.catalog.replace(&item).await?;
        self.events.publish(SystemEvent::ItemEjected {
            item_id: item.id.clone(),
        });
        Ok(())
    }

    /// Declare an ISO item; the file itself is untouched
    pub async fn add_iso(&self, name: Option<&str>, path: PathBuf) -> Result<DiskItem> {
        if path.as_os_str().is_empty() {
            return Err(AppError::InvalidInput("ISO path is empty".to_string()));
        }
        let name = match name {
            Some(n) => n.to_string(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "untitled".to_string()),
        };

        let item = DiskItem::new_iso(&name, path);
        self.catalog.append(&item).await?;
        self.events.publish(SystemEvent::CatalogChanged);
        Ok(item)
    }

    /// Create a backing image and declare the matching Disk item
    pub async fn add_disk(&self, name: &str, folder: PathBuf, size_gb: f64) -> Result<DiskItem> {
        self.require_root()?;

        let clean = sanitize_filename(name);
        if clean.is_empty() {
            return Err(AppError::InvalidInput("Invalid image name".to_string()));
        }

        let images = self.images.clone();
        let create_folder = folder.clone();
        let create_name = clean.clone();
        run_blocking(move || images.create(&create_folder, &create_name, size_gb).map(|_| ()))
            .await?;

        let item = DiskItem::new_disk(&clean, folder, size_gb);
        self.catalog.append(&item).await?;
        self.events.publish(SystemEvent::CatalogChanged);
        Ok(item)
    }

    /// Remove an inactive item from the catalog
    pub async fn remove_item(&self, id: &str) -> Result<()> {
        self.catalog.remove(id).await?;
        self.events.publish(SystemEvent::CatalogChanged);
        Ok(())
    }

    pub async fn set_max_devices(&self, count: u32) -> Result<u32> {
        self.catalog.set_max_devices(count).await
    }

    /// Live charging suspend state.
    ///
    /// Without privilege this is always false and the kernel attribute is
    /// never touched.
    pub async fn charging_state(&self) -> bool {
        if !self.is_rooted() {
            return false;
        }
        let charging = self.charging.clone();
        tokio::task::spawn_blocking(move || charging.refresh())
            .await
            .unwrap_or(false)
    }

    pub async fn set_charging(&self, suspend: bool) -> Result<()> {
        self.require_root()?;
        let charging = self.charging.clone();
        run_blocking(move || charging.set(suspend)).await?;
        self.events.publish(SystemEvent::ChargingStateChanged {
            suspended: suspend,
        });
        Ok(())
    }

    /// Snapshot of the whole control plane
    pub async fn status(&self) -> Result<DriveStatus> {
        let max_devices = self.catalog.max_devices();
        if !self.is_rooted() {
            return Ok(DriveStatus {
                rooted: false,
                configured: false,
                charging_suspended: false,
                max_devices,
                slots: Vec::new(),
            });
        }

        let gadget = self.gadget.clone();
        let luns = self.luns.clone();
        let charging = self.charging.clone();
        let (configured, slots, charging_suspended) = run_blocking(move || {
            Ok((
                gadget.is_configured(),
                luns.slots(max_devices),
                charging.refresh(),
            ))
        })
        .await?;

        Ok(DriveStatus {
            rooted: true,
            configured,
            charging_suspended,
            max_devices,
            slots,
        })
    }
}

/// Run blocking privileged work on the blocking pool
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
}
