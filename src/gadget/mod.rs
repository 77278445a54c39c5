//! USB mass-storage gadget control plane
//!
//! Owns everything that touches the kernel gadget tree:
//!
//! ```text
//! DriveController (high-level coordination)
//!     ├── GadgetController (gadget on/off, controller rebind)
//!     └── LunAllocator (slot scan, mount, eject)
//!             └── ControlSurface (privileged fs primitives)
//!                     ├── FsSurface (process is root / test temp root)
//!                     └── ShellSurface (su-routed primitives)
//! ```
//!
//! The controller and allocator are deliberately lock-free; the owning
//! `DriveController` serializes every mutation behind its operation lock.

pub mod configfs;
pub mod controller;
pub mod lun;
pub mod surface;

pub use configfs::GadgetPaths;
pub use controller::GadgetController;
pub use lun::{disk_image_path, LunAllocator, MountRequest, SlotInfo, INQUIRY_MAX_CHARS};
pub use surface::{ControlSurface, FsSurface, ShellSurface};
