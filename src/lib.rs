//! droid-msd - multi-LUN USB mass-storage gadget manager
//!
//! This crate turns a rooted device into a configurable USB mass-storage
//! gadget: disk images from a durable catalog are mounted into kernel
//! configfs LUN slots and show up as removable drives on the host.

pub mod catalog;
pub mod charging;
pub mod drive;
pub mod error;
pub mod events;
pub mod gadget;
pub mod image;
pub mod root;

pub use error::{AppError, Result};
