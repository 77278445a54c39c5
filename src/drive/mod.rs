//! High-level drive service
//!
//! The single entry point callers use: owns the privilege flag, the
//! operation lock and the catalog bookkeeping around every gadget mutation.

pub mod controller;

pub use controller::{DriveController, DriveStatus};
