//! Durable, observable catalog of user-declared disk items

pub mod store;
pub mod types;

pub use store::{CatalogChange, CatalogStore, Settings};
pub use types::{DiskItem, DiskMode};
