/*!
 * spalink packs
 *
 * This crate holds the device-specific data-layout definitions for spa
 * firmware packs and the registry that resolves them at runtime by
 * (platform key, revision).
 */

#![warn(missing_docs)]

pub mod error;
pub mod layout;
pub mod packs;
pub mod registry;

// Re-export the types the client crate works with
pub use error::{Error, Result};
pub use layout::{Access, FieldKind, FieldSpec, PackDescriptor, StructLayout};
pub use registry::PackRegistry;

/// spalink packs crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
