//! Firmware protocol support
//!
//! Only the GRBL dialect is implemented. The settings catalog describing the
//! standard `$n` parameters lives beside it so a UI can label a `$$` table.

pub mod grbl;
pub mod settings;

pub use settings::{catalog, describe, SettingDescriptor, SettingKind};
