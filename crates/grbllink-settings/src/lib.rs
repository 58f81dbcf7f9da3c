//! GRBLLink Settings Crate
//!
//! On-disk configuration: serial connection parameters and the timing and
//! scaling knobs of the protocol operations.

pub mod config;
pub mod error;

pub use config::{
    BatchSettings, Config, ConnectionSettings, ExecutorSettings, JogSettings,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
