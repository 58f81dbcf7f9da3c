//! GRBL protocol layer
//!
//! Bottom-up: [`ResponseAssembler`] turns bytes into lines, [`AckGate`]
//! enforces one command in flight, and the exchange binding glues both to a
//! transport for the duration of one operation. On top of that sit the three
//! operations: [`SingleCommandExecutor`], [`BatchCommandStreamer`] and
//! [`JogController`].

pub mod ack_gate;
pub mod assembler;
mod exchange;
pub mod executor;
pub mod jog;
pub mod settings;
pub mod status_parser;
pub mod streamer;
pub mod utils;

pub use ack_gate::AckGate;
pub use assembler::ResponseAssembler;
pub use executor::{CommandResponse, ExecutorTiming, SingleCommandExecutor};
pub use jog::{
    JogController, JogDirection, JogOutcome, JogParameters, JogReport, JogScale, JogSession,
    JogTiming, OriginCommands,
};
pub use settings::{FirmwareInfo, SettingsReader, SettingsTable};
pub use status_parser::{state_of, DeviceStatus, DeviceStatusModel, MachineState};
pub use streamer::{BatchCommandStreamer, BatchHandle, BatchJob, BatchOutcome, BatchTiming};

pub use crate::firmware::settings::{SettingDescriptor, SettingKind};
