//! # GRBLLink Communication
//!
//! Transport abstraction and the GRBL command/response synchronization layer.
//!
//! The transport side offers a byte sink plus exactly one receive-handler
//! slot. The firmware side turns that into one-shot command execution, a
//! supervised batch run with abort, and an interactive jog loop, all under a
//! strict one-command-in-flight acknowledgment discipline.

pub mod communication;
pub mod firmware;

pub use communication::{
    serial::{list_ports, SerialPortInfo, SerialTransport},
    simulated::SimulatedDevice,
    ConnectionParams, HandlerId, ReceiveHandler, SerialParity, SubscriberSlot, Subscription,
    Transport,
};

pub use firmware::{catalog, describe};

pub use firmware::grbl::{
    AckGate, BatchCommandStreamer, BatchHandle, BatchJob, BatchOutcome, BatchTiming,
    CommandResponse, DeviceStatus, DeviceStatusModel, ExecutorTiming, FirmwareInfo,
    JogController, JogDirection, JogOutcome, JogParameters, JogReport, JogScale, JogSession,
    JogTiming, MachineState, OriginCommands, ResponseAssembler, SettingDescriptor, SettingKind,
    SettingsReader, SettingsTable, SingleCommandExecutor,
};
