mod config;
mod frame;
mod io_operation;
mod kinds;
mod modbus;
mod rts;
mod transport;

pub use kinds::{ClientErrorKind, FrameFormatKind, FrameSizeKind, ProtocolErrorKind, SerialErrorKind};

pub use config::ConfigValidationError;
pub use frame::FrameError;
pub use io_operation::IoOperation;
pub use modbus::ModbusError;
pub use rts::RtsError;
pub use transport::TransportError;
