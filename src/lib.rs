pub mod client;
pub mod codec;
pub mod config;
pub mod errors;
pub mod frame;
pub mod handler;
pub mod http_api;
pub mod pdu;
pub mod registers;
pub mod server;
pub mod transport;

pub use client::ModbusClient;
pub use config::{AsciiConfig, EngineConfig, HttpConfig, LoggingConfig, MasterConfig, RtuConfig, TcpConfig};
pub use config::{DataBits, Parity, RtsType, StopBits};
pub use errors::{
    ClientErrorKind, ConfigValidationError, FrameError, FrameFormatKind, FrameSizeKind, IoOperation,
    ModbusError, ProtocolErrorKind, RtsError, SerialErrorKind, TransportError,
};
pub use frame::{BuiltFrame, FrameContext, ParsedFrame};
pub use handler::{DeviceIdentityProvider, RequestHandler};
pub use http_api::start_http_server;
pub use registers::{InMemoryRegisters, StaticIdentity};
pub use server::{ModbusServer, ServerStatsSnapshot};
pub use transport::{AsciiTransport, LineDirection, RtuTransport, TcpTransport, Transport};
