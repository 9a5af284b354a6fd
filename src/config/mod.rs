mod ascii;
mod engine;
mod http;
mod logging;
mod master;
mod rtu;
mod tcp;
mod types;

pub use ascii::Config as AsciiConfig;
pub use engine::EngineConfig;
pub use http::Config as HttpConfig;
pub use logging::Config as LoggingConfig;
pub use master::Config as MasterConfig;
pub use rtu::Config as RtuConfig;
pub use tcp::Config as TcpConfig;
pub use types::{DataBits, Parity, RtsType, StopBits};
