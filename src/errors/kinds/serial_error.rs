#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialErrorKind {
    OpenFailed,
    ReadFailed,
    WriteFailed,
    ConfigurationFailed,
    Disconnected,
}

impl std::fmt::Display for SerialErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenFailed => write!(f, "failed to open port"),
            Self::ReadFailed => write!(f, "failed to read from port"),
            Self::WriteFailed => write!(f, "failed to write to port"),
            Self::ConfigurationFailed => write!(f, "failed to configure port"),
            Self::Disconnected => write!(f, "port disconnected"),
        }
    }
}
