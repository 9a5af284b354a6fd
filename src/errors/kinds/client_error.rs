/// Orchestration-level failures on the master side; never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    Timeout,
    InvalidRequest,
    NotConnected,
}

impl std::fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidRequest => write!(f, "invalid request"),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}
