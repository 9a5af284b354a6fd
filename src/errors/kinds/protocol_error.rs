/// Modbus exception codes (Application Protocol v1.1b, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolErrorKind {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "illegal function"),
            Self::IllegalDataAddress => write!(f, "illegal data address"),
            Self::IllegalDataValue => write!(f, "illegal data value"),
            Self::ServerDeviceFailure => write!(f, "server device failure"),
            Self::Acknowledge => write!(f, "acknowledge"),
            Self::ServerBusy => write!(f, "server device busy"),
            Self::MemoryParityError => write!(f, "memory parity error"),
            Self::GatewayPathUnavailable => write!(f, "gateway path unavailable"),
            Self::GatewayTargetFailedToRespond => {
                write!(f, "gateway target device failed to respond")
            }
        }
    }
}

impl ProtocolErrorKind {
    pub fn to_exception_code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerBusy => 0x06,
            Self::MemoryParityError => 0x08,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetFailedToRespond => 0x0B,
        }
    }

    pub fn from_exception_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::ServerBusy),
            0x08 => Some(Self::MemoryParityError),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailedToRespond),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_code_round_trips() {
        for kind in [
            ProtocolErrorKind::IllegalFunction,
            ProtocolErrorKind::IllegalDataAddress,
            ProtocolErrorKind::IllegalDataValue,
            ProtocolErrorKind::ServerDeviceFailure,
            ProtocolErrorKind::Acknowledge,
            ProtocolErrorKind::ServerBusy,
            ProtocolErrorKind::MemoryParityError,
            ProtocolErrorKind::GatewayPathUnavailable,
            ProtocolErrorKind::GatewayTargetFailedToRespond,
        ] {
            let code = kind.to_exception_code();
            assert_eq!(ProtocolErrorKind::from_exception_code(code), Some(kind));
        }
    }

    #[test]
    fn unknown_code_maps_to_none() {
        assert_eq!(ProtocolErrorKind::from_exception_code(0x99), None);
    }
}
