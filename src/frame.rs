//! Types shared by every `Transport` implementation (component B's contract types).

/// Per-variant framing state threaded through `parse`/`build`.
///
/// RTU and ASCII carry none; TCP threads the MBAP transaction id so a
/// response can echo the id of the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameContext {
    #[default]
    None,
    Tcp {
        txn_id: u16,
    },
}

impl FrameContext {
    pub fn tcp_txn_id(&self) -> Option<u16> {
        match self {
            FrameContext::Tcp { txn_id } => Some(*txn_id),
            FrameContext::None => None,
        }
    }
}

/// Result of successfully parsing a received frame: where the PDU data lives
/// within the caller's buffer, not a copy of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFrame {
    pub addr: u8,
    pub fc: u8,
    pub data_pos: usize,
    pub data_len: usize,
}

/// Result of `Transport::build`: where the caller should write PDU data
/// before calling `send`. Checksum/length finalisation happens in `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltFrame {
    pub data_pos: usize,
}
