use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure kind the protocol engine can produce, scoped to the
/// smallest component that can still make progress around it (see the
/// propagation rules in the crate's design notes).
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    #[error("malformed frame")]
    FrameMalformed,

    #[error("frame length mismatch: header said {0} and {1}")]
    FrameLengthMismatch(u8, u8),

    #[error("frame checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    FrameChecksum { expected: u16, computed: u16 },

    #[error("fragment inconsistent with in-progress response")]
    FragmentInconsistent,

    /// Raised by `bytes_cursor::Cursor` when a field runs past the end of
    /// its buffer. Frame-layer-independent: callers map this into their
    /// own component's error kind rather than letting it surface as-is.
    #[error("truncated field: wanted {wanted} bytes, {available} remaining")]
    Truncated { wanted: usize, available: usize },

    #[error("unknown channel primary type {0}")]
    ChannelUnknownType(u8),

    #[error("malformed channel descriptor payload: {0}")]
    ChannelMalformed(String),

    #[error("malformed sample payload: {0}")]
    SampleMalformed(String),

    #[error("no response from device")]
    NoResponse,

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
}
