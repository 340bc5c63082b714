use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame truncated")]
    Truncated,
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("declared frame length {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("string is missing its trailing NUL")]
    MissingNul,
    #[error("string is not valid utf-8")]
    BadString,
    #[error("unknown node type {0}")]
    BadNodeType(u8),
    #[error("unexpected trailing bytes in frame body")]
    TrailingBytes,
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("string of {0} bytes exceeds the 255 byte wire limit")]
    StringTooLong(usize),
    #[error("encoded frame of {0} bytes exceeds the u16 length prefix")]
    FrameTooLarge(usize),
}

/// Wire error taxonomy. Adapters translate these to and from native error
/// codes; the protocol core only carries them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum NetError {
    Success = 0,
    AccessDenied = 1,
    NotFound = 2,
    NotAFile = 3,
    NotADirectory = 4,
    IoError = 5,
    InvalidValue = 6,
    BadRequest = 128,
    TooManyFilesOpen = 129,
    SpawnFailure = 254,
    Unknown = 255,
}

impl NetError {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::AccessDenied,
            2 => Self::NotFound,
            3 => Self::NotAFile,
            4 => Self::NotADirectory,
            5 => Self::IoError,
            6 => Self::InvalidValue,
            128 => Self::BadRequest,
            129 => Self::TooManyFilesOpen,
            254 => Self::SpawnFailure,
            _ => Self::Unknown,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }
}
